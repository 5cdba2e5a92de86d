//! Building blocks of the log output, shared by the server and the tests.

use sentry::integrations::tracing::EventFilter;
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::registry::LookupSpan;

/// A layer writing one JSON object per event, with the event fields at the top level.
///
/// The current span is included so that resource and cache key fields of request spans end up
/// on every line.
pub fn json_layer<S, W>(make_writer: W) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(make_writer)
}

/// Forwards log events to Sentry.
///
/// Errors become events. Warnings and infos become breadcrumbs, so a refresh failure
/// reported later carries the retries that led up to it.
pub fn sentry_layer<S>() -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    sentry::integrations::tracing::layer().event_filter(|md| match *md.level() {
        Level::ERROR => EventFilter::Event,
        Level::WARN | Level::INFO => EventFilter::Breadcrumb,
        Level::DEBUG | Level::TRACE => EventFilter::Ignore,
    })
}
