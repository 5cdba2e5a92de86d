use std::env;

use rinkside_service::config::{Config, LogFormat};
use rinkside_service::logging::{json_layer, sentry_layer};
use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

/// The default filter for a configured level.
///
/// HTTP client internals are kept quiet unless explicitly asked for through `RUST_LOG`, so
/// that retries of a flaky upstream are logged once by the downloader.
fn default_filter(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN,hyper=ERROR,reqwest=ERROR",
        LevelFilter::INFO => "INFO,hyper=WARN,reqwest=WARN,tower_http=WARN",
        LevelFilter::DEBUG => "INFO,hyper=WARN,rinkside=DEBUG,rinkside_service=DEBUG,tower_http=DEBUG",
        LevelFilter::TRACE => "INFO,hyper=WARN,rinkside=TRACE,rinkside_service=TRACE,tower_http=TRACE",
    }
}

/// Resolves `auto` against whether a human is watching the output.
fn resolve_format(format: LogFormat, attended: bool) -> LogFormat {
    match format {
        LogFormat::Auto if attended => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        other => other,
    }
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);

    match resolve_format(format, console::user_attended()) {
        LogFormat::Json => json_layer(std::io::stdout).boxed(),
        LogFormat::Simplified => layer.compact().with_ansi(false).boxed(),
        LogFormat::Pretty | LogFormat::Auto => layer.pretty().boxed(),
    }
}

/// Initializes logging for Rinkside.
///
/// `RUST_LOG` takes precedence over the configured level. With
/// [`enable_backtraces`](rinkside_service::config::Logging::enable_backtraces), this also sets
/// `RUST_BACKTRACE`.
///
/// # Safety
/// This function uses [`std::env::set_var`] to modify the environment. That function is only safe
/// to call in single-threaded contexts to prevent unsynchronized concurrent access to the environment.
pub unsafe fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let filter = match env::var("RUST_LOG") {
        Ok(filter) => EnvFilter::new(filter),
        Err(_) => EnvFilter::new(default_filter(config.logging.level)),
    };

    tracing_subscriber::registry()
        .with(output_layer(config.logging.format).with_filter(filter))
        .with(sentry_layer())
        .init();
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current()
    {
        tracing::error!("{:?}", error);
    } else {
        eprintln!("{error:?}");
    }
}
