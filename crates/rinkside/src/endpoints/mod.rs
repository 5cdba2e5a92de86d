use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::get;
use rinkside_service::config::Config;
use rinkside_service::metric;
use rinkside_service::services::ResourceService;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

mod error;
mod metrics;
mod rate_limit;
mod resources;

use metrics::MetricsLayer;
use rate_limit::RateLimiter;
use resources::{get_resource, list_resources};

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins = origins.iter().filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        });
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_origin(allow_origin)
}

pub fn create_app(service: ResourceService, config: &Config) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(TraceLayer::new_for_http())
        .layer(MetricsLayer)
        .layer(cors_layer(&config.cors_origins));

    let mut router = Router::new()
        .route("/api/resources", get(list_resources))
        .route("/api/{resource}", get(get_resource))
        .with_state(service);

    let limiter = RateLimiter::new(&config.rate_limit);
    if limiter.is_enabled() {
        // Only the API routes count against the limit, not the front-end.
        router = router.route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit::limit_requests,
        ));
    }

    if let Some(ref static_dir) = config.static_dir {
        // Client-side routes of the front-end all resolve to its index.
        let index = ServeFile::new(static_dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(static_dir).fallback(index));
    }

    if config.compression {
        router = router.layer(CompressionLayer::new());
    }

    router
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
