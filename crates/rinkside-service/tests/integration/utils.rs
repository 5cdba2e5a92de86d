use std::time::Duration;

use rinkside_service::config::{Config, HttpConfig, ResourceConfig};
use rinkside_service::services::{ResourceService, create_service};
use rinkside_test as test;

pub use test::{Reply, Upstream};

/// HTTP settings that keep retrying tests fast.
pub fn fast_http() -> HttpConfig {
    HttpConfig {
        timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        max_retries: 2,
        retry_initial_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(40),
        ..Default::default()
    }
}

/// A resource fetched from `path` on the given upstream.
pub fn resource(upstream: &Upstream, path: &str, ttl: Duration) -> ResourceConfig {
    ResourceConfig {
        key: None,
        upstream: upstream.url(path),
        ttl,
        cache_empty: false,
        fallback: serde_json::json!([]),
        refresh_every: None,
        empty_when: Default::default(),
    }
}

/// Setup tests and create a test service.
///
/// This function returns a tuple containing the service to test, and a temporary cache
/// directory. The directory is cleaned up when the [`TempDir`](test::TempDir) instance is
/// dropped. Keep it as guard until the test has finished.
///
/// The `update_config` closure can modify the configuration before the service is created.
pub fn setup_service(update_config: impl FnOnce(&mut Config)) -> (ResourceService, test::TempDir) {
    test::setup();

    let cache_dir = test::tempdir();

    let mut config = Config {
        cache_dir: cache_dir.path().to_owned(),
        http: fast_http(),
        ..Default::default()
    };
    update_config(&mut config);

    let service = create_service(&config).unwrap();
    (service, cache_dir)
}
