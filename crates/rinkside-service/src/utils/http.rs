use std::time::Duration;

use reqwest::header;

use crate::config::HttpConfig;

/// Creates a [`reqwest::Client`] for upstream requests.
///
/// `timeout` bounds every single attempt, including reading the body.
pub fn create_client(config: &HttpConfig) -> reqwest::Result<reqwest::Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::ClientBuilder::new()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
}
