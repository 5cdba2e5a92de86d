//! Fetching resources from their upstream sites.
//!
//! The [`Downloader`] is the producer behind every configured resource. It turns a URL into a
//! JSON document, retrying transient failures with exponential backoff.

use anyhow::Context;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::HttpConfig;
use crate::utils::http::create_client;

mod retry;

pub use retry::Backoff;

/// A failed attempt to fetch an upstream document.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("upstream responded with {0}")]
    Status(StatusCode),
    #[error("request to upstream failed")]
    Request(#[source] reqwest::Error),
    #[error("upstream returned malformed JSON")]
    Malformed(#[source] reqwest::Error),
}

impl DownloadError {
    /// Whether another attempt may succeed.
    ///
    /// Client errors and malformed documents are deterministic, everything else is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Status(status) => !status.is_client_error(),
            DownloadError::Request(_) => true,
            DownloadError::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    backoff: Backoff,
}

impl Downloader {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = create_client(config).context("failed to create HTTP client")?;
        Ok(Self {
            client,
            backoff: Backoff::from_config(config),
        })
    }

    /// Fetches and parses the JSON document at `url`.
    pub async fn fetch_json(&self, url: &Url) -> anyhow::Result<Value> {
        let mut retry = 0;
        loop {
            let err = match self.fetch_once(url).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = match err.is_retryable() {
                true => self.backoff.delay(retry),
                false => None,
            };
            let Some(delay) = delay else {
                return Err(anyhow::Error::new(err).context(format!("failed to fetch {url}")));
            };

            tracing::warn!(
                error = &err as &dyn std::error::Error,
                url = %url,
                retry = retry + 1,
                ?delay,
                "Upstream request failed, retrying",
            );
            metric!(
                counter("downloads.retry") += 1,
                "host" => url.host_str().unwrap_or_default(),
            );

            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Value, DownloadError> {
        tracing::trace!(url = %url, "Fetching upstream document");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(DownloadError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }

        response.json::<Value>().await.map_err(|err| match err.is_decode() {
            true => DownloadError::Malformed(err),
            false => DownloadError::Request(err),
        })
    }
}
