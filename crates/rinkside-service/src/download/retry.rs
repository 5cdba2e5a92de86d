use std::time::Duration;

use crate::config::HttpConfig;

/// Exponential backoff between attempts of an upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_initial_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// The delay before retry number `retry`, counting from zero.
    ///
    /// Returns `None` once all retries are used up.
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}
