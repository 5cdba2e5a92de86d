use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use rinkside_service::config::RateLimitConfig;
use rinkside_service::metric;

use super::error::ResponseError;

/// Past this many tracked clients, idle ones are forgotten on the next request.
const MAX_TRACKED_CLIENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Counts requests per client IP within a sliding window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    clients: Arc<DashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: config.window,
            max_requests: config.max_requests,
            clients: Arc::new(DashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    pub fn check(&self, client: IpAddr) -> Decision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> Decision {
        if self.clients.len() > MAX_TRACKED_CLIENTS {
            self.forget_idle(now);
        }

        let window = self.window;
        let mut hits = self.clients.entry(client).or_default();
        hits.retain(|hit| now.saturating_duration_since(*hit) < window);

        if hits.len() >= self.max_requests as usize {
            let oldest = hits.first().copied().unwrap_or(now);
            let retry_after = window.saturating_sub(now.saturating_duration_since(oldest));
            return Decision::Limited { retry_after };
        }

        hits.push(now);
        Decision::Allowed {
            remaining: self.max_requests.saturating_sub(hits.len() as u32),
        }
    }

    fn forget_idle(&self, now: Instant) {
        let window = self.window;
        self.clients.retain(|_, hits| {
            hits.last()
                .is_some_and(|hit| now.saturating_duration_since(*hit) < window)
        });
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

/// Middleware rejecting clients over their limit with `429 Too Many Requests`.
///
/// Requires the server to provide [`ConnectInfo`]. Without it, all clients share one budget.
pub async fn limit_requests(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(client) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static("ratelimit-limit"),
                HeaderValue::from(limiter.limit()),
            );
            headers.insert(
                HeaderName::from_static("ratelimit-remaining"),
                HeaderValue::from(remaining),
            );
            response
        }
        Decision::Limited { retry_after } => {
            metric!(counter("requests.rate_limited") += 1);
            tracing::debug!(%client, ?retry_after, "Rate limit exceeded");

            let mut response = ResponseError::from((
                StatusCode::TOO_MANY_REQUESTS,
                "too many requests, please try again later",
            ))
            .into_response();

            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds.max(1)));
            response
        }
    }
}
