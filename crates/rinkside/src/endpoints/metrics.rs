use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use rinkside_service::metric;
use tower::{Layer, Service};

/// Records the duration and status of every request, tagged with the matched route.
#[derive(Clone, Debug)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        MetricsService { service }
    }
}

#[derive(Clone, Debug)]
pub struct MetricsService<S> {
    service: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let route = match request.extensions().get::<MatchedPath>() {
            Some(path) => path.as_str().to_owned(),
            None => "unmatched".to_owned(),
        };

        MetricsFuture {
            route,
            start: Instant::now(),
            future: self.service.call(request),
        }
    }
}

pub struct MetricsFuture<F> {
    route: String,
    start: Instant,
    future: F,
}

impl<F, B, E> Future for MetricsFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `future` is structurally pinned, and never moved out of `self`.
        let this = unsafe { self.get_unchecked_mut() };
        let future = unsafe { Pin::new_unchecked(&mut this.future) };

        let poll = future.poll(cx);
        if let Poll::Ready(ref result) = poll {
            let status = match result {
                Ok(response) => response.status().as_u16().to_string(),
                Err(_) => "error".to_owned(),
            };
            metric!(
                timer("requests.duration") = this.start.elapsed(),
                "route" => &this.route,
                "status" => &status,
            );
        }
        poll
    }
}
