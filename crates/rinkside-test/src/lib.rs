//! Helpers for testing the web server and the caching service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], hold on to the returned handle for the entire test. The cache
//!    store recreates its directory lazily, so dropping the handle early leaks the directory.
//!    Assign it to a variable in the test function (e.g. `let _cache_dir = test::tempdir()`).
//!
//!  - [`Server`] and [`Upstream`] stop serving when dropped. Keep them alive until all
//!    requests to them have been made, otherwise those requests fail with connection errors.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the rinkside crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("rinkside=trace,rinkside_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    pub fn new(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            axum::serve(listener, service).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A canned response of the [`Upstream`].
#[derive(Debug, Clone)]
pub enum Reply {
    /// `200 OK` with the given JSON body.
    Json(serde_json::Value),
    /// An empty response with the given status.
    Status(StatusCode),
    /// `200 OK` with a body that is not valid JSON.
    Garbage(String),
    /// The inner reply, after sleeping for the given duration.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(value)
    }

    pub fn status(status: u16) -> Self {
        Self::Status(StatusCode::from_u16(status).unwrap())
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

#[derive(Debug, Default)]
struct UpstreamState {
    queued: BTreeMap<String, VecDeque<Reply>>,
    replies: BTreeMap<String, Reply>,
    hits: BTreeMap<String, usize>,
}

impl UpstreamState {
    fn next_reply(&mut self, path: &str) -> Option<Reply> {
        *self.hits.entry(path.to_owned()).or_default() += 1;

        if let Some(reply) = self.queued.get_mut(path).and_then(VecDeque::pop_front) {
            return Some(reply);
        }
        self.replies.get(path).cloned()
    }
}

/// A fake upstream site serving JSON documents.
///
/// Every path answers with the reply configured through [`respond`](Self::respond), after the
/// replies queued through [`respond_once`](Self::respond_once) have been used up. Paths without
/// a reply answer with `404 Not Found`. All requests are counted per path.
#[derive(Debug)]
pub struct Upstream {
    server: Server,
    state: Arc<Mutex<UpstreamState>>,
}

impl Upstream {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(UpstreamState::default()));
        let router = Router::new()
            .fallback(serve_reply)
            .with_state(Arc::clone(&state));

        Self {
            server: Server::new(router),
            state,
        }
    }

    /// Sets the reply for every request to `path`.
    pub fn respond(&self, path: &str, reply: Reply) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.replies.insert(normalize(path), reply);
        self
    }

    /// Queues a reply for the next request to `path`.
    pub fn respond_once(&self, path: &str, reply: Reply) -> &Self {
        let mut state = self.state.lock().unwrap();
        state
            .queued
            .entry(normalize(path))
            .or_default()
            .push_back(reply);
        self
    }

    /// The number of requests made to `path` so far.
    pub fn hits(&self, path: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.hits.get(&normalize(path)).copied().unwrap_or_default()
    }

    /// The number of requests made to any path so far.
    pub fn total_hits(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.hits.values().sum()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for Upstream {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

async fn serve_reply(
    State(state): State<Arc<Mutex<UpstreamState>>>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let reply = state.lock().unwrap().next_reply(uri.path());

    let mut reply = match reply {
        Some(reply) => reply,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    loop {
        match reply {
            Reply::Json(value) => return Json(value).into_response(),
            Reply::Status(status) => return status.into_response(),
            Reply::Garbage(body) => {
                return ([("content-type", "application/json")], body).into_response();
            }
            Reply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    }
}
