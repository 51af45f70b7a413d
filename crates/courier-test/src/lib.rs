//! Helpers for testing the courier pipeline.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all
//!    console output is captured by the test runner.
//!
//!  - When using [`Server`], make sure that the server is held until all
//!    requests to it have been made; it stops serving when dropped. Assign
//!    it to a variable in the test function (e.g. `let server =
//!    test::Server::new();`).

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{extract, middleware, Router};
use url::Url;

/// Setup the test environment.
///
///  - Initializes logs: the logger only captures logs from courier and mutes
///    all other logs.
pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("courier=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A local HTTP server exercising the transport-facing paths:
///
/// - `/hello` serves a plain body.
/// - `/cached` serves a body with `Cache-Control: max-age=60` and an ETag.
/// - `/etag` serves a body with an ETag and `max-age=0`, and answers 304
///   when revalidated with the matching `If-None-Match`.
/// - `/status/{code}` answers with the given status code.
/// - `/delay/{ms}` sleeps before answering.
/// - `/echo` (POST) echoes the request body.
///
/// Every request is counted; see [`hits`](Self::hits). The server requires a
/// `tokio` runtime and stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl Server {
    pub fn new() -> Self {
        Self::with_router(Self::test_router())
    }

    /// Creates a new Server with the given [`Router`].
    pub fn with_router(router: Router) -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri,
                  req: extract::Request,
                  next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.path().to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = router.layer(middleware::from_fn(hitcounter));

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            hits,
        }
    }

    /// Creates a new [`Router`] with the routes described in the main
    /// [`Server`] docs.
    pub fn test_router() -> Router {
        Router::new()
            .route("/hello", get(|| async { "hello world" }))
            .route(
                "/cached",
                get(|| async {
                    (
                        [("Cache-Control", "max-age=60"), ("ETag", "\"v1\"")],
                        "cached payload",
                    )
                }),
            )
            .route(
                "/etag",
                get(|headers: HeaderMap| async move {
                    let revalidated = headers
                        .get("if-none-match")
                        .and_then(|value| value.to_str().ok())
                        == Some("\"v1\"");
                    let status = if revalidated {
                        StatusCode::NOT_MODIFIED
                    } else {
                        StatusCode::OK
                    };
                    let body = if revalidated { "" } else { "fresh" };
                    (
                        status,
                        [("Cache-Control", "max-age=0"), ("ETag", "\"v1\"")],
                        body,
                    )
                }),
            )
            .route(
                "/status/{code}",
                get(|extract::Path(code): extract::Path<u16>| async move {
                    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                }),
            )
            .route(
                "/delay/{ms}",
                get(|extract::Path(ms): extract::Path<u64>| async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    "ok"
                }),
            )
            .route("/echo", post(|body: Bytes| async move { body }))
    }

    /// The URL of the given path on this server.
    pub fn url(&self, path: &str) -> Url {
        format!("http://{}{}", self.socket, path)
            .parse()
            .expect("local test server url")
    }

    /// How many requests the given path has received.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
