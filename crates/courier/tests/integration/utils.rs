#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Semaphore;
use url::Url;

use courier::cache::epoch_millis;
use courier::{
    Cache, Entry, ExecutorDelivery, Headers, MemoryCache, Network, NetworkResponse, RequestError,
    RequestQueue, RequestRef,
};

/// A URL that only the [`MockNetwork`] will ever see.
pub fn url(path: &str) -> Url {
    format!("http://mock.local{path}").parse().unwrap()
}

pub fn cache_key(path: &str) -> String {
    url(path).to_string()
}

/// A cacheable 200 response with the given body and `max-age`.
pub fn cacheable(body: &str, max_age: u64) -> NetworkResponse {
    let mut headers = Headers::new();
    headers.insert("Cache-Control".into(), format!("max-age={max_age}"));
    NetworkResponse::new(200, body.as_bytes().to_vec(), headers)
}

/// A 304 answer to a conditional request.
pub fn not_modified() -> NetworkResponse {
    let mut response = NetworkResponse::new(304, Vec::new(), Headers::new());
    response.not_modified = true;
    response
}

/// A cache entry whose TTLs are offsets (in ms, possibly negative) from now.
pub fn entry(data: &str, ttl_offset: i64, soft_ttl_offset: i64) -> Entry {
    let now = epoch_millis() as i64;
    Entry {
        data: data.as_bytes().to_vec(),
        ttl: (now + ttl_offset).max(0) as u64,
        soft_ttl: (now + soft_ttl_offset).max(0) as u64,
        ..Default::default()
    }
}

/// Delivery onto the current tokio runtime.
pub fn handle_delivery() -> Arc<ExecutorDelivery> {
    Arc::new(ExecutorDelivery::new(tokio::runtime::Handle::current()))
}

#[derive(Clone)]
enum Outcome {
    Respond(NetworkResponse),
    Fail(RequestError),
}

/// A scriptable transport. Outcomes are keyed by URL path and consumed in
/// order; unscripted paths answer 200 with body `ok`. When gated, every
/// request waits for a permit from [`release`](Self::release) after it has
/// been counted.
pub struct MockNetwork {
    script: Mutex<HashMap<String, VecDeque<Outcome>>>,
    hits: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(MockNetwork {
            script: Mutex::new(HashMap::new()),
            hits: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(MockNetwork {
            script: Mutex::new(HashMap::new()),
            hits: Mutex::new(Vec::new()),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self, permits: usize) {
        self.gate
            .as_ref()
            .expect("network is not gated")
            .add_permits(permits);
    }

    pub fn respond(&self, path: &str, response: NetworkResponse) {
        self.script
            .lock()
            .entry(path.to_owned())
            .or_default()
            .push_back(Outcome::Respond(response));
    }

    pub fn fail(&self, path: &str, error: RequestError) {
        self.script
            .lock()
            .entry(path.to_owned())
            .or_default()
            .push_back(Outcome::Fail(error));
    }

    /// The number of requests that reached the transport.
    pub fn calls(&self) -> usize {
        self.hits.lock().len()
    }

    /// The paths that reached the transport, in order.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().clone()
    }
}

impl Network for MockNetwork {
    fn perform_request<'a>(
        &'a self,
        request: &'a RequestRef,
    ) -> BoxFuture<'a, Result<NetworkResponse, RequestError>> {
        Box::pin(async move {
            let path = request.url().path().to_owned();
            self.hits.lock().push(path.clone());

            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("network gate closed").forget();
            }

            let outcome = self
                .script
                .lock()
                .get_mut(&path)
                .and_then(VecDeque::pop_front);

            match outcome {
                Some(Outcome::Respond(mut response)) => {
                    if response.not_modified {
                        // A conditional answer is served from the entry the
                        // request carries, like a real transport would.
                        if let Some(entry) = request.cache_entry() {
                            response.data = entry.data;
                        }
                    }
                    Ok(response)
                }
                Some(Outcome::Fail(error)) => Err(error),
                None => Ok(NetworkResponse::new(200, b"ok".to_vec(), Headers::new())),
            }
        })
    }
}

/// A [`MemoryCache`] whose initialization blocks until released, pinning the
/// cache dispatcher before its first take.
pub struct GatedCache {
    inner: MemoryCache,
    gate: Semaphore,
}

impl GatedCache {
    pub fn new() -> Arc<Self> {
        Arc::new(GatedCache {
            inner: MemoryCache::new(),
            gate: Semaphore::new(0),
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

impl Cache for GatedCache {
    fn initialize(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.gate.acquire().await.expect("cache gate closed").forget();
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Entry>> {
        self.inner.get(key)
    }

    fn put<'a>(&'a self, key: &'a str, entry: Entry) -> BoxFuture<'a, ()> {
        self.inner.put(key, entry)
    }

    fn invalidate<'a>(&'a self, key: &'a str, full_expire: bool) -> BoxFuture<'a, ()> {
        self.inner.invalidate(key, full_expire)
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        self.inner.remove(key)
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        self.inner.clear()
    }
}

pub type Events<T> = UnboundedReceiver<Result<T, RequestError>>;

/// A listener that records every delivery into a channel.
pub fn recorder<T: Send + 'static>() -> (
    impl Fn(Result<T, RequestError>) + Send + Sync + Clone + 'static,
    Events<T>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |result| {
            tx.send(result).ok();
        },
        rx,
    )
}

/// The next delivered result, or a panic after five seconds.
pub async fn next<T>(events: &mut Events<T>) -> Result<T, RequestError> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("listener channel closed")
}

/// Asserts that nothing is delivered within a grace period.
pub async fn assert_no_event<T>(events: &mut Events<T>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err(), "unexpected delivery");
}

/// The number of requests between admission and finish.
pub fn pending_requests(queue: &RequestQueue) -> usize {
    let count = AtomicUsize::new(0);
    queue.cancel_all_matching(|_| {
        count.fetch_add(1, Ordering::SeqCst);
        false
    });
    count.load(Ordering::SeqCst)
}

/// Polls `condition` until it holds, or panics after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
