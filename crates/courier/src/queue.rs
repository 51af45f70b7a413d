use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::delivery::ResponseDelivery;
use crate::dispatch::{CacheDispatcher, NetworkDispatcher};
use crate::net::Network;
use crate::request::{Request, RequestRef};
use crate::utils::pqueue::DispatchQueue;

/// Number of network dispatchers started by default.
pub const DEFAULT_NETWORK_POOL_SIZE: usize = 4;

/// The request dispatch queue.
///
/// [`add`](Self::add) enqueues a request for dispatch: it is resolved from
/// either cache or network on a worker, and the parsed response is delivered
/// through the configured [`ResponseDelivery`]. Identical cacheable requests
/// issued while one is in flight are coalesced into a single fetch, and
/// released through the cache once the leader finishes.
pub struct RequestQueue {
    core: Arc<QueueCore>,
    run: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    quit: Option<watch::Sender<bool>>,
    workers: Vec<JoinHandle<()>>,
}

/// State shared between the queue handle, the dispatchers, and admitted
/// requests. Requests hold a back-reference to this, set at admission and
/// cleared when they finish.
pub(crate) struct QueueCore {
    cache: Arc<dyn Cache>,
    network: Arc<dyn Network>,
    delivery: Arc<dyn ResponseDelivery>,
    cache_queue: DispatchQueue,
    network_queue: DispatchQueue,
    /// All requests between admission and finish, keyed by sequence number.
    current: Mutex<HashMap<u64, RequestRef>>,
    /// Staging area for requests with a duplicate in flight. A present key
    /// means one request for it is in flight; the value holds the requests
    /// waiting behind it, `None` until a second one arrives.
    waiting: Mutex<HashMap<String, Option<Vec<RequestRef>>>>,
    sequence: AtomicU64,
    pool_size: usize,
}

impl RequestQueue {
    /// Creates the worker pool. Processing does not begin until
    /// [`start`](Self::start) is called.
    pub fn new(
        cache: Arc<dyn Cache>,
        network: Arc<dyn Network>,
        pool_size: usize,
        delivery: Arc<dyn ResponseDelivery>,
    ) -> Self {
        RequestQueue {
            core: Arc::new(QueueCore {
                cache,
                network,
                delivery,
                cache_queue: DispatchQueue::new(),
                network_queue: DispatchQueue::new(),
                current: Mutex::new(HashMap::new()),
                waiting: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                pool_size,
            }),
            run: Mutex::new(RunState::default()),
        }
    }

    /// Starts one cache dispatcher and the network dispatcher pool,
    /// stopping any workers from a previous `start` first.
    pub fn start(&self) {
        self.stop();

        let (quit_tx, quit_rx) = watch::channel(false);
        let mut workers = Vec::with_capacity(self.core.pool_size + 1);

        workers.push(tokio::spawn(
            CacheDispatcher::new(Arc::clone(&self.core)).run(quit_rx.clone()),
        ));
        for _ in 0..self.core.pool_size {
            workers.push(tokio::spawn(
                NetworkDispatcher::new(Arc::clone(&self.core)).run(quit_rx.clone()),
            ));
        }

        *self.run.lock() = RunState {
            quit: Some(quit_tx),
            workers,
        };
    }

    /// Signals every dispatcher to quit and return from its blocking take.
    /// Requests still sitting in the queues are not guaranteed to be
    /// processed; there is no join or drain.
    pub fn stop(&self) {
        let mut run = self.run.lock();
        if let Some(quit) = run.quit.take() {
            quit.send(true).ok();
        }
        run.workers.clear();
    }

    /// Adds a request for dispatch and returns its handle.
    pub fn add<T: Send + 'static>(&self, request: Request<T>) -> RequestRef {
        let request: RequestRef = request.into();
        request.attach(Arc::clone(&self.core), self.core.next_sequence());

        self.core
            .current
            .lock()
            .insert(request.sequence(), request.clone());

        request.add_marker("add-to-queue");

        // Uncacheable requests skip the cache queue and are never coalesced.
        if !request.should_cache() {
            self.core.network_queue.add(request.clone());
            return request;
        }

        let mut waiting = self.core.waiting.lock();
        match waiting.entry(request.cache_key().to_owned()) {
            MapEntry::Occupied(mut staged) => {
                // A request for this key is already in flight; hold this one
                // back until the leader finishes.
                staged
                    .get_mut()
                    .get_or_insert_with(Vec::new)
                    .push(request.clone());
                metric!(counter("queue.coalesced") += 1);
                tracing::debug!(
                    cache_key = request.cache_key(),
                    "request for key is in flight, putting on hold"
                );
            }
            MapEntry::Vacant(slot) => {
                slot.insert(None);
                self.core.cache_queue.add(request.clone());
            }
        }
        drop(waiting);

        request
    }

    /// Cancels every live request the filter matches.
    pub fn cancel_all_matching(&self, filter: impl Fn(&RequestRef) -> bool) {
        let current = self.core.current.lock();
        for request in current.values() {
            if filter(request) {
                request.cancel();
                metric!(counter("queue.cancelled") += 1);
            }
        }
    }

    /// Cancels every live request carrying the given tag.
    pub fn cancel_all(&self, tag: &str) {
        self.cancel_all_matching(|request| request.tag() == Some(tag));
    }

    /// The cache this queue resolves from.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.core.cache
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl QueueCore {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Called from [`RequestRef::finish`] at the end of a request's life.
    /// Releases any requests coalesced behind it: they are no longer in
    /// flight, but the cache has been primed by the finished leader, so they
    /// go through the cache dispatcher like any other request.
    pub(crate) fn finish(&self, request: &RequestRef) {
        self.current.lock().remove(&request.sequence());

        if !request.should_cache() {
            return;
        }

        let waiters = self.waiting.lock().remove(request.cache_key());
        if let Some(Some(waiters)) = waiters {
            tracing::debug!(
                cache_key = request.cache_key(),
                count = waiters.len(),
                "releasing waiting requests"
            );
            for waiter in waiters {
                self.cache_queue.add(waiter);
            }
        }
    }

    pub(crate) fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub(crate) fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub(crate) fn delivery(&self) -> &Arc<dyn ResponseDelivery> {
        &self.delivery
    }

    pub(crate) fn cache_queue(&self) -> &DispatchQueue {
        &self.cache_queue
    }

    pub(crate) fn network_queue(&self) -> &DispatchQueue {
        &self.network_queue
    }
}
