use std::collections::HashMap;
use std::time::SystemTime;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::response::Headers;

/// The current time in milliseconds since the Unix epoch, the clock all
/// cache expiration metadata is expressed in.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A cached response body together with its expiration and revalidation
/// metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// The raw body bytes.
    pub data: Vec<u8>,
    /// ETag the server attached to the response, if any.
    pub etag: Option<String>,
    /// The server's `Date` header, in epoch milliseconds. Zero when absent.
    pub server_date: u64,
    /// Hard expiry. Past this point the entry must be refetched.
    pub ttl: u64,
    /// Soft expiry. Past this point the entry may be served stale while a
    /// refresh is fetched in the background.
    pub soft_ttl: u64,
    /// The response headers the entry was created from.
    pub response_headers: Headers,
}

impl Entry {
    /// True if this entry is past its hard expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_millis())
    }

    /// True if this entry is past its soft expiry and should be refreshed.
    pub fn refresh_needed(&self) -> bool {
        self.refresh_needed_at(epoch_millis())
    }

    pub(crate) fn is_expired_at(&self, now: u64) -> bool {
        now >= self.ttl
    }

    pub(crate) fn refresh_needed_at(&self, now: u64) -> bool {
        now >= self.soft_ttl
    }
}

/// A keyed store for response bodies with TTL metadata.
///
/// Implementations must be safe for concurrent `get`/`put`; the pipeline
/// calls them from the cache dispatcher and from every network worker.
pub trait Cache: Send + Sync + 'static {
    /// One-time initialization, performed by the cache dispatcher before it
    /// takes its first request. May block on I/O.
    fn initialize(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Entry>>;

    fn put<'a>(&'a self, key: &'a str, entry: Entry) -> BoxFuture<'a, ()>;

    /// Expires an entry in place: always drops the soft TTL, and also the
    /// hard TTL when `full_expire` is set.
    fn invalidate<'a>(&'a self, key: &'a str, full_expire: bool) -> BoxFuture<'a, ()>;

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()>;

    fn clear(&self) -> BoxFuture<'_, ()>;
}

/// An in-memory [`Cache`] keyed by cache key. Suits tests and short-lived
/// processes; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Entry>> {
        Box::pin(async move { self.entries.lock().get(key).cloned() })
    }

    fn put<'a>(&'a self, key: &'a str, entry: Entry) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().insert(key.to_owned(), entry);
        })
    }

    fn invalidate<'a>(&'a self, key: &'a str, full_expire: bool) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(entry) = self.entries.lock().get_mut(key) {
                entry.soft_ttl = 0;
                if full_expire {
                    entry.ttl = 0;
                }
            }
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().remove(key);
        })
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.entries.lock().clear() })
    }
}

/// A [`Cache`] that stores nothing and never hits.
#[derive(Debug, Default)]
pub struct NoCache;

impl Cache for NoCache {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Option<Entry>> {
        Box::pin(async { None })
    }

    fn put<'a>(&'a self, _key: &'a str, _entry: Entry) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn invalidate<'a>(&'a self, _key: &'a str, _full_expire: bool) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn remove<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}
