use std::sync::Arc;

use tokio::sync::watch;

use super::parse_guarded;
use crate::queue::QueueCore;
use crate::request::RequestRef;
use crate::response::NetworkResponse;

/// The cache triage worker.
///
/// Requests taken from the cache queue are resolved from the cache where
/// possible. Misses and hard-expired hits move on to the network queue;
/// fresh hits are delivered directly; soft-expired hits are delivered as an
/// intermediate response and then forwarded to the network for a refresh.
pub(crate) struct CacheDispatcher {
    core: Arc<QueueCore>,
}

impl CacheDispatcher {
    pub fn new(core: Arc<QueueCore>) -> Self {
        CacheDispatcher { core }
    }

    pub async fn run(self, mut quit: watch::Receiver<bool>) {
        tracing::debug!("starting cache dispatcher");
        self.core.cache().initialize().await;

        while let Some(request) = self.core.cache_queue().take(&mut quit).await {
            self.process(request).await;
        }
        tracing::debug!("cache dispatcher finished");
    }

    async fn process(&self, request: RequestRef) {
        request.add_marker("cache-queue-take");

        if request.is_cancelled() {
            request.finish("cache-discard-canceled");
            return;
        }

        let Some(entry) = self.core.cache().get(request.cache_key()).await else {
            request.add_marker("cache-miss");
            metric!(counter("cache.miss") += 1);
            self.core.network_queue().add(request);
            return;
        };

        if entry.is_expired() {
            request.add_marker("cache-hit-expired");
            metric!(counter("cache.hit_expired") += 1);
            // Keep the stale entry so the refetch can be made conditional.
            request.set_cache_entry(entry);
            self.core.network_queue().add(request);
            return;
        }

        request.add_marker("cache-hit");
        metric!(counter("cache.hit") += 1);
        let refresh_needed = entry.refresh_needed();

        let parsed = parse_guarded(&request, &NetworkResponse::from_entry(&entry));
        request.add_marker("cache-hit-parsed");

        let mut response = match parsed {
            Ok(Some(response)) => response,
            Ok(None) => {
                request.finish("cache-discard-skipped");
                return;
            }
            Err(error) => {
                let error = request.parse_network_error(error);
                self.core.delivery().post_error(request, error);
                return;
            }
        };

        if !refresh_needed {
            // Completely unexpired hit; just deliver.
            self.core.delivery().post_response(request, response);
        } else {
            request.add_marker("cache-hit-refresh-needed");
            metric!(counter("cache.hit_refresh_needed") += 1);
            request.set_cache_entry(entry);
            response.set_intermediate();

            // The stale value goes out first; only after it has been
            // delivered is the request forwarded to the network, so the
            // caller always sees the cached value before the refresh result.
            let core = Arc::clone(&self.core);
            let refresh = request.clone();
            self.core.delivery().post_response_and_then(
                request,
                response,
                Box::new(move || core.network_queue().add(refresh)),
            );
        }
    }
}
