use std::sync::Arc;

use tokio::sync::watch;

use super::parse_guarded;
use crate::queue::QueueCore;
use crate::request::RequestRef;

/// A network pool worker.
///
/// Requests taken from the network queue are executed against the
/// [`Network`](crate::net::Network), parsed on this worker, conditionally
/// written to the cache, and posted to the delivery target. A failure only
/// ever affects the request that caused it.
pub(crate) struct NetworkDispatcher {
    core: Arc<QueueCore>,
}

impl NetworkDispatcher {
    pub fn new(core: Arc<QueueCore>) -> Self {
        NetworkDispatcher { core }
    }

    pub async fn run(self, mut quit: watch::Receiver<bool>) {
        tracing::debug!("starting network dispatcher");
        while let Some(request) = self.core.network_queue().take(&mut quit).await {
            self.process(request).await;
        }
        tracing::debug!("network dispatcher finished");
    }

    async fn process(&self, request: RequestRef) {
        request.add_marker("network-queue-take");

        if request.is_cancelled() {
            request.finish("network-discard-cancelled");
            return;
        }

        // Best-effort traffic accounting.
        metric!(counter("network.request") += 1);
        tracing::trace!(url = %request.url(), "performing request");

        let network_response = match self.core.network().perform_request(&request).await {
            Ok(response) => response,
            Err(error) => {
                metric!(counter("network.error") += 1);
                let error = request.parse_network_error(error);
                self.core.delivery().post_error(request, error);
                return;
            }
        };
        request.add_marker("network-http-complete");

        // The server has nothing newer and the caller already saw a
        // response for this request; don't deliver an identical second one.
        if network_response.not_modified && request.response_seen() {
            request.finish("not-modified");
            return;
        }

        let parsed = parse_guarded(&request, &network_response);
        request.add_marker("network-parse-complete");

        let response = match parsed {
            Ok(Some(response)) => response,
            Ok(None) => {
                request.finish("network-discard-skipped");
                return;
            }
            Err(error) => {
                let error = request.parse_network_error(error);
                self.core.delivery().post_error(request, error);
                return;
            }
        };

        if request.should_cache() {
            if let Some(entry) = response.cache_entry().cloned() {
                self.core.cache().put(request.cache_key(), entry).await;
                request.add_marker("network-cache-written");
                metric!(counter("cache.write") += 1);
            }
        }

        request.mark_delivered();
        self.core.delivery().post_response(request, response);
    }
}
