//! The transport seam: one HTTP round trip per request, retries included.

use futures::future::BoxFuture;

use crate::error::RequestError;
use crate::request::RequestRef;
use crate::response::NetworkResponse;

pub mod headers;
mod http;

pub use http::{create_client, HttpNetwork};

/// Performs one logical HTTP round trip for a request.
///
/// Implementations consult the request's retry policy on every failure that
/// is eligible for a retry — which failures qualify is the implementation's
/// call — and surface the policy's error when attempts are exhausted. The
/// returned future resolves with the final outcome; the calling dispatcher
/// simply awaits it.
pub trait Network: Send + Sync + 'static {
    fn perform_request<'a>(
        &'a self,
        request: &'a RequestRef,
    ) -> BoxFuture<'a, Result<NetworkResponse, RequestError>>;
}
