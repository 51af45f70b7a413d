//! The two dispatcher workers that move requests through the pipeline.

use std::panic::AssertUnwindSafe;

use crate::error::RequestError;
use crate::request::RequestRef;
use crate::response::{NetworkResponse, Response};

mod cache;
mod network;

pub(crate) use cache::CacheDispatcher;
pub(crate) use network::NetworkDispatcher;

/// Runs the request's parse function, containing panics so one misbehaving
/// parser cannot take a dispatcher down with it.
fn parse_guarded(
    request: &RequestRef,
    response: &NetworkResponse,
) -> Result<Option<Response>, RequestError> {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        request.parse_network_response(response)
    }));
    match result {
        Ok(parsed) => parsed,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<opaque panic payload>");
            tracing::error!(request = ?request, message, "panic in response parser");
            Err(RequestError::Internal)
        }
    }
}
