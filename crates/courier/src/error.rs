use std::time::Duration;

use thiserror::Error;

/// An error that terminates the processing of a request.
///
/// The transport is the primary emitter of these; parse functions produce
/// [`Parse`](Self::Parse) errors. Exactly one of these is delivered to the
/// listener when a request fails, unless the request was cancelled first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The server did not answer within the attempt's timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A connection could not be established at all.
    #[error("no connection: {0}")]
    NoConnection(String),

    /// The server demands credentials, or rejected the ones provided.
    #[error("authentication failure: {0}")]
    Auth(String),

    /// The server answered with a 5xx status.
    #[error("server error: status {status}")]
    Server { status: u16 },

    /// A generic transport failure that fits none of the other kinds.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be converted into the requested type.
    #[error("parse error: {0}")]
    Parse(String),

    /// An unexpected failure inside the pipeline itself.
    #[error("internal error")]
    Internal,
}

impl From<std::io::Error> for RequestError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl RequestError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::Internal
    }
}
