use std::collections::BTreeMap;
use std::fmt;

use crate::cache::Entry;

/// Response headers as a name → value mapping.
pub type Headers = BTreeMap<String, String>;

/// A raw HTTP response as seen by the pipeline, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body.
    pub data: Vec<u8>,
    /// The response headers.
    pub headers: Headers,
    /// True iff the server answered a conditional request with 304.
    pub not_modified: bool,
}

impl NetworkResponse {
    pub fn new(status: u16, data: Vec<u8>, headers: Headers) -> Self {
        NetworkResponse {
            status,
            data,
            headers,
            not_modified: false,
        }
    }

    /// Looks up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// A synthetic response reconstructed from a cache entry, as handed to
    /// the parse function on a cache hit.
    pub(crate) fn from_entry(entry: &Entry) -> Self {
        NetworkResponse {
            status: 200,
            data: entry.data.clone(),
            headers: entry.response_headers.clone(),
            not_modified: false,
        }
    }
}

/// A parsed response on its way to the delivery target.
///
/// The parsed value itself is type-erased; [`deliver`](Self::deliver) hands
/// it to the listener of the request it was parsed for. Custom
/// [`ResponseDelivery`](crate::delivery::ResponseDelivery) implementations
/// receive this envelope and are expected to call `deliver` exactly once on
/// the delivery target.
pub struct Response {
    intermediate: bool,
    cache_entry: Option<Entry>,
    deliver: Box<dyn FnOnce() + Send>,
}

impl Response {
    pub(crate) fn new(cache_entry: Option<Entry>, deliver: Box<dyn FnOnce() + Send>) -> Self {
        Response {
            intermediate: false,
            cache_entry,
            deliver,
        }
    }

    /// True if this response came from a soft-expired cache entry and a
    /// second, final response may follow.
    pub fn is_intermediate(&self) -> bool {
        self.intermediate
    }

    pub(crate) fn set_intermediate(&mut self) {
        self.intermediate = true;
    }

    /// Cache metadata produced by the parse step, if any.
    pub fn cache_entry(&self) -> Option<&Entry> {
        self.cache_entry.as_ref()
    }

    /// Invokes the listener with the parsed result.
    pub fn deliver(self) {
        (self.deliver)()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("intermediate", &self.intermediate)
            .field("cache_entry", &self.cache_entry.is_some())
            .finish()
    }
}
