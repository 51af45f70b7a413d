use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use url::Url;

use crate::cache::Entry;
use crate::delivery::in_delivery_context;
use crate::error::RequestError;
use crate::markers::{MarkerLog, SLOW_REQUEST_THRESHOLD_MS, TARGET as MARKER_TARGET};
use crate::net::headers::cache_entry_for;
use crate::queue::QueueCore;
use crate::response::{Headers, NetworkResponse, Response};
use crate::retry::{DefaultRetryPolicy, RetryPolicy};

/// Supported HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request priorities. Higher priorities are dispatched first; requests of
/// equal priority are dispatched in admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Immediate,
}

/// A request body together with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// The outcome of a parse function.
pub struct Parsed<T>(ParsedInner<T>);

enum ParsedInner<T> {
    Deliver {
        result: T,
        cache_entry: Option<Entry>,
    },
    Skip,
}

impl<T> Parsed<T> {
    /// A successful parse with nothing to cache.
    pub fn new(result: T) -> Self {
        Parsed(ParsedInner::Deliver {
            result,
            cache_entry: None,
        })
    }

    /// A successful parse together with the cache entry to store for it.
    pub fn with_entry(result: T, cache_entry: Entry) -> Self {
        Parsed(ParsedInner::Deliver {
            result,
            cache_entry: Some(cache_entry),
        })
    }

    /// Parse succeeded but nothing should be delivered. The request still
    /// finishes normally.
    pub fn skip() -> Self {
        Parsed(ParsedInner::Skip)
    }
}

type Parser<T> = dyn Fn(&NetworkResponse) -> Result<Parsed<T>, RequestError> + Send + Sync;
type Listener<T> = dyn Fn(Result<T, RequestError>) + Send + Sync;
type HeaderProducer = dyn Fn() -> Result<Headers, RequestError> + Send + Sync;
type BodyProducer = dyn Fn() -> Result<Option<Body>, RequestError> + Send + Sync;
type ErrorHook = dyn Fn(RequestError) -> RequestError + Send + Sync;

/// Mutable per-lifecycle state shared between the typed request and the
/// pipeline.
pub(crate) struct RequestState {
    sequence: OnceLock<u64>,
    cancelled: AtomicBool,
    delivered: AtomicBool,
    intermediate_delivered: AtomicBool,
    cache_entry: Mutex<Option<Entry>>,
    queue: Mutex<Option<Arc<QueueCore>>>,
    markers: Option<MarkerLog>,
    birth: Instant,
}

impl RequestState {
    fn new() -> Self {
        RequestState {
            sequence: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
            intermediate_delivered: AtomicBool::new(false),
            cache_entry: Mutex::new(None),
            queue: Mutex::new(None),
            markers: MarkerLog::enabled().then(MarkerLog::new),
            birth: Instant::now(),
        }
    }
}

/// One logical HTTP operation: the immutable description of what to fetch,
/// how to parse it, and where to deliver it, plus per-lifecycle flags.
///
/// A request is a plain record of two user-supplied functions — a parse
/// function run on a dispatcher worker, and a listener run on the delivery
/// target — alongside the usual HTTP fields. Submit it with
/// [`RequestQueue::add`](crate::queue::RequestQueue::add); the returned
/// [`RequestRef`] is the handle for cancellation.
pub struct Request<T> {
    method: Method,
    url: Url,
    cache_key: String,
    tag: Option<String>,
    priority: Priority,
    should_cache: bool,
    static_headers: Headers,
    header_producer: Option<Box<HeaderProducer>>,
    static_body: Option<Body>,
    body_producer: Option<Box<BodyProducer>>,
    error_hook: Option<Box<ErrorHook>>,
    retry_policy: Mutex<Box<dyn RetryPolicy>>,
    parser: Box<Parser<T>>,
    listener: Arc<Listener<T>>,
    state: RequestState,
}

impl<T> Request<T> {
    /// Creates a request from its parse function and listener.
    pub fn new(
        method: Method,
        url: Url,
        parser: impl Fn(&NetworkResponse) -> Result<Parsed<T>, RequestError> + Send + Sync + 'static,
        listener: impl Fn(Result<T, RequestError>) + Send + Sync + 'static,
    ) -> Self {
        let cache_key = url.as_str().to_owned();
        Request {
            method,
            url,
            cache_key,
            tag: None,
            priority: Priority::Normal,
            should_cache: true,
            static_headers: Headers::new(),
            header_producer: None,
            static_body: None,
            body_producer: None,
            error_hook: None,
            retry_policy: Mutex::new(Box::<DefaultRetryPolicy>::default()),
            parser: Box::new(parser),
            listener: Arc::new(listener),
            state: RequestState::new(),
        }
    }

    /// Tags this request for bulk cancellation via
    /// [`RequestQueue::cancel_all`](crate::queue::RequestQueue::cancel_all).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// When `false`, the cache is skipped entirely and the request goes
    /// straight to the network.
    pub fn with_should_cache(mut self, should_cache: bool) -> Self {
        self.should_cache = should_cache;
        self
    }

    /// Overrides the cache key; the URL by default.
    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = cache_key.into();
        self
    }

    pub fn with_retry_policy(self, policy: impl RetryPolicy + 'static) -> Self {
        *self.retry_policy.lock() = Box::new(policy);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_headers.insert(name.into(), value.into());
        self
    }

    /// Installs a header producer, replacing any statically set headers. The
    /// producer runs on a network worker for every attempt and may fail,
    /// e.g. with [`RequestError::Auth`] when a token cannot be obtained.
    pub fn with_headers_producer(
        mut self,
        producer: impl Fn() -> Result<Headers, RequestError> + Send + Sync + 'static,
    ) -> Self {
        self.header_producer = Some(Box::new(producer));
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.static_body = Some(Body {
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Sets a form-encoded body from a parameter map.
    pub fn with_params<'a>(self, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        self.with_body(
            "application/x-www-form-urlencoded; charset=UTF-8",
            encoded.into_bytes(),
        )
    }

    /// Installs a body producer, replacing any statically set body.
    pub fn with_body_producer(
        mut self,
        producer: impl Fn() -> Result<Option<Body>, RequestError> + Send + Sync + 'static,
    ) -> Self {
        self.body_producer = Some(Box::new(producer));
        self
    }

    /// Installs a hook that may refine transport errors into something more
    /// specific before they reach the listener.
    pub fn map_network_error(
        mut self,
        hook: impl Fn(RequestError) -> RequestError + Send + Sync + 'static,
    ) -> Self {
        self.error_hook = Some(Box::new(hook));
        self
    }
}

impl Request<String> {
    /// A request delivering the response body as a string.
    pub fn string(
        method: Method,
        url: Url,
        listener: impl Fn(Result<String, RequestError>) + Send + Sync + 'static,
    ) -> Self {
        Request::new(
            method,
            url,
            |response| {
                let text = String::from_utf8_lossy(&response.data).into_owned();
                Ok(match cache_entry_for(response) {
                    Some(entry) => Parsed::with_entry(text, entry),
                    None => Parsed::new(text),
                })
            },
            listener,
        )
    }
}

impl<T: DeserializeOwned + Send + 'static> Request<T> {
    /// A request deserializing the response body as JSON.
    pub fn json(
        method: Method,
        url: Url,
        listener: impl Fn(Result<T, RequestError>) + Send + Sync + 'static,
    ) -> Self {
        Request::new(
            method,
            url,
            |response| {
                let value: T = serde_json::from_slice(&response.data)?;
                Ok(match cache_entry_for(response) {
                    Some(entry) => Parsed::with_entry(value, entry),
                    None => Parsed::new(value),
                })
            },
            listener,
        )
    }
}

/// The type-erased request operations the pipeline works with.
pub(crate) trait Erased: Send + Sync + 'static {
    fn method(&self) -> Method;
    fn url(&self) -> &Url;
    fn cache_key(&self) -> &str;
    fn tag(&self) -> Option<&str>;
    fn priority(&self) -> Priority;
    fn should_cache(&self) -> bool;
    fn headers(&self) -> Result<Headers, RequestError>;
    fn body(&self) -> Result<Option<Body>, RequestError>;
    fn retry_policy(&self) -> &Mutex<Box<dyn RetryPolicy>>;
    fn state(&self) -> &RequestState;
    fn parse_network_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Option<Response>, RequestError>;
    fn parse_network_error(&self, error: RequestError) -> RequestError;
    fn deliver_error(&self, error: RequestError);
}

impl<T: Send + 'static> Erased for Request<T> {
    fn method(&self) -> Method {
        self.method
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn cache_key(&self) -> &str {
        &self.cache_key
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn should_cache(&self) -> bool {
        self.should_cache
    }

    fn headers(&self) -> Result<Headers, RequestError> {
        match &self.header_producer {
            Some(producer) => producer(),
            None => Ok(self.static_headers.clone()),
        }
    }

    fn body(&self) -> Result<Option<Body>, RequestError> {
        match &self.body_producer {
            Some(producer) => producer(),
            None => Ok(self.static_body.clone()),
        }
    }

    fn retry_policy(&self) -> &Mutex<Box<dyn RetryPolicy>> {
        &self.retry_policy
    }

    fn state(&self) -> &RequestState {
        &self.state
    }

    fn parse_network_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Option<Response>, RequestError> {
        match (self.parser)(response)?.0 {
            ParsedInner::Skip => Ok(None),
            ParsedInner::Deliver {
                result,
                cache_entry,
            } => {
                let listener = Arc::clone(&self.listener);
                Ok(Some(Response::new(
                    cache_entry,
                    Box::new(move || listener(Ok(result))),
                )))
            }
        }
    }

    fn parse_network_error(&self, error: RequestError) -> RequestError {
        match &self.error_hook {
            Some(hook) => hook(error),
            None => error,
        }
    }

    fn deliver_error(&self, error: RequestError) {
        (self.listener)(Err(error));
    }
}

/// A shared handle to a submitted request.
///
/// This is what the queues carry, what [`Network`](crate::net::Network) and
/// [`ResponseDelivery`](crate::delivery::ResponseDelivery) implementations
/// receive, and what callers keep around to [`cancel`](Self::cancel).
#[derive(Clone)]
pub struct RequestRef(Arc<dyn Erased>);

impl<T: Send + 'static> From<Request<T>> for RequestRef {
    fn from(request: Request<T>) -> Self {
        RequestRef(Arc::new(request))
    }
}

impl RequestRef {
    pub fn method(&self) -> Method {
        self.0.method()
    }

    pub fn url(&self) -> &Url {
        self.0.url()
    }

    /// The key identifying this request in the cache; the URL unless
    /// overridden.
    pub fn cache_key(&self) -> &str {
        self.0.cache_key()
    }

    pub fn tag(&self) -> Option<&str> {
        self.0.tag()
    }

    pub fn priority(&self) -> Priority {
        self.0.priority()
    }

    pub fn should_cache(&self) -> bool {
        self.0.should_cache()
    }

    /// The sequence number assigned at admission; zero beforehand. Unique
    /// within one queue lifetime.
    pub fn sequence(&self) -> u64 {
        self.0.state().sequence.get().copied().unwrap_or(0)
    }

    /// Flags this request as cancelled. Idempotent; once cancelled, a
    /// request never becomes uncancelled and no further listener callbacks
    /// are invoked. Dispatchers observe the flag at their next checkpoint;
    /// in-flight transport work is not aborted but its result is discarded.
    pub fn cancel(&self) {
        self.0.state().cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.state().cancelled.load(Ordering::SeqCst)
    }

    /// True once a final response has been delivered for this request.
    pub fn has_had_response_delivered(&self) -> bool {
        self.0.state().delivered.load(Ordering::SeqCst)
    }

    /// The extra HTTP headers to send with this request.
    pub fn headers(&self) -> Result<Headers, RequestError> {
        self.0.headers()
    }

    /// The request body to send, if any.
    pub fn body(&self) -> Result<Option<Body>, RequestError> {
        self.0.body()
    }

    /// The retry policy, consulted by the transport on eligible failures.
    pub fn retry_policy(&self) -> &Mutex<Box<dyn RetryPolicy>> {
        self.0.retry_policy()
    }

    /// The cache entry attached for conditional revalidation, if any.
    pub fn cache_entry(&self) -> Option<Entry> {
        self.0.state().cache_entry.lock().clone()
    }

    /// Attaches an entry retrieved from cache so that a refetch can be made
    /// conditional (`If-None-Match` / `If-Modified-Since`).
    pub fn set_cache_entry(&self, entry: Entry) {
        *self.0.state().cache_entry.lock() = Some(entry);
    }

    /// Runs the parse function against a raw response. `Ok(None)` means the
    /// parse chose to suppress delivery.
    pub fn parse_network_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Option<Response>, RequestError> {
        self.0.parse_network_response(response)
    }

    /// Refines a transport error through the request's error hook.
    pub fn parse_network_error(&self, error: RequestError) -> RequestError {
        self.0.parse_network_error(error)
    }

    /// Invokes the listener with an error. Must only be called on the
    /// delivery target.
    pub fn deliver_error(&self, error: RequestError) {
        self.0.deliver_error(error)
    }

    /// Records a lifecycle marker, if marker logging is enabled.
    pub fn add_marker(&self, name: &str) {
        if let Some(markers) = &self.0.state().markers {
            markers.add(name);
        }
    }

    /// Ends this request's life: detaches it from its queue, releasing any
    /// requests coalesced behind it, and emits the marker log. Safe to call
    /// for requests that were never submitted; only the first call after
    /// admission has any effect.
    pub fn finish(&self, tag: &str) {
        let Some(core) = self.0.state().queue.lock().take() else {
            return;
        };
        core.finish(self);
        metric!(counter("requests.finished") += 1);

        if let Some(markers) = &self.0.state().markers {
            markers.add(tag);
            if let Some(summary) = markers.summary(&format!("{:?}", self)) {
                if in_delivery_context() {
                    tracing::debug!(target: MARKER_TARGET, "{}", summary);
                } else {
                    // Emit the dump from the delivery target so marker output
                    // is ordered consistently with delivery output.
                    core.delivery()
                        .post(Box::new(move || {
                            tracing::debug!(target: MARKER_TARGET, "{}", summary)
                        }));
                }
            }
        } else {
            let elapsed = self.0.state().birth.elapsed().as_millis();
            if elapsed >= SLOW_REQUEST_THRESHOLD_MS {
                tracing::debug!("{} ms: {:?}", elapsed, self);
            }
        }
    }

    pub(crate) fn attach(&self, queue: Arc<QueueCore>, sequence: u64) {
        *self.0.state().queue.lock() = Some(queue);
        self.0
            .state()
            .sequence
            .set(sequence)
            .expect("sequence is assigned once at admission");
    }

    #[cfg(test)]
    pub(crate) fn set_sequence(&self, sequence: u64) {
        self.0
            .state()
            .sequence
            .set(sequence)
            .expect("sequence is assigned once");
    }

    pub(crate) fn mark_delivered(&self) {
        self.0.state().delivered.store(true, Ordering::SeqCst);
    }

    pub(crate) fn note_intermediate_delivered(&self) {
        self.0
            .state()
            .intermediate_delivered
            .store(true, Ordering::SeqCst);
    }

    /// True if the caller has already seen any response for this request,
    /// intermediate or final.
    pub(crate) fn response_seen(&self) -> bool {
        self.has_had_response_delivered()
            || self.0.state().intermediate_delivered.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:?} {}",
            if self.is_cancelled() { "[X]" } else { "[ ]" },
            self.method(),
            self.url(),
            self.priority(),
            self.sequence(),
        )
    }
}
