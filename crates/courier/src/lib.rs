//! Courier is a client-side HTTP request pipeline.
//!
//! Prioritized, cancellable requests are admitted to a [`RequestQueue`] and
//! resolved by two kinds of workers: a single cache dispatcher that triages
//! requests against a [`Cache`], and a pool of network dispatchers that
//! execute them against a [`Network`]. Parsed responses are marshalled onto
//! a configurable delivery target through a [`ResponseDelivery`] — never
//! invoked on a worker. Identical cacheable requests issued concurrently are
//! coalesced into a single network fetch.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier::{
//!     Config, ExecutorDelivery, HttpNetwork, MemoryCache, Method, Request, RequestQueue,
//! };
//!
//! # async fn example() {
//! let config = Config::default();
//! let queue = RequestQueue::new(
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(HttpNetwork::new(&config)),
//!     config.network_pool_size,
//!     Arc::new(ExecutorDelivery::new(tokio::runtime::Handle::current())),
//! );
//! queue.start();
//!
//! let request = Request::string(
//!     Method::Get,
//!     "https://example.com/greeting".parse().unwrap(),
//!     |result| match result {
//!         Ok(body) => println!("got: {body}"),
//!         Err(err) => eprintln!("failed: {err}"),
//!     },
//! );
//! let handle = queue.add(request);
//! # handle.cancel();
//! # }
//! ```

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod config;
pub mod delivery;
mod dispatch;
pub mod error;
pub mod logging;
mod markers;
pub mod net;
pub mod queue;
pub mod request;
pub mod response;
pub mod retry;
mod utils;

pub use crate::cache::{Cache, Entry, MemoryCache, NoCache};
pub use crate::config::Config;
pub use crate::delivery::{
    event_loop, DeliveryLoop, EventLoopExecutor, Executor, ExecutorDelivery, ResponseDelivery,
    Task,
};
pub use crate::error::RequestError;
pub use crate::logging::init_logging;
pub use crate::metrics::init_metrics;
pub use crate::net::{HttpNetwork, Network};
pub use crate::queue::{RequestQueue, DEFAULT_NETWORK_POOL_SIZE};
pub use crate::request::{Body, Method, Parsed, Priority, Request, RequestRef};
pub use crate::response::{Headers, NetworkResponse, Response};
pub use crate::retry::{DefaultRetryPolicy, RetryPolicy};
