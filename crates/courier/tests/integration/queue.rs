use std::sync::Arc;

use courier::{Cache, MemoryCache, Method, Priority, Request, RequestError, RequestQueue};
use courier_test as test;

use crate::utils::*;

fn string_request(
    path: &str,
    listener: impl Fn(Result<String, RequestError>) + Send + Sync + 'static,
) -> Request<String> {
    Request::string(Method::Get, url(path), listener)
}

#[tokio::test]
async fn test_cache_miss_fetches_and_primes_the_cache() {
    test::setup();
    let network = MockNetwork::new();
    network.respond("/a", cacheable("X", 60));
    let cache = Arc::new(MemoryCache::new());
    let queue = RequestQueue::new(cache.clone(), network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/a", listener));

    assert_eq!(next(&mut events).await.unwrap(), "X");
    assert_no_event(&mut events).await;
    assert_eq!(network.calls(), 1);

    let entry = cache.get(&cache_key("/a")).await.expect("cache was primed");
    assert_eq!(entry.data, b"X");
    assert!(!entry.is_expired());
}

#[tokio::test]
async fn test_fresh_hit_is_served_without_the_network() {
    test::setup();
    let network = MockNetwork::new();
    network.respond("/a", cacheable("X", 60));
    let cache = Arc::new(MemoryCache::new());
    let queue = RequestQueue::new(cache, network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/a", listener.clone()));
    assert_eq!(next(&mut events).await.unwrap(), "X");

    queue.add(string_request("/a", listener));
    assert_eq!(next(&mut events).await.unwrap(), "X");
    assert_eq!(network.calls(), 1);
}

#[tokio::test]
async fn test_soft_expired_hit_delivers_intermediate_then_final() {
    test::setup();
    let network = MockNetwork::new();
    network.respond("/a", cacheable("new", 60));
    let cache = Arc::new(MemoryCache::new());
    cache.put(&cache_key("/a"), entry("old", 60_000, -1_000)).await;
    let queue = RequestQueue::new(cache.clone(), network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/a", listener));

    // The stale value arrives first, the refreshed one second.
    assert_eq!(next(&mut events).await.unwrap(), "old");
    assert_eq!(next(&mut events).await.unwrap(), "new");
    assert_eq!(network.calls(), 1);

    let refreshed = cache.get(&cache_key("/a")).await.unwrap();
    assert_eq!(refreshed.data, b"new");
}

#[tokio::test]
async fn test_not_modified_after_intermediate_suppresses_second_delivery() {
    test::setup();
    let network = MockNetwork::new();
    network.respond("/a", not_modified());
    let cache = Arc::new(MemoryCache::new());
    cache.put(&cache_key("/a"), entry("old", 60_000, -1_000)).await;
    let queue = RequestQueue::new(cache, network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/a", listener));

    assert_eq!(next(&mut events).await.unwrap(), "old");
    assert_no_event(&mut events).await;
    assert_eq!(network.calls(), 1);

    // The request still finished.
    wait_until(|| pending_requests(&queue) == 0).await;
}

#[tokio::test]
async fn test_concurrent_identical_requests_coalesce_into_one_fetch() {
    test::setup();
    let network = MockNetwork::gated();
    network.respond("/a", cacheable("X", 60));
    let cache = Arc::new(MemoryCache::new());
    let queue = RequestQueue::new(cache, network.clone(), 2, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    for _ in 0..3 {
        queue.add(string_request("/a", listener.clone()));
    }

    network.release(1);

    for _ in 0..3 {
        assert_eq!(next(&mut events).await.unwrap(), "X");
    }
    assert_eq!(network.calls(), 1);
    wait_until(|| pending_requests(&queue) == 0).await;
}

#[tokio::test]
async fn test_cancelled_request_finishes_without_callbacks() {
    test::setup();
    let network = MockNetwork::new();
    let cache = GatedCache::new();
    let queue = RequestQueue::new(cache.clone(), network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    let handle = queue.add(string_request("/b", listener));
    handle.cancel();

    // Only now may the cache dispatcher start taking requests.
    cache.release();

    assert_no_event(&mut events).await;
    wait_until(|| pending_requests(&queue) == 0).await;
    assert_eq!(network.calls(), 0);
}

#[tokio::test]
async fn test_higher_priorities_preempt_admission_order() {
    test::setup();
    let network = MockNetwork::gated();
    let cache = Arc::new(MemoryCache::new());
    let queue = RequestQueue::new(cache, network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();

    // Occupy the single worker first so the others stack up in the queue.
    queue.add(string_request("/first", listener.clone()).with_should_cache(false));
    wait_until(|| network.calls() == 1).await;

    queue.add(string_request("/n1", listener.clone()).with_should_cache(false));
    queue.add(string_request("/n2", listener.clone()).with_should_cache(false));
    queue.add(
        string_request("/i", listener.clone())
            .with_should_cache(false)
            .with_priority(Priority::Immediate),
    );

    network.release(4);
    for _ in 0..4 {
        next(&mut events).await.unwrap();
    }

    assert_eq!(network.hits(), ["/first", "/i", "/n1", "/n2"]);
}

#[tokio::test]
async fn test_uncacheable_request_is_not_coalesced_with_an_in_flight_one() {
    test::setup();
    let network = MockNetwork::gated();
    let cache = Arc::new(MemoryCache::new());
    let queue = RequestQueue::new(cache, network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/a", listener.clone()));
    wait_until(|| network.calls() == 1).await;

    // Same URL, but cache is off: it goes straight to the network path.
    queue.add(string_request("/a", listener).with_should_cache(false));

    network.release(2);
    next(&mut events).await.unwrap();
    next(&mut events).await.unwrap();
    assert_eq!(network.calls(), 2);
}

#[tokio::test]
async fn test_network_errors_are_delivered_once() {
    test::setup();
    let network = MockNetwork::new();
    network.fail("/err", RequestError::Server { status: 500 });
    let cache = Arc::new(MemoryCache::new());
    let queue = RequestQueue::new(cache, network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/err", listener));

    assert_eq!(
        next(&mut events).await.unwrap_err(),
        RequestError::Server { status: 500 }
    );
    assert_no_event(&mut events).await;
    wait_until(|| pending_requests(&queue) == 0).await;
}

#[tokio::test]
async fn test_bulk_cancel_by_tag_suppresses_listeners() {
    test::setup();
    let network = MockNetwork::new();
    let cache = GatedCache::new();
    let queue = RequestQueue::new(cache.clone(), network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/one", listener.clone()).with_tag("screen"));
    queue.add(string_request("/two", listener.clone()).with_tag("screen"));
    queue.add(string_request("/three", listener).with_tag("other"));

    queue.cancel_all("screen");
    cache.release();

    // Only the untagged survivor is delivered.
    assert_eq!(next(&mut events).await.unwrap(), "ok");
    assert_no_event(&mut events).await;
    wait_until(|| pending_requests(&queue) == 0).await;
}

#[tokio::test]
async fn test_stop_halts_processing_and_start_resumes_it() {
    test::setup();
    let network = MockNetwork::new();
    let cache = Arc::new(MemoryCache::new());
    let queue = RequestQueue::new(cache, network.clone(), 1, handle_delivery());
    queue.start();

    let (listener, mut events) = recorder::<String>();
    queue.add(string_request("/a", listener.clone()).with_should_cache(false));
    next(&mut events).await.unwrap();

    queue.stop();
    // Give the workers a chance to observe the quit signal before the next
    // request lands in the queue.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    queue.add(string_request("/b", listener).with_should_cache(false));
    assert_no_event(&mut events).await;
    assert_eq!(network.calls(), 1);

    // Restarting picks the queued request back up.
    queue.start();
    assert_eq!(next(&mut events).await.unwrap(), "ok");
    assert_eq!(network.calls(), 2);
}
