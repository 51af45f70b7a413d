use std::sync::Arc;
use std::time::Duration;

use courier::{
    Cache, Config, DefaultRetryPolicy, HttpNetwork, MemoryCache, Method, Network, Request,
    RequestError, RequestQueue, RequestRef,
};
use courier_test as test;

use crate::utils::{assert_no_event, handle_delivery, next, recorder};

fn http_queue(cache: Arc<MemoryCache>) -> RequestQueue {
    let config = Config::default();
    let queue = RequestQueue::new(
        cache,
        Arc::new(HttpNetwork::new(&config)),
        2,
        handle_delivery(),
    );
    queue.start();
    queue
}

#[tokio::test]
async fn test_round_trip_through_the_full_pipeline() {
    test::setup();
    let server = test::Server::new();
    let queue = http_queue(Arc::new(MemoryCache::new()));

    let (listener, mut events) = recorder::<String>();
    queue.add(Request::string(Method::Get, server.url("/hello"), listener));

    assert_eq!(next(&mut events).await.unwrap(), "hello world");
    assert_eq!(server.hits("/hello"), 1);
}

#[tokio::test]
async fn test_direct_request_without_a_queue() {
    test::setup();
    let server = test::Server::new();
    let network = HttpNetwork::new(&Config::default());

    let request: RequestRef =
        Request::string(Method::Get, server.url("/hello"), |_| {}).into();
    let response = network.perform_request(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.data, b"hello world");
}

#[tokio::test]
async fn test_cacheable_response_is_served_from_cache_on_repeat() {
    test::setup();
    let server = test::Server::new();
    let cache = Arc::new(MemoryCache::new());
    let queue = http_queue(cache.clone());

    let (listener, mut events) = recorder::<String>();
    queue.add(Request::string(Method::Get, server.url("/cached"), listener.clone()));
    assert_eq!(next(&mut events).await.unwrap(), "cached payload");

    queue.add(Request::string(Method::Get, server.url("/cached"), listener));
    assert_eq!(next(&mut events).await.unwrap(), "cached payload");

    // The second answer came out of the cache.
    assert_eq!(server.hits("/cached"), 1);

    let entry = cache
        .get(server.url("/cached").as_str())
        .await
        .expect("entry was written");
    assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn test_expired_entry_is_revalidated_with_a_conditional_request() {
    test::setup();
    let server = test::Server::new();
    let queue = http_queue(Arc::new(MemoryCache::new()));

    let (listener, mut events) = recorder::<String>();

    // max-age=0: the entry is hard-expired the moment it lands.
    queue.add(Request::string(Method::Get, server.url("/etag"), listener.clone()));
    assert_eq!(next(&mut events).await.unwrap(), "fresh");

    // The refetch sends If-None-Match, the server answers 304, and the
    // cached body is delivered again.
    queue.add(Request::string(Method::Get, server.url("/etag"), listener));
    assert_eq!(next(&mut events).await.unwrap(), "fresh");
    assert_eq!(server.hits("/etag"), 2);
}

#[tokio::test]
async fn test_server_errors_are_terminal() {
    test::setup();
    let server = test::Server::new();
    let queue = http_queue(Arc::new(MemoryCache::new()));

    let (listener, mut events) = recorder::<String>();
    queue.add(Request::string(Method::Get, server.url("/status/503"), listener));

    assert_eq!(
        next(&mut events).await.unwrap_err(),
        RequestError::Server { status: 503 }
    );
    // 5xx is not retried.
    assert_eq!(server.hits("/status/503"), 1);
}

#[tokio::test]
async fn test_timeouts_are_retried_per_policy_then_surface() {
    test::setup();
    let server = test::Server::new();
    let network = HttpNetwork::new(&Config::default());

    let request: RequestRef = Request::string(Method::Get, server.url("/delay/5000"), |_| {})
        .with_retry_policy(DefaultRetryPolicy::new(Duration::from_millis(100), 1, 1.0))
        .into();

    let error = network.perform_request(&request).await.unwrap_err();
    assert!(matches!(error, RequestError::Timeout(_)));

    // Initial attempt plus one retry.
    assert_eq!(server.hits("/delay/5000"), 2);
    assert_eq!(request.retry_policy().lock().current_retry_count(), 2);
}

#[tokio::test]
async fn test_post_body_from_params_is_form_encoded() {
    test::setup();
    let server = test::Server::new();
    let queue = http_queue(Arc::new(MemoryCache::new()));

    let (listener, mut events) = recorder::<String>();
    queue.add(
        Request::string(Method::Post, server.url("/echo"), listener)
            .with_params([("name", "courier"), ("kind", "pipeline")])
            .with_should_cache(false),
    );

    assert_eq!(next(&mut events).await.unwrap(), "name=courier&kind=pipeline");
}

#[tokio::test]
async fn test_json_request_delivers_a_deserialized_value() {
    test::setup();
    let server = test::Server::new();
    let queue = http_queue(Arc::new(MemoryCache::new()));

    let (listener, mut events) = recorder::<serde_json::Value>();
    queue.add(
        Request::json(Method::Post, server.url("/echo"), listener)
            .with_body("application/json", br#"{"answer": 42}"#.to_vec())
            .with_should_cache(false),
    );

    let value = next(&mut events).await.unwrap();
    assert_eq!(value["answer"], 42);
}

#[tokio::test]
async fn test_unparseable_body_surfaces_a_parse_error() {
    test::setup();
    let server = test::Server::new();
    let queue = http_queue(Arc::new(MemoryCache::new()));

    let (listener, mut events) = recorder::<serde_json::Value>();
    queue.add(
        Request::json(Method::Get, server.url("/hello"), listener).with_should_cache(false),
    );

    let error = next(&mut events).await.unwrap_err();
    assert!(matches!(error, RequestError::Parse(_)));
    assert_no_event(&mut events).await;
}
