//! Request batching against a live mock server

use std::time::{Duration, Instant};
use sumi_harvest::batching::{RequestBatchingEngine, RequestSpec, ResponseData};
use sumi_harvest::config::BatchingConfig;
use sumi_harvest::HarvestError;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn batching(batch_size: usize, batch_timeout: f64) -> BatchingConfig {
    BatchingConfig {
        batch_size,
        batch_timeout,
        request_retries: 0,
        request_base_delay: 0.01,
        request_max_delay: 0.05,
        ..BatchingConfig::default()
    }
}

async fn fares_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/fares/\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>fare</body></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_partial_batch_dispatches_once_after_timeout() {
    let server = fares_server().await;
    let engine = RequestBatchingEngine::new(batching(5, 0.3)).unwrap();

    let started = Instant::now();
    let receivers: Vec<_> = (0..3)
        .map(|i| {
            let spec = RequestSpec::get(&format!("{}/fares/{}", server.uri(), i)).unwrap();
            engine.enqueue(spec).unwrap()
        })
        .collect();

    assert_eq!(engine.pending_requests(), 3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.statistics().total_batches, 0);
    assert!(server.received_requests().await.unwrap().is_empty());

    for receiver in receivers {
        let response = receiver.await.unwrap().unwrap();
        assert_eq!(response.status, 200);
    }
    assert!(started.elapsed() >= Duration::from_millis(300));

    // Statistics land after the batch resolves
    engine.flush_all_batches().await;
    let stats = engine.statistics();
    assert_eq!(stats.total_batches, 1);
    assert_eq!(stats.largest_batch, 3);
    assert_eq!(stats.successful_requests, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_batches_never_exceed_batch_size() {
    let server = fares_server().await;
    let engine = RequestBatchingEngine::new(batching(4, 0.05)).unwrap();

    let receivers: Vec<_> = (0..10)
        .map(|i| {
            let spec = RequestSpec::get(&format!("{}/fares/{}", server.uri(), i)).unwrap();
            engine.enqueue(spec).unwrap()
        })
        .collect();
    // Two full batches went out immediately
    assert_eq!(engine.pending_requests(), 2);

    for receiver in receivers {
        assert!(receiver.await.unwrap().is_ok());
    }
    engine.flush_all_batches().await;

    let stats = engine.statistics();
    assert_eq!(stats.total_batches, 3);
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.largest_batch, 4);
}

#[tokio::test]
async fn test_failing_request_does_not_fail_siblings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/items/ok\d$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;

    let engine = RequestBatchingEngine::new(batching(4, 0.05)).unwrap();
    let urls = ["ok1", "broken", "ok2", "ok3"];

    let results = futures::future::join_all(urls.iter().map(|name| {
        let engine = engine.clone();
        let spec = RequestSpec::get(&format!("{}/items/{}", server.uri(), name)).unwrap();
        async move { engine.add_request(spec).await }
    }))
    .await;

    for (name, result) in urls.iter().zip(&results) {
        if *name == "broken" {
            assert!(matches!(
                result,
                Err(HarvestError::HttpStatus { status: 500, .. })
            ));
        } else {
            let response = result.as_ref().unwrap();
            assert_eq!(response.data.as_text(), Some("fine"));
        }
    }

    engine.flush_all_batches().await;
    let stats = engine.statistics();
    assert_eq!(stats.successful_requests, 3);
    assert_eq!(stats.failed_requests, 1);
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quotes/1"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quotes/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"price": 42.5, "currency": "EUR"}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let engine = RequestBatchingEngine::new(batching(1, 0.05)).unwrap();
    let spec = RequestSpec::get(&format!("{}/quotes/1", server.uri()))
        .unwrap()
        .with_retries(2);

    let response = engine.add_request(spec).await.unwrap();
    match &response.data {
        ResponseData::Json(value) => assert_eq!(value["currency"], "EUR"),
        other => panic!("expected JSON, got {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_close_flushes_pending_and_rejects_new_requests() {
    let server = fares_server().await;
    let engine = RequestBatchingEngine::new(batching(10, 60.0)).unwrap();

    let receiver = engine
        .enqueue(RequestSpec::get(&format!("{}/fares/7", server.uri())).unwrap())
        .unwrap();
    engine.close().await;

    assert!(receiver.await.unwrap().is_ok());
    assert_eq!(engine.pending_requests(), 0);

    let late = engine
        .add_request(RequestSpec::get(&format!("{}/fares/8", server.uri())).unwrap())
        .await;
    assert!(matches!(late, Err(HarvestError::Resource(_))));
}

async fn slow_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_concurrent_batches_bounded_by_semaphore() {
    let delay = Duration::from_millis(300);
    let first = slow_server(delay).await;
    let second = slow_server(delay).await;

    let engine = RequestBatchingEngine::new(BatchingConfig {
        max_concurrent_batches: 1,
        request_timeout: 5.0,
        ..batching(1, 0.05)
    })
    .unwrap();

    let started = Instant::now();
    let finished = futures::future::join_all([&first, &second].into_iter().map(|server| {
        let engine = engine.clone();
        let spec = RequestSpec::get(&format!("{}/slow/1", server.uri())).unwrap();
        async move {
            engine.add_request(spec).await.unwrap();
            started.elapsed()
        }
    }))
    .await;

    // One destination group at a time: the second waits for the first
    let (earlier, later) = (finished[0].min(finished[1]), finished[0].max(finished[1]));
    assert!(earlier >= delay);
    assert!(later >= delay * 2, "groups overlapped: finished at {:?}", finished);

    engine.flush_all_batches().await;
    assert_eq!(engine.statistics().total_batches, 2);
}
