//! Retrying fetcher against real sockets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use realtime_aggregator::fetch::{FetchError, HttpFetcher, SourceDescriptor, SourceFetcher};

mod common;

fn fetcher(config: &realtime_aggregator::AppConfig) -> HttpFetcher {
    HttpFetcher::new(&config.fetch, config.retries.clone()).unwrap()
}

fn descriptor(config: &realtime_aggregator::AppConfig) -> SourceDescriptor {
    SourceDescriptor::from_config(&config.sources[0], config.fetch.timeout()).unwrap()
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let cc = calls.clone();
    let addr = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, r#"{"detail":"busy"}"#.into())
            } else {
                (200, r#"[{"id":1},{"id":2}]"#.into())
            }
        }
    })
    .await;

    let config = common::test_config(vec![common::source(addr, "posts")]);
    let result = fetcher(&config).fetch(&descriptor(&config)).await;

    assert!(result.is_success(), "{:?}", result.outcome);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.retry_count(), 2);
    assert_eq!(result.outcome.unwrap().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let cc = calls.clone();
    let addr = common::start_programmable_backend(move |_| {
        cc.fetch_add(1, Ordering::SeqCst);
        async { (404, r#"{"detail":"gone"}"#.into()) }
    })
    .await;

    let config = common::test_config(vec![common::source(addr, "posts")]);
    let result = fetcher(&config).fetch(&descriptor(&config)).await;

    assert!(matches!(result.outcome, Err(FetchError::Http { status: 404 })));
    assert_eq!(result.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let cc = calls.clone();
    let addr = common::start_programmable_backend(move |_| {
        cc.fetch_add(1, Ordering::SeqCst);
        async { (500, "{}".into()) }
    })
    .await;

    let config = common::test_config(vec![common::source(addr, "posts")]);
    let result = fetcher(&config).fetch(&descriptor(&config)).await;

    assert!(matches!(result.outcome, Err(FetchError::Http { status: 500 })));
    assert_eq!(result.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_malformed_body_is_permanent() {
    let addr = common::start_mock_backend("<html>maintenance</html>").await;

    let config = common::test_config(vec![common::source(addr, "posts")]);
    let result = fetcher(&config).fetch(&descriptor(&config)).await;

    assert!(matches!(result.outcome, Err(FetchError::Decode(_))));
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_deadline_bounds_slow_upstream() {
    let addr = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        (200, "[]".into())
    })
    .await;

    let mut config = common::test_config(vec![common::source(addr, "slow")]);
    config.fetch.timeout_ms = 100;
    config.fetch.deadline_ms = 250;

    let started = std::time::Instant::now();
    let result = fetcher(&config).fetch(&descriptor(&config)).await;

    assert!(matches!(result.outcome, Err(FetchError::Timeout(_))));
    assert!(result.attempts >= 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_unreachable_upstream_is_network_error() {
    // Bind and drop to get a port nothing listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let config = common::test_config(vec![common::source(addr, "posts")]);
    let result = fetcher(&config).fetch(&descriptor(&config)).await;

    assert!(matches!(result.outcome, Err(FetchError::Network(_))));
    assert_eq!(result.attempts, 3);
}
