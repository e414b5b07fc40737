//! Retry wrapper behavior: accounting, classification, re-streaming.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FlakyProvider, MidStreamFailProvider, MockProvider, Turn};
use llm_conduit::{Error, Event, Message, Provider, Request, RetryConfig, RetryProvider};

fn fast_config(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(20))
}

fn request() -> Request {
    Request::builder()
        .model("m")
        .message(Message::user("hi"))
        .build()
        .unwrap()
}

async fn drain(provider: &RetryProvider) -> (Vec<Event>, Option<Error>) {
    let mut stream = provider.stream(request()).await.unwrap();
    let mut events = Vec::new();
    let mut error = None;
    while let Some(item) = stream.recv().await {
        match item {
            Ok(e) => events.push(e),
            Err(e) => error = Some(e),
        }
    }
    (events, error)
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let flaky = Arc::new(FlakyProvider::new(
        2,
        || Error::api(503, "service unavailable"),
        MockProvider::scripted(vec![Turn::text("made it")]),
    ));
    let retry = RetryProvider::with_config(flaky.clone(), fast_config(5));

    let (events, error) = drain(&retry).await;
    assert!(error.is_none());

    let retries: Vec<(u32, u32)> = events
        .iter()
        .filter_map(|e| match e {
            Event::Retry {
                attempt,
                max_attempts,
                ..
            } => Some((*attempt, *max_attempts)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, 5), (2, 5)]);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::TextDelta { text } if text == "made it")));
    assert!(matches!(events.last(), Some(Event::Done)));
    assert_eq!(flaky.attempts(), 3);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let flaky = Arc::new(FlakyProvider::new(
        10,
        || Error::api(400, "bad request"),
        MockProvider::scripted(vec![Turn::text("unreachable")]),
    ));
    let retry = RetryProvider::with_config(flaky.clone(), fast_config(5));

    let (events, error) = drain(&retry).await;
    assert!(events.is_empty());
    assert!(matches!(error, Some(Error::Api { status: 400, .. })));
    assert_eq!(flaky.attempts(), 1);
}

#[tokio::test]
async fn test_exhaustion_emits_at_most_max_minus_one_retries() {
    let max_attempts = 4;
    let flaky = Arc::new(FlakyProvider::new(
        100,
        || Error::api(503, "still down"),
        MockProvider::scripted(vec![]),
    ));
    let retry = RetryProvider::with_config(flaky.clone(), fast_config(max_attempts));

    let (events, error) = drain(&retry).await;
    let retry_count = events
        .iter()
        .filter(|e| matches!(e, Event::Retry { .. }))
        .count();
    assert_eq!(retry_count, (max_attempts - 1) as usize);
    assert!(matches!(error, Some(Error::Api { status: 503, .. })));
    assert_eq!(flaky.attempts(), max_attempts as usize);
}

#[tokio::test]
async fn test_retry_after_shapes_the_wait() {
    let flaky = Arc::new(FlakyProvider::new(
        1,
        || Error::rate_limit("slow down", Some(0)),
        MockProvider::scripted(vec![Turn::text("ok")]),
    ));
    let retry = RetryProvider::with_config(flaky, fast_config(3));

    let (events, error) = drain(&retry).await;
    assert!(error.is_none());
    match events
        .iter()
        .find(|e| matches!(e, Event::Retry { .. }))
        .unwrap()
    {
        Event::Retry { wait, .. } => assert_eq!(*wait, Duration::from_secs(0)),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_long_rate_limit_wait_is_fatal() {
    let flaky = Arc::new(FlakyProvider::new(
        1,
        || Error::rate_limit("come back tomorrow", Some(3600)),
        MockProvider::scripted(vec![Turn::text("unreachable")]),
    ));
    let retry = RetryProvider::with_config(flaky.clone(), fast_config(5));

    let (events, error) = drain(&retry).await;
    assert!(events.is_empty());
    assert!(matches!(error, Some(Error::RateLimit { .. })));
    assert_eq!(flaky.attempts(), 1);
}

#[tokio::test]
async fn test_mid_stream_failure_restreams() {
    let provider = Arc::new(MidStreamFailProvider::new(1));
    let retry = RetryProvider::with_config(provider, fast_config(3));

    let (events, error) = drain(&retry).await;
    assert!(error.is_none());

    // First attempt's partial text, a retry marker, then the full replay.
    let texts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Event::TextDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["partial ", "partial ", "complete"]);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::Retry { .. }))
            .count(),
        1
    );
    assert!(matches!(events.last(), Some(Event::Done)));
}

#[tokio::test]
async fn test_wrapper_preserves_provider_identity() {
    let inner = Arc::new(MockProvider::scripted(vec![Turn::text("x")]));
    let retry = RetryProvider::new(inner);
    assert_eq!(retry.name(), "mock");
    assert_eq!(retry.credential(), "mock-credential");
    assert!(retry.capabilities().tool_calls);
}
