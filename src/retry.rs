//! Retry wrapper with exponential backoff
//!
//! [`RetryProvider`] wraps any [`Provider`] and re-issues the call when a
//! transient failure shows up, either at stream creation or mid-stream.
//! Each backoff is announced in-band as an [`Event::Retry`] so consumers
//! can show progress; the stream contract is unchanged — the caller still
//! sees exactly one terminal `done` or error.
//!
//! A retried mid-stream call starts over from the top of the response.
//! Events forwarded before the failure are not unwound; interactive
//! consumers typically reset their display on a `retry` event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::provider::{ModelInfo, Provider};
use crate::stream::{EventSender, EventStream};
use crate::types::{Capabilities, Event, Request};
use crate::{Error, Result};

/// A `Retry-After` longer than this is not worth waiting out.
const LONG_WAIT_SECS: u64 = 60;

/// Error-message fragments that mark a failure as transient.
const RETRYABLE_SUBSTRINGS: [&str; 9] = [
    "rate limit",
    "too many requests",
    "overloaded",
    "connection refused",
    "reset",
    "timeout",
    "deadline exceeded",
    "temporary failure",
    "no such host",
];

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Ceiling for any single wait, including `Retry-After`
    pub max_delay: Duration,

    /// Jitter fraction: each wait is scaled by `1 ± jitter`
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Exponential backoff with jitter for the given attempt (1-based):
    /// `min(base · 2^(attempt-1) · (1 ± jitter), max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let jitter = 1.0 + self.jitter * (rand::random::<f64>() * 2.0 - 1.0);
        let secs = (exponential * jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Wait before the next attempt, honouring an explicit `Retry-After`.
    fn delay_for(&self, attempt: u32, error: &Error) -> Duration {
        if let Error::RateLimit {
            retry_after: Some(secs),
            ..
        } = error
        {
            return Duration::from_secs(*secs).min(self.max_delay);
        }
        self.backoff_delay(attempt)
    }
}

/// Determine if an error is transient.
///
/// Transport failures and 429/5xx are retryable; other 4xx are fatal; a
/// rate limit that asks for a wait beyond the long-wait threshold is not
/// retried at all. Protocol and unclassified errors retry only when their
/// message matches a known transient fragment.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Http(_) => true,
        Error::RateLimit { retry_after, .. } => {
            retry_after.is_none_or(|secs| secs <= LONG_WAIT_SECS)
        }
        Error::Api { status, .. } => *status == 429 || (500..=599).contains(status),
        Error::Stream(msg) | Error::Other(msg) => {
            let msg = msg.to_lowercase();
            RETRYABLE_SUBSTRINGS.iter().any(|s| msg.contains(s))
        }
        _ => false,
    }
}

/// Provider wrapper adding retries around [`Provider::stream`].
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    pub fn with_config(inner: Arc<dyn Provider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn credential(&self) -> String {
        self.inner.credential()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn stream(&self, req: Request) -> Result<EventStream> {
        let inner = Arc::clone(&self.inner);
        let config = self.config.clone();
        Ok(EventStream::spawn(move |tx| async move {
            run_with_retries(inner, config, req, tx).await;
        }))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.inner.list_models().await
    }
}

async fn run_with_retries(
    inner: Arc<dyn Provider>,
    config: RetryConfig,
    req: Request,
    tx: EventSender,
) {
    let mut attempt = 1u32;
    loop {
        let failure = match inner.stream(req.clone()).await {
            Ok(mut stream) => {
                let mut failure: Option<Error> = None;
                while let Some(item) = stream.recv().await {
                    match item {
                        Ok(event) => {
                            if !tx.send(event).await {
                                return;
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                match failure {
                    // Natural end: the inner `done` was already forwarded.
                    None => return,
                    Some(e) => e,
                }
            }
            Err(e) => e,
        };

        if attempt >= config.max_attempts || !is_retryable(&failure) {
            tx.fail(failure).await;
            return;
        }

        let wait = config.delay_for(attempt, &failure);
        log::warn!(
            "{}: attempt {}/{} failed ({failure}), retrying in {:.1}s",
            inner.name(),
            attempt,
            config.max_attempts,
            wait.as_secs_f64()
        );
        if !tx
            .send(Event::Retry {
                attempt,
                max_attempts: config.max_attempts,
                wait,
            })
            .await
        {
            return;
        }
        sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(0.5);

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.jitter, 0.5);
    }

    #[test]
    fn test_backoff_grows_and_respects_bounds() {
        let config = RetryConfig::default();
        for attempt in 1..=8 {
            let nominal = 1.0 * 2f64.powi(attempt as i32 - 1);
            let delay = config.backoff_delay(attempt).as_secs_f64();
            let lower = (nominal * 0.75).min(config.max_delay.as_secs_f64());
            let upper = (nominal * 1.25).min(config.max_delay.as_secs_f64());
            assert!(
                delay >= lower - 1e-9 && delay <= upper + 1e-9,
                "attempt {attempt}: {delay} outside [{lower}, {upper}]"
            );
        }
    }

    #[test]
    fn test_retry_after_is_honoured_and_capped() {
        let config = RetryConfig::default();
        let short = Error::rate_limit("slow down", Some(7));
        assert_eq!(config.delay_for(1, &short), Duration::from_secs(7));

        let long = Error::rate_limit("slow down", Some(45));
        assert_eq!(config.delay_for(1, &long), config.max_delay);
    }

    #[test]
    fn test_is_retryable_statuses() {
        assert!(is_retryable(&Error::api(429, "rate limited")));
        assert!(is_retryable(&Error::api(502, "bad gateway")));
        assert!(is_retryable(&Error::api(503, "unavailable")));
        assert!(!is_retryable(&Error::api(400, "bad request")));
        assert!(!is_retryable(&Error::api(401, "unauthorized")));
        assert!(!is_retryable(&Error::api(404, "not found")));
    }

    #[test]
    fn test_is_retryable_substrings() {
        assert!(is_retryable(&Error::stream("connection reset by peer")));
        assert!(is_retryable(&Error::other("DNS: no such host")));
        assert!(is_retryable(&Error::other("deadline exceeded")));
        assert!(!is_retryable(&Error::stream("unexpected frame shape")));
    }

    #[test]
    fn test_long_rate_limit_wait_is_fatal() {
        assert!(is_retryable(&Error::rate_limit("busy", Some(30))));
        assert!(is_retryable(&Error::rate_limit("busy", None)));
        assert!(!is_retryable(&Error::rate_limit("busy", Some(600))));
    }

    #[test]
    fn test_non_transient_kinds_are_fatal() {
        assert!(!is_retryable(&Error::Canceled));
        assert!(!is_retryable(&Error::LoopExhausted(20)));
        assert!(!is_retryable(&Error::config("bad url")));
        assert!(!is_retryable(&Error::tool("tool blew up")));
    }
}
