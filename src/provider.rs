//! The provider contract.
//!
//! A [`Provider`] translates the neutral [`Request`] into one vendor's wire
//! protocol and streams typed [`crate::Event`]s back. The engine, the retry
//! wrapper, and the instrumentation wrappers all program against this trait
//! and nothing else; the concrete adapters live in [`crate::providers`].

use async_trait::async_trait;

use crate::stream::EventStream;
use crate::types::{Capabilities, Request};
use crate::{Error, Result};

/// A model available from a provider.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: Option<String>,
}

/// One LLM backend.
///
/// Implementations must be shareable across tasks (`Send + Sync`); a single
/// instance serves any number of concurrent [`Provider::stream`] calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short identifier, e.g. `"anthropic"` or `"ollama"`
    fn name(&self) -> &str;

    /// Identifier of the credential in use, recorded by usage logging
    fn credential(&self) -> String;

    /// What this backend can do natively
    fn capabilities(&self) -> Capabilities;

    /// Start a streaming call. The returned stream ends with exactly one
    /// `Done` event or an error; closing it cancels the HTTP request.
    async fn stream(&self, req: Request) -> Result<EventStream>;

    /// Enumerate available models, where the vendor offers it
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Err(Error::unsupported(format!(
            "{} does not support listing models",
            self.name()
        )))
    }
}

/// Source of bearer tokens for OAuth-authenticated providers.
///
/// Credential storage and refresh live with the caller; providers ask for a
/// fresh token before each request and never cache it themselves.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, useful for tests and short-lived credentials.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Largest error-body excerpt carried inside an [`Error`].
const ERROR_BODY_MAX: usize = 2048;

/// Send a request and map non-2xx responses onto the error taxonomy.
///
/// 429 becomes [`Error::RateLimit`] with any `Retry-After` seconds parsed
/// out; other failures become [`Error::Api`] with the body captured.
pub(crate) async fn send_checked(builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = builder.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let mut body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        body = status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }
    if body.len() > ERROR_BODY_MAX {
        let mut end = ERROR_BODY_MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }

    if status.as_u16() == 429 {
        return Err(Error::rate_limit(body, retry_after));
    }
    Err(Error::api(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[async_trait]
    impl Provider for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }

        fn credential(&self) -> String {
            "dummy-key".into()
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        async fn stream(&self, _req: Request) -> Result<EventStream> {
            Ok(EventStream::spawn(|tx| async move {
                tx.done().await;
            }))
        }
    }

    #[tokio::test]
    async fn test_list_models_default_is_unsupported() {
        let err = Dummy.list_models().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_static_token() {
        let token = StaticToken("sekrit".into());
        assert_eq!(token.access_token().await.unwrap(), "sekrit");
    }
}
