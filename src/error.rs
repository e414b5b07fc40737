//! Error types for the llm-conduit engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine.
///
/// The retry wrapper classifies variants into retryable and fatal; see
/// [`crate::retry::is_retryable`]. Tool failures are deliberately absent
/// from the terminal path: the engine folds them into `is_error` tool
/// results so the model gets a chance to recover.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure (network, DNS, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx response with the body captured
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// HTTP 429 or an explicit rate-limit signal from the vendor
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Seconds the vendor asked us to wait, from `Retry-After`
        retry_after: Option<u64>,
    },

    /// Malformed SSE or unexpected event shape
    #[error("streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("tool execution error: {0}")]
    Tool(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stream consumer closed or the governing task was cancelled
    #[error("operation cancelled")]
    Canceled,

    /// The model kept requesting tools past the turn budget
    #[error("agentic loop exceeded max turns ({0})")]
    LoopExhausted(u32),

    /// Operation not offered by this provider
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new API error from a status code and response body
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a new rate-limit error
    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::RateLimit { .. } => Some(429),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_api() {
        let err = Error::api(500, "Internal Server Error");
        assert!(matches!(err, Error::Api { status: 500, .. }));
        assert_eq!(err.to_string(), "API error 500: Internal Server Error");
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn test_error_rate_limit() {
        let err = Error::rate_limit("slow down", Some(7));
        match &err {
            Error::RateLimit { retry_after, .. } => assert_eq!(*retry_after, Some(7)),
            _ => panic!("expected RateLimit"),
        }
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn test_error_stream() {
        let err = Error::stream("connection lost");
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(err.to_string(), "streaming error: connection lost");
    }

    #[test]
    fn test_error_loop_exhausted() {
        let err = Error::LoopExhausted(20);
        assert!(err.to_string().contains("exceeded max turns"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::Canceled)
        }
    }
}
