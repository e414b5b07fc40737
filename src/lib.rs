//! # llm-conduit
//!
//! A multi-provider LLM streaming engine with an agentic tool-execution
//! loop. One [`Provider`] abstraction yields a stream of typed [`Event`]s
//! for a [`Request`]; the [`Engine`] layers on external search injection,
//! a bounded multi-turn loop that executes tool calls locally, and the
//! plumbing around it — retry, usage accounting, debug tracing.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use llm_conduit::{Engine, Event, Request, providers::OpenAiCompatProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Arc::new(OpenAiCompatProvider::ollama());
//!     let engine = Engine::new(provider);
//!
//!     let req = Request::builder()
//!         .model("qwen3:8b")
//!         .message(llm_conduit::Message::user("What's the capital of France?"))
//!         .build()?;
//!
//!     let mut stream = engine.stream(req).await?;
//!     while let Some(event) = stream.recv().await {
//!         match event? {
//!             Event::TextDelta { text } => print!("{text}"),
//!             Event::Done => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **types**: the neutral message/part/tool-call model and [`Request`]
//! - **stream**: producer/consumer event channel with cancellation
//! - **sse** / **accum** / **schema**: the helpers adapters share — SSE
//!   framing, tool-call reassembly, vendor schema normalization
//! - **providers**: the wire-protocol adapters (Anthropic, chat
//!   completions, OpenAI responses, ChatGPT backend, Gemini, Code Assist)
//! - **tools** / **search**: the tool contract, the registry, and the
//!   built-in `web_search`/`read_url` fallback tools
//! - **engine**: the agentic loop
//! - **retry**: transient-failure classification and backoff around any
//!   provider
//! - **usage** / **trace**: token accounting and debug tracing wrappers
//! - **context** / **config**: history budgeting and environment helpers

mod accum;
mod engine;
mod error;
mod schema;
mod sse;
mod stream;
mod tools;
mod types;

/// Built-in web search and URL fetch tools.
pub mod search;

/// Context window estimation and truncation helpers.
pub mod context;

/// Provider construction from environment variables.
pub mod config;

/// The provider trait and OAuth token seam.
pub mod provider;

/// Concrete wire-protocol adapters.
pub mod providers;

/// Retry wrapper and transient-error classification.
pub mod retry;

/// Debug tracing side channel.
pub mod trace;

/// Usage accounting across a stream.
pub mod usage;

// --- Core API ---

pub use engine::Engine;
pub use error::{Error, Result};
pub use provider::{ModelInfo, Provider, StaticToken, TokenSource};
pub use retry::{RetryConfig, RetryProvider};
pub use stream::{EventSender, EventStream};

// --- Data model ---

pub use accum::{BlockKey, ToolCallAccumulator};
pub use schema::{gemini as gemini_schema, openai_strict as openai_strict_schema};
pub use tools::{Tool, ToolOutput, ToolRegistry, preview_args};
pub use types::{
    Capabilities, DanglingToolCalls, Event, ImagePart, Message, Part, Phase, ReasoningEffort,
    ReasoningMeta, Request, RequestBuilder, Role, TOOL_CALL_INTERRUPTED, TextPart, ToolCall,
    ToolChoice, ToolResult, ToolResultPart, ToolSpec, Usage, merge_tool_messages,
    scrub_dangling_tool_calls,
};

/// Convenience module with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Capabilities, Engine, Error, Event, EventStream, Message, Part, Provider, Request, Result,
        RetryProvider, Role, Tool, ToolCall, ToolChoice, ToolOutput, ToolRegistry, ToolResult,
        ToolSpec, Usage,
    };
}
