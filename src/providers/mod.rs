//! Provider adapters.
//!
//! One module per wire protocol. Each adapter owns its serialization and
//! SSE handling end to end; the only shared machinery is the small set of
//! helpers the protocols genuinely have in common — the SSE scanner
//! ([`crate::sse`]), the tool-call accumulator ([`crate::accum`]), the
//! schema normalizers ([`crate::schema`]) and the checked-send helper in
//! [`crate::provider`]. The responses family (`openai_responses`, `codex`)
//! and the Gemini family (`gemini`, `code_assist`) additionally share
//! their conversion helpers within the family.

pub mod anthropic;
pub mod code_assist;
pub mod codex;
pub mod gemini;
pub mod openai_compat;
pub mod openai_responses;

pub use anthropic::AnthropicProvider;
pub use code_assist::CodeAssistProvider;
pub use codex::CodexProvider;
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use openai_responses::OpenAiResponsesProvider;
