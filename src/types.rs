//! Core type definitions for the llm-conduit engine.
//!
//! This module contains the neutral data model shared by every provider
//! adapter and by the engine:
//!
//! - [`Message`] / [`Part`]: conversation turns built from typed fragments
//! - [`ToolCall`] / [`ToolResult`] / [`ToolSpec`]: the tool-use vocabulary
//! - [`Request`]: one streaming call, built with [`Request::builder()`]
//! - [`Event`]: the unit pushed to stream consumers
//! - [`Capabilities`] / [`Usage`]: provider feature flags and token accounting
//!
//! Vendor wire formats live in `src/providers/`; nothing in this module
//! serializes directly onto an API. The module also carries the two
//! message-history operations every adapter needs before transmission:
//! [`scrub_dangling_tool_calls`] and [`merge_tool_messages`]. Both return
//! new vectors; caller-owned messages are never mutated.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Default turn budget for the agentic loop.
pub const DEFAULT_MAX_TURNS: u32 = 20;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Tool-result turns. All parts of a `Tool` message are tool results,
    /// and each references a tool call from an earlier assistant message.
    Tool,
}

/// One conversation turn: a role plus ordered typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Create a system message from plain text
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Create a user message from plain text
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create an assistant message from plain text
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Create a tool message carrying one result
    pub fn tool_result(result: ToolResult) -> Self {
        Self::new(Role::Tool, vec![Part::ToolResult(result)])
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text(t) = part {
                out.push_str(&t.text);
            }
        }
        out
    }

    /// Tool calls carried by this message (assistant messages only)
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolCall(c) => Some(c),
            _ => None,
        })
    }
}

/// A typed fragment of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text(TextPart),
    Image(ImagePart),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart {
            text: text.into(),
            reasoning: None,
        })
    }
}

/// Text content, optionally carrying reasoning metadata for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
    /// Present when this part came out of a reasoning-capable model and the
    /// vendor expects the metadata back on the next turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningMeta>,
}

/// Reasoning metadata carried verbatim between turns.
///
/// `encrypted_content` is an opaque blob tied to `item_id`; vendors that
/// support reasoning replay require both to continue a thought across tool
/// round-trips. Adapters that do not support replay drop it on serialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
}

/// Inline image data (base64).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePart {
    /// MIME type, e.g. `image/png`
    pub media_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

impl ImagePart {
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Render as a `data:` URI for vendors that take images by URL
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// A model-proposed function invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within a session; correlates the matching [`ToolResult`].
    pub id: String,
    pub name: String,
    /// Raw JSON text. Held opaque because it arrives as streamed fragments;
    /// parse on demand with [`ToolCall::args_value`].
    pub arguments: String,
    /// Opaque provider-issued token that must round-trip on the tool reply
    /// for certain thinking-capable models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            thought_signature: None,
        }
    }

    /// Parse the accumulated argument text. Empty arguments parse as `{}`.
    pub fn args_value(&self) -> crate::Result<serde_json::Value> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        Ok(serde_json::from_str(&self.arguments)?)
    }
}

/// One segment of a multimodal tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultPart {
    Text { text: String },
    Image { media_type: String, data: String },
}

/// The engine-produced response that closes a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Matches [`ToolCall::id`]
    pub id: String,
    pub name: String,
    pub content: String,
    /// Ordered multimodal segments; empty when `content` says it all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_parts: Vec<ToolResultPart>,
    /// Unified diffs produced by editing tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl ToolResult {
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: content.into(),
            content_parts: Vec::new(),
            diffs: Vec::new(),
            is_error: false,
            thought_signature: None,
        }
    }

    pub fn error(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut r = Self::new(id, name, content);
        r.is_error = true;
        r
    }
}

/// Declarative tool description sent to providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-Schema map for the arguments object
    pub schema: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}

/// How the model is allowed to pick tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model decides
    #[default]
    Auto,
    /// Tools disabled for this turn
    None,
    /// Model must call some tool
    Required,
    /// Model must call the named tool
    Name(String),
}

/// Reasoning depth requested from thinking-capable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    XHigh,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::XHigh => "xhigh",
        }
    }
}

/// What a provider can do natively.
///
/// The engine consults this to decide whether to inject the external
/// `web_search`/`read_url` tools and whether the agentic loop applies at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub native_web_search: bool,
    pub native_web_fetch: bool,
    pub tool_calls: bool,
    pub supports_tool_choice: bool,
}

/// Token accounting, accumulated across turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Prompt tokens served from the vendor's cache
    pub cached_input_tokens: u64,
    /// Prompt tokens written into the vendor's cache
    pub cache_write_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }

    pub fn is_empty(&self) -> bool {
        *self == Usage::default()
    }
}

/// Engine phase announcements for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Searching,
    Reading,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Searching => "searching",
            Phase::Reading => "reading",
        }
    }
}

/// The unit pushed to stream consumers.
///
/// Errors travel as the `Err` arm of stream items rather than as an event
/// variant; the last item a consumer observes is `Ok(Event::Done)` or an
/// error, in either case followed by end-of-stream.
#[derive(Debug, Clone)]
pub enum Event {
    /// Incremental assistant text
    TextDelta { text: String },
    /// Incremental reasoning output. `item_id` keys the reasoning item;
    /// `encrypted_content`, when present, must be replayed on the next turn.
    ReasoningDelta {
        text: String,
        item_id: Option<String>,
        encrypted_content: Option<String>,
    },
    /// A fully assembled tool call
    ToolCall(ToolCall),
    /// The engine is about to execute a registered tool
    ToolExecStart {
        id: String,
        name: String,
        info: String,
    },
    /// A registered tool finished executing
    ToolExecEnd {
        id: String,
        name: String,
        info: String,
        success: bool,
    },
    /// Token accounting for one provider call
    Usage(Usage),
    /// Engine phase change
    Phase(Phase),
    /// The retry wrapper is backing off before another attempt
    Retry {
        attempt: u32,
        max_attempts: u32,
        wait: Duration,
    },
    /// Terminal success marker; exactly one per stream
    Done,
}

/// One streaming call: messages, tools, and knobs.
///
/// Construct with [`Request::builder()`]. Cloning is cheap relative to a
/// network round-trip; the engine and retry wrapper clone per turn/attempt.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    /// Ask for web search, native or injected
    pub search: bool,
    /// Inject external search tools even when the provider has native ones
    pub force_external_search: bool,
    pub parallel_tool_calls: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
    /// Agentic loop turn budget
    pub max_turns: u32,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Tool-choice override applied on the final loop turn
    pub last_turn_tool_choice: Option<ToolChoice>,
    pub debug: bool,
    /// Also log raw SSE frames
    pub debug_raw: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            search: false,
            force_external_search: false,
            parallel_tool_calls: false,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            max_turns: DEFAULT_MAX_TURNS,
            reasoning_effort: None,
            last_turn_tool_choice: None,
            debug: false,
            debug_raw: false,
        }
    }
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }
}

/// Builder for [`Request`].
#[derive(Debug, Default)]
pub struct RequestBuilder {
    req: Request,
}

impl RequestBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.req.model = model.into();
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.req.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.req.messages.extend(messages);
        self
    }

    pub fn tool(mut self, spec: ToolSpec) -> Self {
        self.req.tools.push(spec);
        self
    }

    pub fn tools(mut self, specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        self.req.tools.extend(specs);
        self
    }

    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.req.tool_choice = choice;
        self
    }

    pub fn search(mut self, on: bool) -> Self {
        self.req.search = on;
        self
    }

    pub fn force_external_search(mut self, on: bool) -> Self {
        self.req.force_external_search = on;
        self
    }

    pub fn parallel_tool_calls(mut self, on: bool) -> Self {
        self.req.parallel_tool_calls = on;
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.req.temperature = Some(t);
        self
    }

    pub fn top_p(mut self, p: f64) -> Self {
        self.req.top_p = Some(p);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.req.max_output_tokens = Some(n);
        self
    }

    pub fn max_turns(mut self, n: u32) -> Self {
        self.req.max_turns = n;
        self
    }

    pub fn reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.req.reasoning_effort = Some(effort);
        self
    }

    pub fn last_turn_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.req.last_turn_tool_choice = Some(choice);
        self
    }

    pub fn debug(mut self, on: bool) -> Self {
        self.req.debug = on;
        self
    }

    pub fn debug_raw(mut self, on: bool) -> Self {
        self.req.debug_raw = on;
        self
    }

    /// Validate and build the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the model name is empty or `max_turns` is zero.
    pub fn build(self) -> crate::Result<Request> {
        if self.req.model.trim().is_empty() {
            return Err(crate::Error::invalid_input("model name cannot be empty"));
        }
        if self.req.max_turns == 0 {
            return Err(crate::Error::invalid_input("max_turns must be at least 1"));
        }
        Ok(self.req)
    }
}

/// What to do with an assistant tool call that has no matching result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingToolCalls {
    /// Remove the part (Gemini, Code Assist)
    Drop,
    /// Replace it with a `"[tool call interrupted]"` text stub
    /// (OpenAI families, Anthropic)
    Stub,
}

/// Text substituted for an orphaned tool call under [`DanglingToolCalls::Stub`].
pub const TOOL_CALL_INTERRUPTED: &str = "[tool call interrupted]";

/// Remove or stub assistant tool-call parts that no tool message answers.
///
/// Vendors reject histories where a call has no result, which happens when a
/// stream is interrupted mid-loop. Surrounding text parts are preserved;
/// messages left with no parts are dropped entirely.
pub fn scrub_dangling_tool_calls(messages: &[Message], policy: DanglingToolCalls) -> Vec<Message> {
    let answered: std::collections::HashSet<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .flat_map(|m| m.parts.iter())
        .filter_map(|p| match p {
            Part::ToolResult(r) => Some(r.id.as_str()),
            _ => None,
        })
        .collect();

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        if message.role != Role::Assistant {
            out.push(message.clone());
            continue;
        }
        let mut parts = Vec::with_capacity(message.parts.len());
        for part in &message.parts {
            match part {
                Part::ToolCall(call) if !answered.contains(call.id.as_str()) => {
                    log::debug!("scrubbing dangling tool call {} ({})", call.id, call.name);
                    if policy == DanglingToolCalls::Stub {
                        parts.push(Part::text(TOOL_CALL_INTERRUPTED));
                    }
                }
                other => parts.push(other.clone()),
            }
        }
        if !parts.is_empty() {
            out.push(Message::new(message.role, parts));
        }
    }
    out
}

/// Collapse runs of consecutive tool messages into one batch message.
///
/// Tool results answering a single assistant turn are logically one batch;
/// some vendors require them transmitted as one message.
pub fn merge_tool_messages(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        if message.role == Role::Tool {
            if let Some(last) = out.last_mut() {
                if last.role == Role::Tool {
                    last.parts.extend(message.parts.iter().cloned());
                    continue;
                }
            }
        }
        out.push(message.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "test_tool", r#"{"arg":"val"}"#)
    }

    #[test]
    fn test_request_builder_defaults() {
        let req = Request::builder().model("test-model").build().unwrap();
        assert_eq!(req.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(req.tool_choice, ToolChoice::Auto);
        assert!(!req.search);
        assert!(req.temperature.is_none());
    }

    #[test]
    fn test_request_builder_rejects_empty_model() {
        assert!(Request::builder().build().is_err());
        assert!(Request::builder().model("   ").build().is_err());
    }

    #[test]
    fn test_request_builder_rejects_zero_turns() {
        let result = Request::builder().model("m").max_turns(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_tool_call_args_value() {
        let c = call("id-1");
        assert_eq!(c.args_value().unwrap()["arg"], "val");

        let empty = ToolCall::new("id-2", "t", "");
        assert_eq!(empty.args_value().unwrap(), serde_json::json!({}));

        let bad = ToolCall::new("id-3", "t", "{not json");
        assert!(bad.args_value().is_err());
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            cached_input_tokens: 2,
            cache_write_tokens: 0,
        });
        total.add(&Usage {
            input_tokens: 3,
            output_tokens: 7,
            cached_input_tokens: 0,
            cache_write_tokens: 4,
        });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 12);
        assert_eq!(total.cached_input_tokens, 2);
        assert_eq!(total.cache_write_tokens, 4);
    }

    #[test]
    fn test_image_part_data_uri() {
        let img = ImagePart::from_bytes("image/png", b"abc");
        assert_eq!(img.data, "YWJj");
        assert_eq!(img.data_uri(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_scrub_drops_dangling_call() {
        let messages = vec![
            Message::user("hi"),
            Message::new(
                Role::Assistant,
                vec![Part::text("working on it"), Part::ToolCall(call("orphan"))],
            ),
        ];

        let scrubbed = scrub_dangling_tool_calls(&messages, DanglingToolCalls::Drop);
        assert_eq!(scrubbed.len(), 2);
        assert_eq!(scrubbed[1].parts.len(), 1);
        assert_eq!(scrubbed[1].text(), "working on it");
    }

    #[test]
    fn test_scrub_stubs_dangling_call() {
        let messages = vec![Message::new(
            Role::Assistant,
            vec![Part::ToolCall(call("orphan"))],
        )];

        let scrubbed = scrub_dangling_tool_calls(&messages, DanglingToolCalls::Stub);
        assert_eq!(scrubbed.len(), 1);
        assert_eq!(scrubbed[0].text(), TOOL_CALL_INTERRUPTED);
    }

    #[test]
    fn test_scrub_keeps_answered_call() {
        let messages = vec![
            Message::new(Role::Assistant, vec![Part::ToolCall(call("id-1"))]),
            Message::tool_result(ToolResult::new("id-1", "test_tool", "ok")),
        ];

        let scrubbed = scrub_dangling_tool_calls(&messages, DanglingToolCalls::Drop);
        assert_eq!(scrubbed.len(), 2);
        assert!(matches!(scrubbed[0].parts[0], Part::ToolCall(_)));
    }

    #[test]
    fn test_scrub_drops_emptied_message() {
        let messages = vec![Message::new(
            Role::Assistant,
            vec![Part::ToolCall(call("orphan"))],
        )];

        let scrubbed = scrub_dangling_tool_calls(&messages, DanglingToolCalls::Drop);
        assert!(scrubbed.is_empty());
    }

    #[test]
    fn test_merge_tool_messages() {
        let messages = vec![
            Message::new(Role::Assistant, vec![Part::ToolCall(call("a"))]),
            Message::tool_result(ToolResult::new("a", "t", "one")),
            Message::tool_result(ToolResult::new("b", "t", "two")),
            Message::user("next"),
        ];

        let merged = merge_tool_messages(&messages);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].parts.len(), 2);
        assert_eq!(merged[2].role, Role::User);
    }

    #[test]
    fn test_merge_does_not_mutate_input() {
        let messages = vec![
            Message::tool_result(ToolResult::new("a", "t", "one")),
            Message::tool_result(ToolResult::new("b", "t", "two")),
        ];
        let _ = merge_tool_messages(&messages);
        assert_eq!(messages[0].parts.len(), 1);
    }
}
