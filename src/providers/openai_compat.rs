//! OpenAI chat-completions-compatible adapter.
//!
//! One adapter covers every server speaking the chat-completions dialect:
//! local runtimes (Ollama, LM Studio) and hosted vendors (xAI, OpenRouter,
//! Zen) differ only in base URL, auth header, and capability flags, so
//! each gets a named constructor over the same implementation.
//!
//! Streaming quirks handled here:
//!
//! - tool calls arrive fragmented across `delta.tool_calls[].index`
//!   entries with JSON-fragment `arguments`; the accumulator reassembles
//!   them and calls are only emitted once their block is complete
//! - `delta.reasoning_content` (DeepSeek-style) becomes reasoning deltas
//! - usage rides the final chunk when `stream_options.include_usage` is
//!   set, and is emitted exactly once before `done`

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use async_trait::async_trait;

use crate::accum::ToolCallAccumulator;
use crate::provider::{ModelInfo, Provider, send_checked};
use crate::sse;
use crate::stream::EventStream;
use crate::types::{
    Capabilities, DanglingToolCalls, Event, Message, Part, Request, Role, ToolChoice, Usage,
    scrub_dangling_tool_calls,
};
use crate::{Error, Result};

/// Chat-completions adapter; see the named constructors.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    caps: Capabilities,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Point at any chat-completions server.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            caps: Capabilities {
                native_web_search: false,
                native_web_fetch: false,
                tool_calls: true,
                supports_tool_choice: true,
            },
            http: reqwest::Client::new(),
        }
    }

    /// Local Ollama server (default port 11434)
    pub fn ollama() -> Self {
        Self::new("ollama", "http://localhost:11434/v1", None)
    }

    /// Local LM Studio server (default port 1234)
    pub fn lm_studio() -> Self {
        Self::new("lmstudio", "http://localhost:1234/v1", None)
    }

    /// xAI hosted API
    pub fn xai(api_key: impl Into<String>) -> Self {
        Self::new("xai", "https://api.x.ai/v1", Some(api_key.into()))
    }

    /// OpenRouter hosted gateway
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            Some(api_key.into()),
        )
    }

    /// Zen hosted gateway
    pub fn zen(api_key: impl Into<String>) -> Self {
        Self::new("zen", "https://opencode.ai/zen/v1", Some(api_key.into()))
    }

    /// Override the advertised capabilities, e.g. for servers without
    /// working tool support.
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    fn build_body(&self, req: &Request) -> WireRequest {
        let messages = to_wire_messages(&req.messages);
        let tools = if req.tools.is_empty() {
            None
        } else {
            Some(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.schema,
                            },
                        })
                    })
                    .collect(),
            )
        };

        WireRequest {
            model: req.model.clone(),
            messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_output_tokens,
            tools,
            tool_choice: tool_choice_value(&req.tool_choice, self.caps.supports_tool_choice),
            parallel_tool_calls: if req.parallel_tool_calls {
                Some(true)
            } else {
                None
            },
            reasoning_effort: req.reasoning_effort.map(|e| e.as_str()),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn credential(&self) -> String {
        match &self.api_key {
            Some(_) => format!("{}-api-key", self.name),
            None => "local".to_string(),
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn stream(&self, req: Request) -> Result<EventStream> {
        let body = self.build_body(&req);
        let url = format!("{}/chat/completions", self.base_url);
        log::debug!("{}: POST {} model={}", self.name, url, req.model);

        let mut builder = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = send_checked(builder).await?;

        let debug_raw = req.debug_raw;
        Ok(EventStream::spawn(move |tx| async move {
            let mut frames = sse::frames(response, debug_raw);
            let mut acc = ToolCallAccumulator::new();
            let mut usage: Option<Usage> = None;

            use futures::StreamExt;
            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        tx.fail(e).await;
                        return;
                    }
                };
                let Some(chunk) = sse::parse_frame::<Chunk>(&frame) else {
                    continue;
                };
                for event in chunk_events(&mut acc, chunk, &mut usage) {
                    if !tx.send(event).await {
                        return;
                    }
                }
            }

            // Servers that skip finish_reason still owe us the calls.
            for call in acc.finish_all() {
                if !tx.tool_call(call).await {
                    return;
                }
            }
            if let Some(usage) = usage {
                if !tx.usage(usage).await {
                    return;
                }
            }
            tx.done().await;
        }))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.http.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let listing: Value = send_checked(builder).await?.json().await?;
        let models = listing["data"]
            .as_array()
            .ok_or_else(|| Error::stream("model listing missing data array"))?
            .iter()
            .filter_map(|m| m["id"].as_str())
            .map(|id| ModelInfo {
                id: id.to_string(),
                display_name: None,
            })
            .collect();
        Ok(models)
    }
}

// --- wire format -----------------------------------------------------------

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Serialize neutral messages into chat-completions shape.
///
/// Dangling tool calls are stubbed (this family rejects orphaned calls),
/// each tool result becomes its own `role:"tool"` message, and user images
/// ride as `image_url` data URIs.
fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    let scrubbed = scrub_dangling_tool_calls(messages, DanglingToolCalls::Stub);
    let mut wire = Vec::with_capacity(scrubbed.len());

    for message in &scrubbed {
        match message.role {
            Role::System => wire.push(WireMessage {
                role: "system",
                content: Some(Value::String(message.text())),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::User => {
                let images: Vec<&crate::types::ImagePart> = message
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Image(img) => Some(img),
                        _ => None,
                    })
                    .collect();
                let content = if images.is_empty() {
                    Value::String(message.text())
                } else {
                    let mut parts = vec![json!({ "type": "text", "text": message.text() })];
                    for img in images {
                        parts.push(json!({
                            "type": "image_url",
                            "image_url": { "url": img.data_uri() },
                        }));
                    }
                    Value::Array(parts)
                };
                wire.push(WireMessage {
                    role: "user",
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            Role::Assistant => {
                let calls: Vec<Value> = message
                    .tool_calls()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        })
                    })
                    .collect();
                let text = message.text();
                wire.push(WireMessage {
                    role: "assistant",
                    content: if text.is_empty() {
                        None
                    } else {
                        Some(Value::String(text))
                    },
                    tool_calls: if calls.is_empty() { None } else { Some(calls) },
                    tool_call_id: None,
                });
            }
            Role::Tool => {
                for part in &message.parts {
                    if let Part::ToolResult(result) = part {
                        let mut content = result.content.clone();
                        for seg in &result.content_parts {
                            if let crate::types::ToolResultPart::Text { text } = seg {
                                if !content.is_empty() {
                                    content.push('\n');
                                }
                                content.push_str(text);
                            }
                        }
                        wire.push(WireMessage {
                            role: "tool",
                            content: Some(Value::String(content)),
                            tool_calls: None,
                            tool_call_id: Some(result.id.clone()),
                        });
                    }
                }
            }
        }
    }
    wire
}

fn tool_choice_value(choice: &ToolChoice, supported: bool) -> Option<Value> {
    match choice {
        ToolChoice::Auto => None,
        ToolChoice::None => Some(json!("none")),
        // Without strict tool-choice support, required degrades to auto.
        // None and Name still go out as-is: "none" must keep forbidding
        // calls, and a forced name is at worst ignored by the server.
        ToolChoice::Required if !supported => None,
        ToolChoice::Required => Some(json!("required")),
        ToolChoice::Name(name) => Some(json!({
            "type": "function",
            "function": { "name": name },
        })),
    }
}

// --- stream format ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u64,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

/// Fold one parsed chunk into events. Usage is captured, not emitted; the
/// producer sends it once before `done`.
fn chunk_events(
    acc: &mut ToolCallAccumulator,
    chunk: Chunk,
    usage: &mut Option<Usage>,
) -> Vec<Event> {
    let mut events = Vec::new();

    if let Some(wire_usage) = chunk.usage {
        *usage = Some(Usage {
            input_tokens: wire_usage.prompt_tokens,
            output_tokens: wire_usage.completion_tokens,
            cached_input_tokens: wire_usage
                .prompt_tokens_details
                .map(|d| d.cached_tokens)
                .unwrap_or(0),
            cache_write_tokens: 0,
        });
    }

    for choice in chunk.choices {
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                events.push(Event::TextDelta { text });
            }
        }
        if let Some(reasoning) = choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                events.push(Event::ReasoningDelta {
                    text: reasoning,
                    item_id: None,
                    encrypted_content: None,
                });
            }
        }
        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                if let Some(id) = delta.id {
                    acc.set_id(delta.index, id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        acc.set_name(delta.index, name);
                    }
                    if let Some(arguments) = function.arguments {
                        acc.append(delta.index, &arguments);
                    }
                }
            }
        }
        if choice.finish_reason.is_some() {
            for call in acc.finish_all() {
                events.push(Event::ToolCall(call));
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCall, ToolResult};

    fn chunk_json(data: &str) -> Chunk {
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn test_wire_messages_basic_roles() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hello"),
            Message::assistant("hi"),
        ];
        let wire = to_wire_messages(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].content, Some(Value::String("hello".into())));
        assert_eq!(wire[2].role, "assistant");
    }

    #[test]
    fn test_wire_messages_tool_round_trip() {
        let messages = vec![
            Message::new(
                Role::Assistant,
                vec![Part::ToolCall(ToolCall::new(
                    "call_1",
                    "search",
                    r#"{"q":"zig"}"#,
                ))],
            ),
            Message::tool_result(ToolResult::new("call_1", "search", "results here")),
        ];

        let wire = to_wire_messages(&messages);
        assert_eq!(wire.len(), 2);
        let calls = wire[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0]["function"]["name"], "search");
        assert_eq!(calls[0]["function"]["arguments"], r#"{"q":"zig"}"#);
        assert_eq!(wire[1].role, "tool");
        assert_eq!(wire[1].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_wire_messages_stub_dangling_call() {
        let messages = vec![Message::new(
            Role::Assistant,
            vec![
                Part::text("let me check"),
                Part::ToolCall(ToolCall::new("orphan", "search", "{}")),
            ],
        )];

        let wire = to_wire_messages(&messages);
        assert_eq!(wire.len(), 1);
        assert!(wire[0].tool_calls.is_none());
        let content = wire[0].content.as_ref().unwrap().as_str().unwrap();
        assert!(content.contains("let me check"));
        assert!(content.contains("[tool call interrupted]"));
    }

    #[test]
    fn test_tool_choice_mapping() {
        assert!(tool_choice_value(&ToolChoice::Auto, true).is_none());
        assert_eq!(tool_choice_value(&ToolChoice::None, true), Some(json!("none")));
        assert_eq!(
            tool_choice_value(&ToolChoice::Required, true),
            Some(json!("required"))
        );
        let named = tool_choice_value(&ToolChoice::Name("grep".into()), true).unwrap();
        assert_eq!(named["function"]["name"], "grep");

        // Unsupported: only required degrades to auto. An explicit "none"
        // keeps forbidding calls, and a forced name still goes out.
        assert!(tool_choice_value(&ToolChoice::Required, false).is_none());
        assert_eq!(
            tool_choice_value(&ToolChoice::None, false),
            Some(json!("none"))
        );
        let named = tool_choice_value(&ToolChoice::Name("grep".into()), false).unwrap();
        assert_eq!(named["function"]["name"], "grep");
    }

    #[test]
    fn test_chunk_events_text_and_reasoning() {
        let mut acc = ToolCallAccumulator::new();
        let mut usage = None;
        let chunk = chunk_json(
            r#"{"choices":[{"delta":{"content":"Hello","reasoning_content":"thinking"},"finish_reason":null}]}"#,
        );

        let events = chunk_events(&mut acc, chunk, &mut usage);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::TextDelta { text } if text == "Hello"));
        assert!(matches!(&events[1], Event::ReasoningDelta { text, .. } if text == "thinking"));
    }

    #[test]
    fn test_chunk_events_fragmented_tool_call() {
        let mut acc = ToolCallAccumulator::new();
        let mut usage = None;

        let first = chunk_json(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_123","function":{"name":"get_weather","arguments":"{\"location\":"}}]},"finish_reason":null}]}"#,
        );
        assert!(chunk_events(&mut acc, first, &mut usage).is_empty());

        let second = chunk_json(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        );
        let events = chunk_events(&mut acc, second, &mut usage);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ToolCall(call) => {
                assert_eq!(call.id, "call_123");
                assert_eq!(call.name, "get_weather");
                assert_eq!(call.args_value().unwrap()["location"], "Paris");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_chunk_events_captures_usage() {
        let mut acc = ToolCallAccumulator::new();
        let mut usage = None;
        let chunk = chunk_json(
            r#"{"choices":[],"usage":{"prompt_tokens":100,"completion_tokens":20,"prompt_tokens_details":{"cached_tokens":60}}}"#,
        );

        assert!(chunk_events(&mut acc, chunk, &mut usage).is_empty());
        let usage = usage.unwrap();
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 20);
        assert_eq!(usage.cached_input_tokens, 60);
    }

    #[test]
    fn test_constructor_urls() {
        assert_eq!(OpenAiCompatProvider::ollama().base_url, "http://localhost:11434/v1");
        assert_eq!(OpenAiCompatProvider::lm_studio().base_url, "http://localhost:1234/v1");
        assert_eq!(OpenAiCompatProvider::xai("k").base_url, "https://api.x.ai/v1");
        assert_eq!(
            OpenAiCompatProvider::openrouter("k").base_url,
            "https://openrouter.ai/api/v1"
        );
        let zen = OpenAiCompatProvider::zen("k");
        assert_eq!(zen.name, "zen");
        assert_eq!(zen.credential(), "zen-api-key");
        assert_eq!(OpenAiCompatProvider::ollama().credential(), "local");
    }
}
