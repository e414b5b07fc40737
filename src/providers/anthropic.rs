//! Anthropic Messages API adapter (native streaming, plus beta headers).
//!
//! Tool-use blocks stream their `input` as JSON fragments via
//! `input_json_delta`, keyed by block index; thinking blocks stream
//! `thinking_delta` text plus a `signature_delta` blob that is surfaced as
//! encrypted reasoning content when the block closes. Input-side usage
//! arrives on `message_start`, output-side on the terminal `message_delta`.
//!
//! [`AnthropicProvider::with_web_search`] turns on the server-side
//! `web_search_20250305` tool and flips `native_web_search`, which keeps
//! the engine from injecting the external fallback.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::accum::ToolCallAccumulator;
use crate::provider::{Provider, send_checked};
use crate::sse;
use crate::stream::EventStream;
use crate::types::{
    Capabilities, DanglingToolCalls, Event, Message, Part, ReasoningEffort, Request, Role,
    ToolChoice, ToolResultPart, Usage, merge_tool_messages, scrub_dangling_tool_calls,
};
use crate::Result;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

/// Anthropic Messages adapter.
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    betas: Vec<String>,
    web_search_max_uses: Option<u32>,
    http: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            betas: Vec::new(),
            web_search_max_uses: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Opt into beta features via the `anthropic-beta` header.
    pub fn with_beta(mut self, betas: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.betas = betas.into_iter().map(Into::into).collect();
        self
    }

    /// Enable the server-side web search tool.
    pub fn with_web_search(mut self, max_uses: u32) -> Self {
        self.web_search_max_uses = Some(max_uses);
        self
    }

    fn build_body(&self, req: &Request) -> Value {
        let (system, messages) = to_wire_messages(&req.messages);

        let mut tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.schema,
                })
            })
            .collect();
        if req.search {
            if let Some(max_uses) = self.web_search_max_uses {
                tools.push(json!({
                    "type": WEB_SEARCH_TOOL_TYPE,
                    "name": "web_search",
                    "max_uses": max_uses,
                }));
            }
        }

        let thinking_budget = req.reasoning_effort.map(thinking_budget_tokens);
        let mut max_tokens = req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if let Some(budget) = thinking_budget {
            // Thinking budget must fit inside max_tokens.
            max_tokens = max_tokens.max(budget + 1024);
        }

        let mut body = json!({
            "model": req.model,
            "max_tokens": max_tokens,
            "messages": messages,
            "stream": true,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            if let Some(choice) = tool_choice_value(&req.tool_choice) {
                body["tool_choice"] = choice;
            }
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = req.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(budget) = thinking_budget {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn credential(&self) -> String {
        "anthropic-api-key".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_web_search: self.web_search_max_uses.is_some(),
            native_web_fetch: false,
            tool_calls: true,
            supports_tool_choice: true,
        }
    }

    async fn stream(&self, req: Request) -> Result<EventStream> {
        let body = self.build_body(&req);
        let url = format!("{}/v1/messages", self.base_url);
        log::debug!("anthropic: POST {} model={}", url, req.model);

        let mut builder = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        if !self.betas.is_empty() {
            builder = builder.header("anthropic-beta", self.betas.join(","));
        }
        let response = send_checked(builder).await?;

        let debug_raw = req.debug_raw;
        Ok(EventStream::spawn(move |tx| async move {
            let mut frames = sse::frames(response, debug_raw);
            let mut state = StreamState::default();

            use futures::StreamExt;
            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        tx.fail(e).await;
                        return;
                    }
                };
                let Some(wire) = sse::parse_frame::<WireEvent>(&frame) else {
                    continue;
                };
                if let WireEvent::Error { error } = &wire {
                    let message = error["message"].as_str().unwrap_or("provider error");
                    tx.fail(crate::Error::stream(format!("anthropic: {message}")))
                        .await;
                    return;
                }
                for event in state.fold(wire) {
                    if !tx.send(event).await {
                        return;
                    }
                }
            }

            for call in state.acc.finish_all() {
                if !tx.tool_call(call).await {
                    return;
                }
            }
            if !state.usage.is_empty() {
                if !tx.usage(state.usage).await {
                    return;
                }
            }
            tx.done().await;
        }))
    }
}

fn thinking_budget_tokens(effort: ReasoningEffort) -> u32 {
    match effort {
        ReasoningEffort::Low => 2048,
        ReasoningEffort::Medium => 8192,
        ReasoningEffort::High => 16384,
        ReasoningEffort::XHigh => 32768,
    }
}

fn tool_choice_value(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Auto => None,
        ToolChoice::None => Some(json!({ "type": "none" })),
        ToolChoice::Required => Some(json!({ "type": "any" })),
        ToolChoice::Name(name) => Some(json!({ "type": "tool", "name": name })),
    }
}

/// Serialize neutral messages into Anthropic shape.
///
/// System turns are lifted into the top-level `system` string; tool
/// messages become user turns carrying `tool_result` blocks, with
/// consecutive tool messages merged into one batch; dangling calls are
/// stubbed to text.
fn to_wire_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let scrubbed = scrub_dangling_tool_calls(messages, DanglingToolCalls::Stub);
    let merged = merge_tool_messages(&scrubbed);

    let mut system_parts: Vec<String> = Vec::new();
    let mut wire: Vec<Value> = Vec::new();

    for message in &merged {
        match message.role {
            Role::System => system_parts.push(message.text()),
            Role::User | Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                for part in &message.parts {
                    match part {
                        Part::Text(t) => {
                            if !t.text.is_empty() {
                                blocks.push(json!({ "type": "text", "text": t.text }));
                            }
                        }
                        Part::Image(img) => blocks.push(json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": img.media_type,
                                "data": img.data,
                            },
                        })),
                        Part::ToolCall(call) => {
                            let input = call.args_value().unwrap_or_else(|_| json!({}));
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": input,
                            }));
                        }
                        Part::ToolResult(_) => {}
                    }
                }
                if !blocks.is_empty() {
                    let role = if message.role == Role::User {
                        "user"
                    } else {
                        "assistant"
                    };
                    wire.push(json!({ "role": role, "content": blocks }));
                }
            }
            Role::Tool => {
                let blocks: Vec<Value> = message
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::ToolResult(result) => Some(tool_result_block(result)),
                        _ => None,
                    })
                    .collect();
                if !blocks.is_empty() {
                    wire.push(json!({ "role": "user", "content": blocks }));
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, wire)
}

fn tool_result_block(result: &crate::types::ToolResult) -> Value {
    let mut content: Vec<Value> = Vec::new();
    if !result.content.is_empty() {
        content.push(json!({ "type": "text", "text": result.content }));
    }
    for part in &result.content_parts {
        match part {
            ToolResultPart::Text { text } => {
                content.push(json!({ "type": "text", "text": text }))
            }
            ToolResultPart::Image { media_type, data } => content.push(json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data },
            })),
        }
    }
    if content.is_empty() {
        content.push(json!({ "type": "text", "text": "" }));
    }
    json!({
        "type": "tool_result",
        "tool_use_id": result.id,
        "content": content,
        "is_error": result.is_error,
    })
}

// --- stream format ---------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: u64,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        index: u64,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u64,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: Option<StartUsage>,
}

#[derive(Debug, Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    #[serde(rename = "type")]
    kind: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Default)]
struct StreamState {
    acc: ToolCallAccumulator,
    /// Indexes of open tool_use blocks
    tool_blocks: std::collections::HashSet<u64>,
    /// Signatures accumulated per open thinking block
    thinking_signatures: HashMap<u64, String>,
    usage: Usage,
}

impl StreamState {
    fn fold(&mut self, wire: WireEvent) -> Vec<Event> {
        let mut events = Vec::new();
        match wire {
            WireEvent::MessageStart { message } => {
                if let Some(u) = message.usage {
                    self.usage.input_tokens = u.input_tokens;
                    self.usage.cached_input_tokens = u.cache_read_input_tokens;
                    self.usage.cache_write_tokens = u.cache_creation_input_tokens;
                }
            }
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block.kind.as_str() {
                "tool_use" => {
                    self.tool_blocks.insert(index);
                    self.acc.start(index, content_block.id, content_block.name);
                }
                "thinking" => {
                    self.thinking_signatures.insert(index, String::new());
                }
                _ => {}
            },
            WireEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        events.push(Event::TextDelta { text });
                    }
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    self.acc.append(index, &partial_json);
                }
                BlockDelta::ThinkingDelta { thinking } => {
                    if !thinking.is_empty() {
                        events.push(Event::ReasoningDelta {
                            text: thinking,
                            item_id: Some(index.to_string()),
                            encrypted_content: None,
                        });
                    }
                }
                BlockDelta::SignatureDelta { signature } => {
                    self.thinking_signatures
                        .entry(index)
                        .or_default()
                        .push_str(&signature);
                }
                BlockDelta::Unknown => {}
            },
            WireEvent::ContentBlockStop { index } => {
                if self.tool_blocks.remove(&index) {
                    if let Some(call) = self.acc.finish(index) {
                        events.push(Event::ToolCall(call));
                    }
                } else if let Some(signature) = self.thinking_signatures.remove(&index) {
                    if !signature.is_empty() {
                        events.push(Event::ReasoningDelta {
                            text: String::new(),
                            item_id: Some(index.to_string()),
                            encrypted_content: Some(signature),
                        });
                    }
                }
            }
            WireEvent::MessageDelta { usage } => {
                if let Some(u) = usage {
                    self.usage.output_tokens = u.output_tokens;
                }
            }
            WireEvent::MessageStop | WireEvent::Ping | WireEvent::Unknown => {}
            WireEvent::Error { .. } => {}
        }
        events
    }
}
