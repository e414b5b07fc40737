//! OpenAI Responses API adapter.
//!
//! The responses wire replaces the chat-completions message array with
//! typed input items (`message`, `function_call`, `function_call_output`,
//! `reasoning`) and streams item-granular events. Function-call arguments
//! arrive via `response.function_call_arguments.delta` keyed by item id;
//! reasoning summaries stream separately from the encrypted reasoning
//! payload, which is only present on the final `response.output_item.done`
//! and must be replayed on the next turn to continue the thought.
//!
//! The conversion and stream-folding helpers are `pub(crate)` because the
//! ChatGPT-backend adapter ([`crate::providers::codex`]) speaks the same
//! dialect behind different headers.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::accum::ToolCallAccumulator;
use crate::provider::{Provider, send_checked};
use crate::schema;
use crate::sse;
use crate::stream::{EventSender, EventStream};
use crate::types::{
    Capabilities, DanglingToolCalls, Event, Message, Part, Phase, Request, Role, ToolChoice,
    Usage, scrub_dangling_tool_calls,
};
use crate::Result;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Responses adapter.
pub struct OpenAiResponsesProvider {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiResponsesProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Provider for OpenAiResponsesProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn credential(&self) -> String {
        "openai-api-key".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_web_search: true,
            native_web_fetch: false,
            tool_calls: true,
            supports_tool_choice: true,
        }
    }

    async fn stream(&self, req: Request) -> Result<EventStream> {
        let body = build_body(&req, None);
        let url = format!("{}/responses", self.base_url);
        log::debug!("openai: POST {} model={}", url, req.model);

        let builder = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
        let response = send_checked(builder).await?;

        let debug_raw = req.debug_raw;
        Ok(EventStream::spawn(move |tx| async move {
            drive_stream(response, debug_raw, tx).await;
        }))
    }
}

/// Drain a responses-dialect SSE body into an event sender.
pub(crate) async fn drive_stream(response: reqwest::Response, debug_raw: bool, tx: EventSender) {
    let mut frames = sse::frames(response, debug_raw);
    let mut state = ResponsesState::default();

    use futures::StreamExt;
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                tx.fail(e).await;
                return;
            }
        };
        let Some(data) = sse::parse_frame::<Value>(&frame) else {
            continue;
        };
        for event in state.fold(&data) {
            if !tx.send(event).await {
                return;
            }
        }
        if let Some(message) = state.error.take() {
            tx.fail(crate::Error::stream(message)).await;
            return;
        }
    }

    for event in state.finish() {
        if !tx.send(event).await {
            return;
        }
    }
    tx.done().await;
}

/// Build a responses-dialect request body.
///
/// `instructions` is the Codex base prompt; plain OpenAI calls pass `None`.
pub(crate) fn build_body(req: &Request, instructions: Option<&str>) -> Value {
    let mut tools: Vec<Value> = req
        .tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "name": t.name,
                "description": t.description,
                "parameters": schema::openai_strict(&t.schema),
                "strict": true,
            })
        })
        .collect();
    if req.search && instructions.is_none() {
        tools.push(json!({ "type": "web_search_preview" }));
    }

    let mut body = json!({
        "model": req.model,
        "input": to_input_items(&req.messages),
        "stream": true,
        "store": false,
        "include": ["reasoning.encrypted_content"],
    });
    if let Some(instructions) = instructions {
        body["instructions"] = json!(instructions);
    }
    if !tools.is_empty() {
        body["tools"] = json!(tools);
        if let Some(choice) = tool_choice_value(&req.tool_choice) {
            body["tool_choice"] = choice;
        }
        if req.parallel_tool_calls {
            body["parallel_tool_calls"] = json!(true);
        }
    }
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(n) = req.max_output_tokens {
        body["max_output_tokens"] = json!(n);
    }
    if let Some(effort) = req.reasoning_effort {
        body["reasoning"] = json!({ "effort": effort.as_str(), "summary": "auto" });
    }
    body
}

fn tool_choice_value(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Auto => None,
        ToolChoice::None => Some(json!("none")),
        ToolChoice::Required => Some(json!("required")),
        ToolChoice::Name(name) => Some(json!({ "type": "function", "name": name })),
    }
}

/// Serialize neutral messages into responses input items.
///
/// Assistant text carrying reasoning metadata is emitted as a `reasoning`
/// item immediately before its `message` item so encrypted thoughts replay
/// in order; dangling tool calls are stubbed.
pub(crate) fn to_input_items(messages: &[Message]) -> Vec<Value> {
    let scrubbed = scrub_dangling_tool_calls(messages, DanglingToolCalls::Stub);
    let mut items: Vec<Value> = Vec::new();

    for message in &scrubbed {
        match message.role {
            Role::System | Role::User => {
                let role = if message.role == Role::System {
                    "system"
                } else {
                    "user"
                };
                let mut content: Vec<Value> = Vec::new();
                for part in &message.parts {
                    match part {
                        Part::Text(t) => {
                            content.push(json!({ "type": "input_text", "text": t.text }))
                        }
                        Part::Image(img) => content.push(json!({
                            "type": "input_image",
                            "image_url": img.data_uri(),
                        })),
                        _ => {}
                    }
                }
                if !content.is_empty() {
                    items.push(json!({ "type": "message", "role": role, "content": content }));
                }
            }
            Role::Assistant => {
                let mut text_content: Vec<Value> = Vec::new();
                for part in &message.parts {
                    match part {
                        Part::Text(t) => {
                            if let Some(reasoning) = &t.reasoning {
                                if let (Some(item_id), Some(encrypted)) =
                                    (&reasoning.item_id, &reasoning.encrypted_content)
                                {
                                    items.push(json!({
                                        "type": "reasoning",
                                        "id": item_id,
                                        "summary": [],
                                        "encrypted_content": encrypted,
                                    }));
                                }
                            }
                            if !t.text.is_empty() {
                                text_content
                                    .push(json!({ "type": "output_text", "text": t.text }));
                            }
                        }
                        Part::ToolCall(call) => {
                            if !text_content.is_empty() {
                                items.push(json!({
                                    "type": "message",
                                    "role": "assistant",
                                    "content": std::mem::take(&mut text_content),
                                }));
                            }
                            items.push(json!({
                                "type": "function_call",
                                "call_id": call.id,
                                "name": call.name,
                                "arguments": call.arguments,
                            }));
                        }
                        _ => {}
                    }
                }
                if !text_content.is_empty() {
                    items.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": text_content,
                    }));
                }
            }
            Role::Tool => {
                for part in &message.parts {
                    if let Part::ToolResult(result) = part {
                        let mut output = result.content.clone();
                        for seg in &result.content_parts {
                            if let crate::types::ToolResultPart::Text { text } = seg {
                                if !output.is_empty() {
                                    output.push('\n');
                                }
                                output.push_str(text);
                            }
                        }
                        items.push(json!({
                            "type": "function_call_output",
                            "call_id": result.id,
                            "output": output,
                        }));
                    }
                }
            }
        }
    }
    items
}

// --- stream folding --------------------------------------------------------

/// Per-stream state for the responses dialect.
#[derive(Default)]
pub(crate) struct ResponsesState {
    acc: ToolCallAccumulator,
    /// (title, url), deduplicated by url
    sources: Vec<(String, String)>,
    usage: Option<Usage>,
    pub(crate) error: Option<String>,
}

impl ResponsesState {
    /// Fold one SSE payload into events.
    pub(crate) fn fold(&mut self, data: &Value) -> Vec<Event> {
        let mut events = Vec::new();
        let kind = data["type"].as_str().unwrap_or_default();

        match kind {
            "response.output_text.delta" => {
                if let Some(text) = data["delta"].as_str() {
                    if !text.is_empty() {
                        events.push(Event::TextDelta { text: text.into() });
                    }
                }
            }
            "response.reasoning_summary_text.delta" => {
                if let Some(text) = data["delta"].as_str() {
                    events.push(Event::ReasoningDelta {
                        text: text.into(),
                        item_id: data["item_id"].as_str().map(String::from),
                        encrypted_content: None,
                    });
                }
            }
            "response.output_item.added" => {
                let item = &data["item"];
                match item["type"].as_str().unwrap_or_default() {
                    "function_call" => {
                        if let Some(item_id) = item["id"].as_str() {
                            self.acc.start(
                                item_id,
                                item["call_id"].as_str().map(String::from),
                                item["name"].as_str().map(String::from),
                            );
                        }
                    }
                    "web_search_call" => events.push(Event::Phase(Phase::Searching)),
                    _ => {}
                }
            }
            "response.function_call_arguments.delta" => {
                if let (Some(item_id), Some(delta)) =
                    (data["item_id"].as_str(), data["delta"].as_str())
                {
                    self.acc.append(item_id, delta);
                }
            }
            "response.output_item.done" => {
                let item = &data["item"];
                match item["type"].as_str().unwrap_or_default() {
                    "function_call" => {
                        if let Some(item_id) = item["id"].as_str() {
                            if let Some(call_id) = item["call_id"].as_str() {
                                self.acc.set_id(item_id, call_id);
                            }
                            if let Some(name) = item["name"].as_str() {
                                self.acc.set_name(item_id, name);
                            }
                            if let Some(mut call) = self.acc.finish(item_id) {
                                // The done item carries the full argument
                                // text; prefer it if nothing streamed.
                                if call.arguments.is_empty() {
                                    if let Some(args) = item["arguments"].as_str() {
                                        call.arguments = args.to_string();
                                    }
                                }
                                events.push(Event::ToolCall(call));
                            }
                        }
                    }
                    "reasoning" => {
                        if let Some(encrypted) = item["encrypted_content"].as_str() {
                            events.push(Event::ReasoningDelta {
                                text: String::new(),
                                item_id: item["id"].as_str().map(String::from),
                                encrypted_content: Some(encrypted.to_string()),
                            });
                        }
                    }
                    _ => {}
                }
            }
            "response.output_text.annotation.added" => {
                let annotation = &data["annotation"];
                if annotation["type"].as_str() == Some("url_citation") {
                    let url = annotation["url"].as_str().unwrap_or_default().to_string();
                    let title = annotation["title"].as_str().unwrap_or(&url).to_string();
                    if !url.is_empty() && !self.sources.iter().any(|(_, u)| *u == url) {
                        self.sources.push((title, url));
                    }
                }
            }
            "response.completed" => {
                let usage = &data["response"]["usage"];
                if !usage.is_null() {
                    self.usage = Some(Usage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
                        cached_input_tokens: usage["input_tokens_details"]["cached_tokens"]
                            .as_u64()
                            .unwrap_or(0),
                        cache_write_tokens: 0,
                    });
                }
            }
            "response.failed" | "error" => {
                let message = data["response"]["error"]["message"]
                    .as_str()
                    .or_else(|| data["message"].as_str())
                    .unwrap_or("provider reported failure");
                self.error = Some(message.to_string());
            }
            _ => {}
        }
        events
    }

    /// Trailing events once the SSE body ends: leftover calls, collected
    /// sources, captured usage.
    pub(crate) fn finish(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        for call in self.acc.finish_all() {
            events.push(Event::ToolCall(call));
        }
        if !self.sources.is_empty() {
            let mut text = String::from("\n\n");
            for (i, (title, url)) in self.sources.iter().enumerate() {
                text.push_str(&format!("[{}] {} ({})\n", i + 1, title, url));
            }
            events.push(Event::TextDelta { text });
        }
        if let Some(usage) = self.usage {
            events.push(Event::Usage(usage));
        }
        events
    }
}
