//! Google Generative Language (Gemini) adapter.
//!
//! Gemini differs from the other families in three ways that matter here:
//! `functionCall` parts arrive whole rather than fragmented (but without
//! call ids, which are synthesized), thinking models attach
//! `thoughtSignature` blobs to function calls that MUST be sent back with
//! the matching reply, and search grounding arrives as
//! `groundingMetadata.groundingChunks` which are deduplicated and emitted
//! as trailing source lines after the answer text.
//!
//! Conversion and stream-folding helpers are `pub(crate)` because the Code
//! Assist adapter ([`crate::providers::code_assist`]) wraps the same
//! request/response shapes in a v1internal envelope.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::provider::{ModelInfo, Provider, send_checked};
use crate::schema;
use crate::sse;
use crate::stream::{EventSender, EventStream};
use crate::types::{
    Capabilities, DanglingToolCalls, Event, Message, Part, Request, Role, ToolChoice,
    ToolResultPart, Usage, merge_tool_messages, scrub_dangling_tool_calls,
};
use crate::Result;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API adapter.
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiProvider {
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
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn credential(&self) -> String {
        "gemini-api-key".to_string()
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
        let body = build_generate_body(&req);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, req.model
        );
        log::debug!("gemini: POST {} ", url);

        let builder = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let response = send_checked(builder).await?;

        let debug_raw = req.debug_raw;
        Ok(EventStream::spawn(move |tx| async move {
            drive_frames(response, debug_raw, tx, |data| data.clone()).await;
        }))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let listing: Value = send_checked(
            self.http.get(&url).header("x-goog-api-key", &self.api_key),
        )
        .await?
        .json()
        .await?;

        let models = listing["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| {
                        let id = m["name"].as_str()?;
                        Some(ModelInfo {
                            id: id.trim_start_matches("models/").to_string(),
                            display_name: m["displayName"].as_str().map(String::from),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

/// Drain a Gemini-dialect SSE body. `unwrap` projects each frame onto the
/// generate-content payload (Code Assist nests it under `response`).
pub(crate) async fn drive_frames<F>(
    response: reqwest::Response,
    debug_raw: bool,
    tx: EventSender,
    unwrap: F,
) where
    F: Fn(&Value) -> Value + Send + 'static,
{
    let mut frames = sse::frames(response, debug_raw);
    let mut state = GeminiState::default();

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
        for event in state.fold(&unwrap(&data)) {
            if !tx.send(event).await {
                return;
            }
        }
    }

    for event in state.finish() {
        if !tx.send(event).await {
            return;
        }
    }
    tx.done().await;
}

/// Build a generate-content request body from the neutral request.
pub(crate) fn build_generate_body(req: &Request) -> Value {
    let (system, contents) = to_contents(&req.messages);

    let mut body = json!({ "contents": contents });
    if let Some(system) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    let mut tools: Vec<Value> = Vec::new();
    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": schema::gemini(&t.schema),
                })
            })
            .collect();
        tools.push(json!({ "functionDeclarations": declarations }));
    }
    if req.search {
        tools.push(json!({ "googleSearch": {} }));
    }
    if !tools.is_empty() {
        body["tools"] = json!(tools);
    }
    if !req.tools.is_empty() {
        if let Some(config) = function_calling_config(&req.tool_choice) {
            body["toolConfig"] = json!({ "functionCallingConfig": config });
        }
    }

    let mut generation = serde_json::Map::new();
    if let Some(t) = req.temperature {
        generation.insert("temperature".into(), json!(t));
    }
    if let Some(p) = req.top_p {
        generation.insert("topP".into(), json!(p));
    }
    if let Some(n) = req.max_output_tokens {
        generation.insert("maxOutputTokens".into(), json!(n));
    }
    if req.reasoning_effort.is_some() {
        generation.insert("thinkingConfig".into(), json!({ "includeThoughts": true }));
    }
    if !generation.is_empty() {
        body["generationConfig"] = Value::Object(generation);
    }
    body
}

fn function_calling_config(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Auto => None,
        ToolChoice::None => Some(json!({ "mode": "NONE" })),
        ToolChoice::Required => Some(json!({ "mode": "ANY" })),
        ToolChoice::Name(name) => Some(json!({
            "mode": "ANY",
            "allowedFunctionNames": [name],
        })),
    }
}

/// Serialize neutral messages into Gemini `contents`.
///
/// System turns lift into `systemInstruction`, assistant turns become
/// `model` turns, tool results become `user` turns of `functionResponse`
/// parts (merged per batch), thought signatures replay on their function
/// calls, and dangling calls are dropped outright.
pub(crate) fn to_contents(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let scrubbed = scrub_dangling_tool_calls(messages, DanglingToolCalls::Drop);
    let merged = merge_tool_messages(&scrubbed);

    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in &merged {
        match message.role {
            Role::System => system_parts.push(message.text()),
            Role::User | Role::Assistant => {
                let mut parts: Vec<Value> = Vec::new();
                for part in &message.parts {
                    match part {
                        Part::Text(t) => {
                            if !t.text.is_empty() {
                                parts.push(json!({ "text": t.text }));
                            }
                        }
                        Part::Image(img) => parts.push(json!({
                            "inlineData": { "mimeType": img.media_type, "data": img.data },
                        })),
                        Part::ToolCall(call) => {
                            let args = call.args_value().unwrap_or_else(|_| json!({}));
                            let mut p = json!({
                                "functionCall": { "name": call.name, "args": args },
                            });
                            if let Some(signature) = &call.thought_signature {
                                p["thoughtSignature"] = json!(signature);
                            }
                            parts.push(p);
                        }
                        Part::ToolResult(_) => {}
                    }
                }
                if !parts.is_empty() {
                    let role = if message.role == Role::User {
                        "user"
                    } else {
                        "model"
                    };
                    contents.push(json!({ "role": role, "parts": parts }));
                }
            }
            Role::Tool => {
                let parts: Vec<Value> = message
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::ToolResult(result) => {
                            let mut output = result.content.clone();
                            for seg in &result.content_parts {
                                if let ToolResultPart::Text { text } = seg {
                                    if !output.is_empty() {
                                        output.push('\n');
                                    }
                                    output.push_str(text);
                                }
                            }
                            let mut response = json!({ "output": output });
                            if result.is_error {
                                response = json!({ "error": output });
                            }
                            let mut part = json!({
                                "functionResponse": {
                                    "name": result.name,
                                    "response": response,
                                },
                            });
                            if let Some(signature) = &result.thought_signature {
                                part["thoughtSignature"] = json!(signature);
                            }
                            Some(part)
                        }
                        _ => None,
                    })
                    .collect();
                if !parts.is_empty() {
                    contents.push(json!({ "role": "user", "parts": parts }));
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, contents)
}

// --- stream folding --------------------------------------------------------

/// Per-stream state for the Gemini dialect.
#[derive(Default)]
pub(crate) struct GeminiState {
    /// Ordinal for synthesized call ids; Gemini has none of its own
    call_ordinal: u64,
    /// (title, uri), deduplicated by uri
    sources: Vec<(String, String)>,
    usage: Option<Usage>,
}

impl GeminiState {
    /// Fold one generate-content frame into events.
    pub(crate) fn fold(&mut self, data: &Value) -> Vec<Event> {
        let mut events = Vec::new();

        if let Some(usage) = data.get("usageMetadata") {
            let input = usage["promptTokenCount"].as_u64().unwrap_or(0);
            let output = usage["candidatesTokenCount"].as_u64().unwrap_or(0)
                + usage["thoughtsTokenCount"].as_u64().unwrap_or(0);
            if input + output > 0 {
                self.usage = Some(Usage {
                    input_tokens: input,
                    output_tokens: output,
                    cached_input_tokens: usage["cachedContentTokenCount"].as_u64().unwrap_or(0),
                    cache_write_tokens: 0,
                });
            }
        }

        let Some(candidate) = data["candidates"].as_array().and_then(|c| c.first()) else {
            return events;
        };

        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if part["thought"].as_bool().unwrap_or(false) {
                        events.push(Event::ReasoningDelta {
                            text: text.to_string(),
                            item_id: None,
                            encrypted_content: None,
                        });
                    } else if !text.is_empty() {
                        events.push(Event::TextDelta {
                            text: text.to_string(),
                        });
                    }
                }
                if let Some(function_call) = part.get("functionCall") {
                    let name = function_call["name"].as_str().unwrap_or_default();
                    if name.is_empty() {
                        continue;
                    }
                    let args = function_call
                        .get("args")
                        .cloned()
                        .unwrap_or_else(|| json!({}));
                    let mut call = crate::types::ToolCall::new(
                        format!("toolcall-{}", self.call_ordinal),
                        name,
                        args.to_string(),
                    );
                    self.call_ordinal += 1;
                    call.thought_signature =
                        part["thoughtSignature"].as_str().map(String::from);
                    events.push(Event::ToolCall(call));
                }
            }
        }

        if let Some(chunks) = candidate["groundingMetadata"]["groundingChunks"].as_array() {
            for chunk in chunks {
                let web = &chunk["web"];
                let uri = web["uri"].as_str().unwrap_or_default().to_string();
                let title = web["title"].as_str().unwrap_or(&uri).to_string();
                if !uri.is_empty() && !self.sources.iter().any(|(_, u)| *u == uri) {
                    self.sources.push((title, uri));
                }
            }
        }
        events
    }

    /// Trailing events once the SSE body ends.
    pub(crate) fn finish(self) -> Vec<Event> {
        let mut events = Vec::new();
        if !self.sources.is_empty() {
            let mut text = String::from("\n\n");
            for (i, (title, uri)) in self.sources.iter().enumerate() {
                text.push_str(&format!("[{}] {} ({})\n", i + 1, title, uri));
            }
            events.push(Event::TextDelta { text });
        }
        if let Some(usage) = self.usage {
            events.push(Event::Usage(usage));
        }
        events
    }
}
