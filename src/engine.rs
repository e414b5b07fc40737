//! The engine: tool injection, the agentic loop, and event forwarding.
//!
//! [`Engine::stream`] decides between three shapes per request:
//!
//! 1. no tools in play — the request passes straight to the provider and
//!    events are forwarded verbatim;
//! 2. tools but native search (or none requested) — the bounded loop runs
//!    with the caller's tool list;
//! 3. search requested on a provider without native search (or forced) —
//!    the external `web_search`/`read_url` tools are injected and a
//!    pre-emptive search turn runs before the main loop.
//!
//! Inside the loop the engine drains each provider turn, executes
//! registered tool calls locally (sequentially, in provider order),
//! appends the assistant/tool messages to a private working copy of the
//! history, and re-invokes the provider until the model stops calling
//! tools or the turn budget runs out. Calls whose names are not in the
//! registry belong to the caller: the engine surfaces that whole turn as
//! `tool_call` events and ends the stream.

use std::sync::Arc;

use crate::provider::Provider;
use crate::search::{READ_URL_TOOL, ReadUrlTool, WEB_SEARCH_TOOL, WebSearchTool};
use crate::stream::{EventSender, EventStream};
use crate::tools::{Tool, ToolRegistry};
use crate::trace::{LogTrace, trace_events};
use crate::types::{
    Event, Message, Part, Phase, Request, Role, ToolCall, ToolChoice, ToolResult, ToolSpec,
};
use crate::{Error, Result};

/// System nudge appended before the final loop turn.
const LAST_TURN_NUDGE: &str =
    "You have reached the tool-call limit for this request. Answer now with the \
     information you already have instead of requesting more tools.";

/// Streaming engine over one provider and a tool registry.
pub struct Engine {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
}

impl Engine {
    /// Create an engine with the built-in search tools registered.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(WebSearchTool::new()));
        registry.register(Arc::new(ReadUrlTool::new()));
        Self { provider, registry }
    }

    /// Create an engine over a caller-owned registry. Nothing is
    /// auto-registered; external search needs `web_search`/`read_url`
    /// present to fire.
    pub fn with_registry(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Self {
        Self { provider, registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.registry.register(tool);
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Start a streaming call, agentic loop included when tools are in play.
    pub async fn stream(&self, req: Request) -> Result<EventStream> {
        let caps = self.provider.capabilities();

        // External tools injected when the provider can't search natively.
        let mut external: Vec<ToolSpec> = Vec::new();
        if req.search && (req.force_external_search || !caps.native_web_search) {
            for name in [WEB_SEARCH_TOOL, READ_URL_TOOL] {
                if req.tools.iter().any(|t| t.name == name) {
                    continue;
                }
                if let Some(tool) = self.registry.get(name) {
                    external.push(tool.spec());
                } else {
                    log::warn!("external search requested but {name} is not registered");
                }
            }
        }

        let debug = req.debug;
        let use_loop = !external.is_empty() || (!req.tools.is_empty() && caps.tool_calls);
        let stream = if use_loop {
            let provider = Arc::clone(&self.provider);
            let registry = Arc::clone(&self.registry);
            EventStream::spawn(move |tx| async move {
                run_loop(provider, registry, req, external, tx).await;
            })
        } else {
            self.provider.stream(req).await?
        };

        if debug {
            return Ok(trace_events(stream, Arc::new(LogTrace)));
        }
        Ok(stream)
    }
}

/// Outcome of one provider turn, from the loop's point of view.
enum TurnEnd {
    /// Consumer went away; stop silently
    ConsumerGone,
    /// Terminal failure already sent downstream
    Failed,
}

async fn run_loop(
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    req: Request,
    external: Vec<ToolSpec>,
    tx: EventSender,
) {
    let is_external_search = !external.is_empty();
    // Working copy; the caller's messages are never touched.
    let mut messages = req.messages.clone();

    let mut full_tools = req.tools.clone();
    for spec in &external {
        full_tools.push(spec.clone());
    }

    let mut choice = req.tool_choice.clone();
    let original_name_choice = match &choice {
        ToolChoice::Name(_) => Some(choice.clone()),
        _ => None,
    };
    let mut name_choice_cleared = false;
    let mut name_retry_used = false;

    // Pre-emptive search turn: search tools only, model picks freely.
    if is_external_search {
        let turn_req = turn_request(&req, &messages, external.clone(), ToolChoice::Auto, false);
        let calls = match run_turn(&provider, turn_req, &tx).await {
            Ok(calls) => calls,
            Err(_) => return,
        };
        if calls.is_empty() {
            // The model answered without searching.
            tx.done().await;
            return;
        }
        for call in &calls {
            if call.name != WEB_SEARCH_TOOL && call.name != READ_URL_TOOL {
                tx.fail(Error::stream(format!(
                    "unexpected tool call '{}' during search turn",
                    call.name
                )))
                .await;
                return;
            }
        }
        let Some(results) = execute_registered(&registry, &calls, &tx).await else {
            return;
        };
        append_round(&mut messages, &calls, results);
    }

    for attempt in 0..req.max_turns {
        if attempt + 1 == req.max_turns {
            messages.push(Message::system(LAST_TURN_NUDGE));
            if let Some(last) = &req.last_turn_tool_choice {
                choice = last.clone();
            }
        }

        let keep_native_search = req.search && !is_external_search;
        let turn_req = turn_request(
            &req,
            &messages,
            full_tools.clone(),
            choice.clone(),
            keep_native_search,
        );
        let calls = match run_turn(&provider, turn_req, &tx).await {
            Ok(calls) => calls,
            Err(_) => return,
        };

        if calls.is_empty() {
            // A forced tool choice that was cleared mid-loop gets one
            // chance to reassert itself before we accept the answer.
            if original_name_choice.is_some() && name_choice_cleared && !name_retry_used {
                name_retry_used = true;
                choice = original_name_choice.clone().unwrap();
                continue;
            }
            tx.done().await;
            return;
        }

        if matches!(choice, ToolChoice::Name(_)) {
            // Leaving the forced choice in place would loop forever.
            choice = ToolChoice::Auto;
            name_choice_cleared = true;
        }

        let registered: Vec<ToolCall> = calls
            .iter()
            .filter(|c| registry.contains(&c.name))
            .cloned()
            .collect();
        let has_unregistered = registered.len() != calls.len();

        if has_unregistered {
            // This turn belongs to the caller. Surface every call in
            // provider order, run what we can, and hand control back.
            for call in &calls {
                if !tx.tool_call(call.clone()).await {
                    return;
                }
            }
            if !registered.is_empty() {
                let Some(results) = execute_registered(&registry, &registered, &tx).await else {
                    return;
                };
                append_round(&mut messages, &registered, results);
            }
            tx.done().await;
            return;
        }

        let Some(results) = execute_registered(&registry, &calls, &tx).await else {
            return;
        };
        append_round(&mut messages, &calls, results);
    }

    tx.fail(Error::LoopExhausted(req.max_turns)).await;
}

/// Build the request for one provider turn.
fn turn_request(
    req: &Request,
    messages: &[Message],
    tools: Vec<ToolSpec>,
    choice: ToolChoice,
    search: bool,
) -> Request {
    let mut turn = req.clone();
    turn.messages = messages.to_vec();
    turn.tools = tools;
    turn.tool_choice = choice;
    turn.search = search;
    turn
}

/// Drain one provider call: forward everything except `tool_call` and
/// `done`, collect the calls.
async fn run_turn(
    provider: &Arc<dyn Provider>,
    req: Request,
    tx: &EventSender,
) -> std::result::Result<Vec<ToolCall>, TurnEnd> {
    let mut stream = match provider.stream(req).await {
        Ok(stream) => stream,
        Err(e) => {
            tx.fail(e).await;
            return Err(TurnEnd::Failed);
        }
    };

    let mut calls = Vec::new();
    while let Some(item) = stream.recv().await {
        match item {
            Ok(Event::ToolCall(call)) => calls.push(call),
            Ok(Event::Done) => break,
            Ok(event) => {
                if !tx.send(event).await {
                    return Err(TurnEnd::ConsumerGone);
                }
            }
            Err(e) => {
                tx.fail(e).await;
                return Err(TurnEnd::Failed);
            }
        }
    }
    Ok(calls)
}

/// Execute registered calls sequentially, in provider order, emitting
/// phase and exec events. Returns `None` when the consumer is gone.
async fn execute_registered(
    registry: &ToolRegistry,
    calls: &[ToolCall],
    tx: &EventSender,
) -> Option<Vec<ToolResult>> {
    let mut results = Vec::with_capacity(calls.len());

    for call in calls {
        let phase = match call.name.as_str() {
            WEB_SEARCH_TOOL => Some(Phase::Searching),
            READ_URL_TOOL => Some(Phase::Reading),
            _ => None,
        };
        if let Some(phase) = phase {
            if !tx.phase(phase).await {
                return None;
            }
        }

        // Registration was checked by the caller; a racing unregister
        // degrades to an error result rather than a crash.
        let tool = registry.get(&call.name);
        let info = tool
            .as_ref()
            .map(|t| t.preview(&call.arguments))
            .unwrap_or_default();

        if !tx
            .send(Event::ToolExecStart {
                id: call.id.clone(),
                name: call.name.clone(),
                info: info.clone(),
            })
            .await
        {
            return None;
        }

        let mut result = match tool {
            Some(tool) => match tool.execute(&call.arguments).await {
                Ok(output) => {
                    let mut r = ToolResult::new(&call.id, &call.name, output.content);
                    r.content_parts = output.content_parts;
                    r.is_error = output.is_error;
                    r
                }
                Err(e) => {
                    log::warn!("tool {} failed: {e:#}", call.name);
                    ToolResult::error(&call.id, &call.name, format!("{e:#}"))
                }
            },
            None => ToolResult::error(&call.id, &call.name, "tool is no longer registered"),
        };
        // Thinking-capable vendors need the signature back on the reply.
        result.thought_signature = call.thought_signature.clone();

        if !tx
            .send(Event::ToolExecEnd {
                id: call.id.clone(),
                name: call.name.clone(),
                info,
                success: !result.is_error,
            })
            .await
        {
            return None;
        }
        results.push(result);
    }
    Some(results)
}

/// Append one tool round: an assistant message aggregating the calls,
/// then the results as tool messages in call order.
fn append_round(messages: &mut Vec<Message>, calls: &[ToolCall], results: Vec<ToolResult>) {
    messages.push(Message::new(
        Role::Assistant,
        calls.iter().cloned().map(Part::ToolCall).collect(),
    ));
    for result in results {
        messages.push(Message::tool_result(result));
    }
}
