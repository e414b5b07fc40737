//! Shared test doubles: scripted and failing providers, canned tools.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use llm_conduit::{
    Capabilities, Error, EventStream, Provider, Request, Result, Tool, ToolCall, ToolOutput,
    ToolSpec, Usage,
};

/// One scripted provider turn.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub text: Option<String>,
    pub calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl Turn {
    pub fn text(text: &str) -> Self {
        Turn {
            text: Some(text.to_string()),
            ..Turn::default()
        }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Turn {
            calls,
            ..Turn::default()
        }
    }

    pub fn with_usage(mut self, input: u64, output: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens: input,
            output_tokens: output,
            ..Usage::default()
        });
        self
    }
}

/// Provider that replays a script, recording every request it receives.
pub struct MockProvider {
    turns: Mutex<VecDeque<Turn>>,
    /// When the script runs dry, keep replaying this turn (for loop tests)
    repeat: Option<Turn>,
    caps: Capabilities,
    pub requests: Mutex<Vec<Request>>,
}

impl MockProvider {
    pub fn scripted(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            caps: Capabilities {
                native_web_search: false,
                native_web_fetch: false,
                tool_calls: true,
                supports_tool_choice: true,
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replay the same turn forever.
    pub fn looping(turn: Turn) -> Self {
        let mut p = Self::scripted(Vec::new());
        p.repeat = Some(turn);
        p
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, i: usize) -> Request {
        self.requests.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn credential(&self) -> String {
        "mock-credential".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn stream(&self, req: Request) -> Result<EventStream> {
        self.requests.lock().unwrap().push(req);

        let turn = {
            let mut turns = self.turns.lock().unwrap();
            turns
                .pop_front()
                .or_else(|| self.repeat.clone())
                .unwrap_or_default()
        };

        Ok(EventStream::spawn(move |tx| async move {
            if let Some(text) = turn.text {
                tx.text(text).await;
            }
            for call in turn.calls {
                tx.tool_call(call).await;
            }
            if let Some(usage) = turn.usage {
                tx.usage(usage).await;
            }
            tx.done().await;
        }))
    }
}

/// Provider that fails at stream creation N times, then delegates.
pub struct FlakyProvider {
    failures: AtomicU32,
    error_factory: Box<dyn Fn() -> Error + Send + Sync>,
    inner: MockProvider,
}

impl FlakyProvider {
    pub fn new<F>(failures: u32, error_factory: F, inner: MockProvider) -> Self
    where
        F: Fn() -> Error + Send + Sync + 'static,
    {
        Self {
            failures: AtomicU32::new(failures),
            error_factory: Box::new(error_factory),
            inner,
        }
    }

    pub fn attempts(&self) -> usize {
        self.inner.request_count()
    }
}

#[async_trait]
impl Provider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    fn credential(&self) -> String {
        "flaky-credential".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn stream(&self, req: Request) -> Result<EventStream> {
        // Count every attempt, including the failing ones.
        self.inner.requests.lock().unwrap().push(req.clone());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err((self.error_factory)());
        }
        // Don't double-count the delegated call.
        self.inner.requests.lock().unwrap().pop();
        self.inner.stream(req).await
    }
}

/// Provider whose stream emits some text and then dies mid-flight N times.
pub struct MidStreamFailProvider {
    failures: AtomicU32,
}

impl MidStreamFailProvider {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Provider for MidStreamFailProvider {
    fn name(&self) -> &str {
        "midfail"
    }

    fn credential(&self) -> String {
        "midfail-credential".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn stream(&self, _req: Request) -> Result<EventStream> {
        let remaining = self.failures.load(Ordering::SeqCst);
        let fail = remaining > 0;
        if fail {
            self.failures.store(remaining - 1, Ordering::SeqCst);
        }
        Ok(EventStream::spawn(move |tx| async move {
            tx.text("partial ").await;
            if fail {
                tx.fail(Error::stream("connection reset by peer")).await;
            } else {
                tx.text("complete").await;
                tx.done().await;
            }
        }))
    }
}

/// Registered tool returning a fixed string.
pub struct CannedTool {
    name: String,
    output: String,
    pub invocations: Arc<Mutex<Vec<String>>>,
}

impl CannedTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Tool for CannedTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            self.name.clone(),
            format!("Canned test tool {}", self.name),
            serde_json::json!({
                "type": "object",
                "properties": { "arg": { "type": "string" } },
            }),
        )
    }

    async fn execute(&self, args: &str) -> anyhow::Result<ToolOutput> {
        self.invocations.lock().unwrap().push(args.to_string());
        Ok(ToolOutput::text(self.output.clone()))
    }
}

/// Tool that always fails.
pub struct ExplodingTool;

#[async_trait]
impl Tool for ExplodingTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "exploding_tool",
            "Always fails",
            serde_json::json!({ "type": "object", "properties": {} }),
        )
    }

    async fn execute(&self, _args: &str) -> anyhow::Result<ToolOutput> {
        anyhow::bail!("kaboom")
    }
}
