//! Debug tracing for event streams.
//!
//! When a request carries `debug`, [`trace_events`] mirrors every event to
//! a side channel with a timestamp relative to stream start. Raw SSE
//! frames are handled lower down (see [`crate::sse`]); this layer covers
//! the typed events the caller actually consumes.

use std::sync::Arc;
use std::time::Instant;

use crate::stream::EventStream;
use crate::types::Event;

/// Side channel for trace lines.
pub trait TraceSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Default sink: routes through the `log` facade.
pub struct LogTrace;

impl TraceSink for LogTrace {
    fn line(&self, line: &str) {
        log::debug!(target: "llm_conduit::trace", "{line}");
    }
}

/// In-memory sink, for tests.
#[derive(Default)]
pub struct MemoryTrace {
    lines: std::sync::Mutex<Vec<String>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl TraceSink for MemoryTrace {
    fn line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Mirror every event (and the terminal error, if any) to the sink.
pub fn trace_events(mut inner: EventStream, sink: Arc<dyn TraceSink>) -> EventStream {
    EventStream::spawn(move |tx| async move {
        let started = Instant::now();

        while let Some(item) = inner.recv().await {
            let elapsed_ms = started.elapsed().as_millis();
            match item {
                Ok(event) => {
                    sink.line(&format!("[{elapsed_ms:>6}ms] {}", describe(&event)));
                    if !tx.send(event).await {
                        return;
                    }
                }
                Err(e) => {
                    sink.line(&format!("[{elapsed_ms:>6}ms] error {e}"));
                    tx.fail(e).await;
                    return;
                }
            }
        }
    })
}

fn describe(event: &Event) -> String {
    match event {
        Event::TextDelta { text } => format!("text_delta {:?}", clip(text, 80)),
        Event::ReasoningDelta {
            text,
            item_id,
            encrypted_content,
        } => format!(
            "reasoning_delta item={} encrypted={} {:?}",
            item_id.as_deref().unwrap_or("-"),
            encrypted_content.is_some(),
            clip(text, 60)
        ),
        Event::ToolCall(call) => format!(
            "tool_call {} id={} args={:?}",
            call.name,
            call.id,
            clip(&call.arguments, 120)
        ),
        Event::ToolExecStart { id, name, info } => {
            format!("tool_exec_start {name} id={id} {info}")
        }
        Event::ToolExecEnd {
            id, name, success, ..
        } => format!("tool_exec_end {name} id={id} success={success}"),
        Event::Usage(usage) => format!(
            "usage in={} out={} cache_read={} cache_write={}",
            usage.input_tokens,
            usage.output_tokens,
            usage.cached_input_tokens,
            usage.cache_write_tokens
        ),
        Event::Phase(phase) => format!("phase {}", phase.as_str()),
        Event::Retry {
            attempt,
            max_attempts,
            wait,
        } => format!(
            "retry {attempt}/{max_attempts} wait={:.1}s",
            wait.as_secs_f64()
        ),
        Event::Done => "done".to_string(),
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}
