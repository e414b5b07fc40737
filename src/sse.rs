//! Shared Server-Sent-Events scanner.
//!
//! Every streaming endpoint in this crate speaks SSE: newline-delimited
//! `data: …` frames, optionally preceded by an `event: <name>` line, with
//! OpenAI-style streams terminated by a `data: [DONE]` sentinel. The raw
//! byte stream can split frames at arbitrary positions, so framing is
//! delegated to `eventsource-stream`; this module adds the `[DONE]`
//! handling, keep-alive filtering, raw-frame debug logging, and the
//! log-and-skip policy for malformed JSON payloads.

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

use crate::{Error, Result};

/// One parsed SSE frame: the event name (empty for plain `data:` streams)
/// and the payload text.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Boxed frame stream returned by [`frames`].
pub type SseFrames = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// Turn a streaming HTTP response into a stream of SSE frames.
///
/// - `data: [DONE]` ends the stream without yielding a frame
/// - empty-data keep-alives are dropped
/// - transport and framing failures surface as [`Error::Stream`]
/// - with `debug_raw`, every frame is logged under the
///   `llm_conduit::sse` target before the caller sees it
pub fn frames(response: reqwest::Response, debug_raw: bool) -> SseFrames {
    let stream = response
        .bytes_stream()
        .eventsource()
        .filter_map(move |item| async move {
            match item {
                Ok(event) => {
                    if debug_raw {
                        log::debug!(target: "llm_conduit::sse", "event={} data={}", event.event, event.data);
                    }
                    if event.data == "[DONE]" {
                        // Sentinel: picked up by take_while below.
                        return Some(Ok(SseFrame {
                            event: "__done".into(),
                            data: String::new(),
                        }));
                    }
                    if event.data.is_empty() {
                        return None;
                    }
                    Some(Ok(SseFrame {
                        event: event.event,
                        data: event.data,
                    }))
                }
                Err(e) => Some(Err(Error::stream(format!("SSE read failed: {e}")))),
            }
        })
        .take_while(|item| {
            let done = matches!(item, Ok(frame) if frame.event == "__done");
            futures::future::ready(!done)
        });

    Box::pin(stream)
}

/// Parse a frame payload, logging and skipping malformed JSON.
///
/// Protocol errors on individual frames are not terminal; providers keep
/// draining the stream and only fail if nothing was delivered at all.
pub fn parse_frame<T: serde::de::DeserializeOwned>(frame: &SseFrame) -> Option<T> {
    match serde_json::from_str(&frame.data) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::warn!(
                target: "llm_conduit::sse",
                "skipping malformed frame ({}): {}",
                e,
                truncate_for_log(&frame.data)
            );
            None
        }
    }
}

fn truncate_for_log(data: &str) -> &str {
    let max = 200.min(data.len());
    let mut end = max;
    while end > 0 && !data.is_char_boundary(end) {
        end -= 1;
    }
    &data[..end]
}
