//! Context management utilities for manual history management
//!
//! Low-level helpers for keeping a conversation inside a model's context
//! window. Nothing here is automatic: the engine never truncates on its
//! own, callers decide when and how.

use crate::types::{Message, Part, Role};

/// Estimate token count for a message list
///
/// Character-based approximation (1 token ≈ 4 characters), counting tool
/// call and result payloads. Accuracy varies by tokenizer; keep a 10-20%
/// safety margin when checking limits.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;

    for message in messages {
        // Role framing overhead
        total_chars += 8;

        for part in &message.parts {
            match part {
                Part::Text(t) => {
                    total_chars += t.text.len();
                    if let Some(reasoning) = &t.reasoning {
                        total_chars += reasoning.content.as_deref().map_or(0, str::len);
                    }
                }
                Part::Image(img) => {
                    // Images bill as a flat block, not by byte size
                    total_chars += 4096;
                    total_chars += img.media_type.len();
                }
                Part::ToolCall(call) => {
                    total_chars += call.id.len() + call.name.len() + call.arguments.len();
                }
                Part::ToolResult(result) => {
                    total_chars += result.id.len() + result.content.len();
                    for diff in &result.diffs {
                        total_chars += diff.len();
                    }
                }
            }
        }
    }

    total_chars += 16;

    (total_chars + 3) / 4
}

/// Truncate message history, keeping recent messages
///
/// Preserves the system prompt when asked, and never strands a tool-result
/// message from its assistant tool-call turn: if the cut would land between
/// an assistant tool call and its results, the cut moves forward past the
/// tool messages instead.
///
/// Returns a new list; the input is unchanged.
pub fn truncate_messages(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }
    if messages.len() <= keep {
        return messages.to_vec();
    }

    let has_system = preserve_system && messages[0].role == Role::System;
    let body = if has_system { &messages[1..] } else { messages };

    let mut start = body.len().saturating_sub(keep);
    // A tool message at the cut point answers a call we just dropped.
    while start < body.len() && body[start].role == Role::Tool {
        start += 1;
    }

    let mut result = Vec::with_capacity(keep + 1);
    if has_system {
        result.push(messages[0].clone());
    }
    result.extend_from_slice(&body[start..]);
    result
}

/// Check if history is approaching a token limit
///
/// Convenience wrapper combining estimation with a threshold check;
/// `margin` is a fraction of the limit (0.9 = warn at 90%).
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}
