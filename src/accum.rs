//! Reassembly of streamed tool-call fragments.
//!
//! Tool calls never arrive whole. Chat-completions streams fragment them
//! across `delta.tool_calls[].index` entries, Anthropic across
//! `input_json_delta` frames keyed by block index, and the responses
//! family across `function_call_arguments.delta` frames keyed by item id.
//! A single response can interleave fragments of several calls:
//!
//! ```text
//! start  index=0  id="call_1" name="search"
//! start  index=1  id="call_2" name="edit"
//! append index=0  "{\"q\""
//! append index=1  "{\"file"
//! append index=0  ":\"rust\"}"
//! append index=1  "\":\"x\"}"
//! finish index=0, finish index=1
//! ```
//!
//! The accumulator keeps one buffer per key and only produces a
//! [`ToolCall`] once its block is finished, so consumers never observe a
//! call with partially assembled arguments.

use std::collections::HashMap;

use crate::types::ToolCall;

/// Key for an in-flight tool-call block: a numeric block index
/// (chat-completions, Anthropic) or a string item id (responses family).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKey {
    Index(u64),
    Item(String),
}

impl From<u64> for BlockKey {
    fn from(index: u64) -> Self {
        BlockKey::Index(index)
    }
}

impl From<&str> for BlockKey {
    fn from(item_id: &str) -> Self {
        BlockKey::Item(item_id.to_string())
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    thought_signature: Option<String>,
}

/// Per-stream accumulator turning fragments into whole [`ToolCall`]s.
///
/// Constructed inside a producer task; never shared between streams.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    blocks: HashMap<BlockKey, PartialToolCall>,
    order: Vec<BlockKey>,
    /// Ordinal used to synthesize ids for vendors that omit them
    synthesized: u64,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a block. Id and name may arrive later for some vendors.
    pub fn start(&mut self, key: impl Into<BlockKey>, id: Option<String>, name: Option<String>) {
        let key = key.into();
        let entry = self.blocks.entry(key.clone()).or_default();
        if id.is_some() {
            entry.id = id;
        }
        if name.is_some() {
            entry.name = name;
        }
        if !self.order.contains(&key) {
            self.order.push(key);
        }
    }

    /// Append a JSON-argument fragment. Opens the block if needed, since
    /// some vendors send the first fragment without a preceding start.
    pub fn append(&mut self, key: impl Into<BlockKey>, fragment: &str) {
        let key = key.into();
        if !self.blocks.contains_key(&key) {
            self.start(key.clone(), None, None);
        }
        if let Some(entry) = self.blocks.get_mut(&key) {
            entry.arguments.push_str(fragment);
        }
    }

    /// Record the call id for a block
    pub fn set_id(&mut self, key: impl Into<BlockKey>, id: impl Into<String>) {
        let key = key.into();
        if !self.blocks.contains_key(&key) {
            self.start(key.clone(), None, None);
        }
        if let Some(entry) = self.blocks.get_mut(&key) {
            entry.id = Some(id.into());
        }
    }

    /// Record the tool name for a block
    pub fn set_name(&mut self, key: impl Into<BlockKey>, name: impl Into<String>) {
        let key = key.into();
        if !self.blocks.contains_key(&key) {
            self.start(key.clone(), None, None);
        }
        if let Some(entry) = self.blocks.get_mut(&key) {
            entry.name = Some(name.into());
        }
    }

    /// Record a thought signature for a block
    pub fn set_signature(&mut self, key: impl Into<BlockKey>, signature: impl Into<String>) {
        let key = key.into();
        if !self.blocks.contains_key(&key) {
            self.start(key.clone(), None, None);
        }
        if let Some(entry) = self.blocks.get_mut(&key) {
            entry.thought_signature = Some(signature.into());
        }
    }

    /// Whether a block with this key is currently open
    pub fn contains(&self, key: impl Into<BlockKey>) -> bool {
        self.blocks.contains_key(&key.into())
    }

    /// Close a block and produce its call.
    ///
    /// Returns `None` for unknown keys and for blocks that never received a
    /// name (nothing useful can be dispatched). A missing id is synthesized
    /// as `toolcall-{i}` so downstream correlation always has something to
    /// hold onto.
    pub fn finish(&mut self, key: impl Into<BlockKey>) -> Option<ToolCall> {
        let key = key.into();
        let partial = self.blocks.remove(&key)?;
        self.order.retain(|k| *k != key);

        let name = match partial.name {
            Some(name) if !name.is_empty() => name,
            _ => {
                log::warn!("discarding tool-call block with no name");
                return None;
            }
        };
        let id = match partial.id {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = format!("toolcall-{}", self.synthesized);
                self.synthesized += 1;
                id
            }
        };

        let mut call = ToolCall::new(id, name, partial.arguments);
        call.thought_signature = partial.thought_signature;
        Some(call)
    }

    /// Close every open block, in the order the blocks were started.
    pub fn finish_all(&mut self) -> Vec<ToolCall> {
        let keys: Vec<BlockKey> = self.order.clone();
        keys.into_iter().filter_map(|k| self.finish(k)).collect()
    }

    /// True if no blocks are open
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_assembly_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(0u64, Some("tool-1".into()), Some("edit".into()));
        acc.append(0u64, r#"{"file_path":"main.go","old_string":"foo""#);
        acc.append(0u64, r#","new_string":"bar"}"#);

        let call = acc.finish(0u64).unwrap();
        assert_eq!(call.id, "tool-1");
        assert_eq!(call.name, "edit");
        let args = call.args_value().unwrap();
        assert_eq!(args["file_path"], "main.go");
        assert_eq!(args["old_string"], "foo");
        assert_eq!(args["new_string"], "bar");
    }

    #[test]
    fn test_interleaved_blocks() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(0u64, Some("call_1".into()), Some("search".into()));
        acc.start(1u64, Some("call_2".into()), Some("calculate".into()));
        acc.append(0u64, r#"{"q""#);
        acc.append(1u64, r#"{"expr""#);
        acc.append(0u64, r#":"rust"}"#);
        acc.append(1u64, r#":"2+2"}"#);

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].args_value().unwrap()["q"], "rust");
        assert_eq!(calls[1].name, "calculate");
        assert_eq!(calls[1].args_value().unwrap()["expr"], "2+2");
    }

    #[test]
    fn test_item_keyed_blocks() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("item_abc", Some("call_9".into()), None);
        acc.set_name("item_abc", "get_weather");
        acc.append("item_abc", r#"{"location":"Paris"}"#);

        let call = acc.finish("item_abc").unwrap();
        assert_eq!(call.id, "call_9");
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.args_value().unwrap()["location"], "Paris");
    }

    #[test]
    fn test_missing_id_is_synthesized() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(0u64, None, Some("first".into()));
        acc.start(1u64, None, Some("second".into()));

        let calls = acc.finish_all();
        assert_eq!(calls[0].id, "toolcall-0");
        assert_eq!(calls[1].id, "toolcall-1");
    }

    #[test]
    fn test_missing_name_is_discarded() {
        let mut acc = ToolCallAccumulator::new();
        acc.append(3u64, r#"{"orphan":true}"#);
        assert!(acc.finish(3u64).is_none());
    }

    #[test]
    fn test_finish_unknown_key() {
        let mut acc = ToolCallAccumulator::new();
        assert!(acc.finish(7u64).is_none());
    }

    #[test]
    fn test_empty_arguments_parse_as_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(0u64, Some("id".into()), Some("noop".into()));
        let call = acc.finish(0u64).unwrap();
        assert_eq!(call.args_value().unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_thought_signature_carried() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(0u64, None, Some("plan".into()));
        acc.set_signature(0u64, "sig-bytes");
        let call = acc.finish(0u64).unwrap();
        assert_eq!(call.thought_signature.as_deref(), Some("sig-bytes"));
    }

    #[test]
    fn test_finish_all_preserves_start_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("b", None, Some("second".into()));
        // Appending to a new key also opens it, after "b".
        acc.append("c", "{}");
        acc.set_name("c", "third");
        acc.start(0u64, None, Some("first-by-key-not-order".into()));

        let names: Vec<String> = acc.finish_all().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["second", "third", "first-by-key-not-order"]);
    }
}
