//! Tool contract and registry.
//!
//! A [`Tool`] is the seam between the engine and anything executable: the
//! engine only ever sees a spec, an async `execute`, and a preview string.
//! Concrete tools (file edit, shell, search) live with the caller; this
//! crate ships just the two needed for the external-search fallback (see
//! [`crate::search`]).
//!
//! Tools return `anyhow::Result` so implementors are not forced onto the
//! crate error enum; the engine folds failures into `is_error` tool
//! results rather than terminating the stream.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::types::{ToolResultPart, ToolSpec};

/// Ceiling for a single value inside an argument preview.
const PREVIEW_VALUE_MAX: usize = 200;
/// Ceiling for the whole preview string.
const PREVIEW_TOTAL_MAX: usize = 500;

/// Output of a tool execution, before the engine stamps call id and name.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: String,
    /// Ordered multimodal segments for tools that return more than text
    pub content_parts: Vec<ToolResultPart>,
    /// Soft failure: reported to the model, does not end the loop
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        ToolOutput::text(content)
    }
}

/// An executable tool the engine can dispatch to.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declarative description sent to providers
    fn spec(&self) -> ToolSpec;

    /// Run the tool. `args` is the raw JSON argument text from the model.
    async fn execute(&self, args: &str) -> anyhow::Result<ToolOutput>;

    /// Short human-readable summary of a call, shown in exec events
    fn preview(&self, args: &str) -> String {
        preview_args(args)
    }
}

/// Name-keyed tool registry shared by engine streams.
///
/// Reads vastly outnumber writes; lookups clone the `Arc` out so tool
/// execution never holds the lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its spec name, replacing any previous entry
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        self.tools.write().unwrap().insert(name, tool);
    }

    /// Remove a tool by name
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().unwrap().remove(name)
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    /// Specs of all registered tools
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .read()
            .unwrap()
            .values()
            .map(|t| t.spec())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }
}

/// Format tool-call arguments as a `(k1:v1, k2:v2, …)` preview.
///
/// Values past 200 chars are ellipsized and the whole preview is capped at
/// 500 chars. Non-object argument payloads fall back to the raw text.
pub fn preview_args(args: &str) -> String {
    let parsed: serde_json::Value = match serde_json::from_str(args) {
        Ok(v) => v,
        Err(_) => return ellipsize(args.trim(), PREVIEW_VALUE_MAX),
    };

    let Some(map) = parsed.as_object() else {
        return ellipsize(&parsed.to_string(), PREVIEW_VALUE_MAX);
    };
    if map.is_empty() {
        return "()".to_string();
    }

    let mut out = String::from("(");
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push_str(key);
        out.push(':');
        out.push_str(&ellipsize(&rendered, PREVIEW_VALUE_MAX));
        if out.len() >= PREVIEW_TOTAL_MAX {
            break;
        }
    }
    out = ellipsize(&out, PREVIEW_TOTAL_MAX.saturating_sub(1));
    out.push(')');
    out
}

fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new(
                "echo",
                "Echo the input back",
                json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"],
                }),
            )
        }

        async fn execute(&self, args: &str) -> anyhow::Result<ToolOutput> {
            let value: serde_json::Value = serde_json::from_str(args)?;
            Ok(ToolOutput::text(
                value["text"].as_str().unwrap_or_default().to_string(),
            ))
        }
    }

    #[test]
    fn test_registry_register_get_unregister() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(EchoTool));
        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs()[0].name, "echo");

        assert!(registry.unregister("echo").is_some());
        assert!(registry.get("echo").is_none());
        assert!(registry.unregister("echo").is_none());
    }

    #[tokio::test]
    async fn test_tool_execute() {
        let tool = EchoTool;
        let out = tool.execute(r#"{"text":"hello"}"#).await.unwrap();
        assert_eq!(out.content, "hello");
        assert!(!out.is_error);
    }

    #[test]
    fn test_preview_simple() {
        assert_eq!(
            preview_args(r#"{"query":"zig","limit":3}"#),
            "(limit:3, query:zig)"
        );
    }

    #[test]
    fn test_preview_empty_and_invalid() {
        assert_eq!(preview_args("{}"), "()");
        assert_eq!(preview_args(""), "");
        assert_eq!(preview_args("not json at all"), "not json at all");
    }

    #[test]
    fn test_preview_ellipsizes_long_values() {
        let long = "x".repeat(400);
        let preview = preview_args(&format!(r#"{{"content":"{long}"}}"#));
        assert!(preview.contains('…'));
        assert!(preview.chars().count() <= PREVIEW_VALUE_MAX + 20);
    }

    #[test]
    fn test_preview_total_cap() {
        let mut obj = serde_json::Map::new();
        for i in 0..20 {
            obj.insert(format!("key{i:02}"), json!("v".repeat(100)));
        }
        let preview = preview_args(&serde_json::Value::Object(obj).to_string());
        assert!(preview.chars().count() <= PREVIEW_TOTAL_MAX + 1);
        assert!(preview.ends_with(')'));
    }
}
