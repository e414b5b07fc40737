//! Google Code Assist v1internal adapter.
//!
//! Same generate-content shapes as [`crate::providers::gemini`], wrapped in
//! the Code Assist envelope: the caller first resolves a cloudaicompanion
//! project via `:loadCodeAssist`, then posts the Gemini request nested
//! under `request` to `:streamGenerateContent?alt=sse`, and every SSE frame
//! nests the generate-content payload under `response`. Auth is OAuth via
//! a [`TokenSource`]; the resolved project is cached per instance.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::provider::{Provider, TokenSource, send_checked};
use crate::providers::gemini::{build_generate_body, drive_frames};
use crate::stream::EventStream;
use crate::types::{Capabilities, Request};
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal";

/// Code Assist adapter.
pub struct CodeAssistProvider {
    token_source: Arc<dyn TokenSource>,
    base_url: String,
    /// Project id from `:loadCodeAssist`, resolved once per instance
    project: Mutex<Option<String>>,
    http: reqwest::Client,
}

impl CodeAssistProvider {
    pub fn new(token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            token_source,
            base_url: DEFAULT_BASE_URL.to_string(),
            project: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Skip `:loadCodeAssist` and use a known project id.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Mutex::new(Some(project.into()));
        self
    }

    /// Resolve (and cache) the cloudaicompanion project. Serialized behind
    /// the instance mutex so concurrent first calls do one load.
    async fn resolve_project(&self, token: &str) -> Result<String> {
        let mut project = self.project.lock().await;
        if let Some(project) = project.as_ref() {
            return Ok(project.clone());
        }

        let url = format!("{}:loadCodeAssist", self.base_url);
        log::debug!("code-assist: POST {url}");
        let body = json!({
            "metadata": {
                "ideType": "IDE_UNSPECIFIED",
                "platform": "PLATFORM_UNSPECIFIED",
                "pluginType": "GEMINI",
            },
        });
        let loaded: Value = send_checked(self.http.post(&url).bearer_auth(token).json(&body))
            .await?
            .json()
            .await?;

        let resolved = loaded["cloudaicompanionProject"]
            .as_str()
            .ok_or_else(|| Error::stream("loadCodeAssist returned no project"))?
            .to_string();
        *project = Some(resolved.clone());
        Ok(resolved)
    }
}

#[async_trait]
impl Provider for CodeAssistProvider {
    fn name(&self) -> &str {
        "code-assist"
    }

    fn credential(&self) -> String {
        "google-oauth".to_string()
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
        let token = self.token_source.access_token().await?;
        let project = self.resolve_project(&token).await?;

        let body = json!({
            "model": req.model,
            "project": project,
            "request": build_generate_body(&req),
        });
        let url = format!("{}:streamGenerateContent?alt=sse", self.base_url);
        log::debug!("code-assist: POST {} model={}", url, req.model);

        let response =
            send_checked(self.http.post(&url).bearer_auth(&token).json(&body)).await?;

        let debug_raw = req.debug_raw;
        Ok(EventStream::spawn(move |tx| async move {
            drive_frames(response, debug_raw, tx, |data| data["response"].clone()).await;
        }))
    }
}
