//! ChatGPT backend responses adapter (Codex OAuth).
//!
//! Same wire dialect as [`crate::providers::openai_responses`], reached
//! through the ChatGPT backend instead of the platform API. The backend
//! requires three extra headers (`OpenAI-Beta: responses=experimental`,
//! `ChatGPT-Account-ID`, `originator`), OAuth bearer auth via a
//! [`TokenSource`], and a mandatory `instructions` field carrying the base
//! Codex prompt.
//!
//! The base prompt is fetched from the public registry and cached
//! process-wide with a TTL, mirrored to disk so restarts (and registry
//! outages) do not block requests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;

use crate::provider::{Provider, TokenSource, send_checked};
use crate::providers::openai_responses::{build_body, drive_stream};
use crate::stream::EventStream;
use crate::types::{Capabilities, Request};
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";
const DEFAULT_ORIGINATOR: &str = "codex_cli_rs";
const INSTRUCTIONS_URL: &str =
    "https://raw.githubusercontent.com/openai/codex/main/codex-rs/core/prompt.md";
const INSTRUCTIONS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// ChatGPT backend adapter.
pub struct CodexProvider {
    token_source: Arc<dyn TokenSource>,
    account_id: String,
    base_url: String,
    originator: String,
    cache_dir: PathBuf,
    http: reqwest::Client,
}

impl CodexProvider {
    pub fn new(token_source: Arc<dyn TokenSource>, account_id: impl Into<String>) -> Self {
        Self {
            token_source,
            account_id: account_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            originator: DEFAULT_ORIGINATOR.to_string(),
            cache_dir: default_cache_dir(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = originator.into();
        self
    }

    /// Override where the instructions mirror lives (mostly for tests)
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
}

#[async_trait]
impl Provider for CodexProvider {
    fn name(&self) -> &str {
        "codex"
    }

    fn credential(&self) -> String {
        "chatgpt-oauth".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_web_search: false,
            native_web_fetch: false,
            tool_calls: true,
            supports_tool_choice: true,
        }
    }

    async fn stream(&self, req: Request) -> Result<EventStream> {
        let token = self.token_source.access_token().await?;
        let instructions = base_instructions(&self.http, &self.cache_dir).await?;
        let body = build_body(&req, Some(&instructions));
        let url = format!("{}/responses", self.base_url);
        log::debug!("codex: POST {} model={}", url, req.model);

        let builder = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("OpenAI-Beta", "responses=experimental")
            .header("ChatGPT-Account-ID", &self.account_id)
            .header("originator", &self.originator)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        let response = send_checked(builder).await?;

        let debug_raw = req.debug_raw;
        Ok(EventStream::spawn(move |tx| async move {
            drive_stream(response, debug_raw, tx).await;
        }))
    }
}

// --- instructions cache ----------------------------------------------------

struct CacheEntry {
    fetched_at: Instant,
    text: String,
}

/// Process-wide cache, keyed by registry URL. Writers evict expired
/// entries before inserting; the lock is never held across an await.
static INSTRUCTIONS_CACHE: LazyLock<Mutex<HashMap<String, CacheEntry>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn default_cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LLM_CONDUIT_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    std::env::temp_dir().join("llm-conduit")
}

fn mirror_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join("codex-instructions.md")
}

/// Fetch the Codex base prompt, going memory → disk mirror → registry.
/// A stale mirror still serves as fallback when the registry is down.
async fn base_instructions(http: &reqwest::Client, cache_dir: &Path) -> Result<String> {
    {
        let mut cache = INSTRUCTIONS_CACHE.lock().unwrap();
        cache.retain(|_, entry| entry.fetched_at.elapsed() < INSTRUCTIONS_TTL);
        if let Some(entry) = cache.get(INSTRUCTIONS_URL) {
            return Ok(entry.text.clone());
        }
    }

    if let Some(text) = read_mirror(cache_dir, INSTRUCTIONS_TTL) {
        remember(text.clone());
        return Ok(text);
    }

    match fetch_instructions(http).await {
        Ok(text) => {
            if let Err(e) = write_mirror(cache_dir, &text) {
                log::warn!("codex: failed to mirror instructions: {e}");
            }
            remember(text.clone());
            Ok(text)
        }
        Err(e) => {
            // Stale mirror beats no instructions at all.
            if let Some(text) = read_mirror(cache_dir, Duration::MAX) {
                log::warn!("codex: registry fetch failed ({e}), using stale mirror");
                remember(text.clone());
                return Ok(text);
            }
            Err(e)
        }
    }
}

fn remember(text: String) {
    INSTRUCTIONS_CACHE.lock().unwrap().insert(
        INSTRUCTIONS_URL.to_string(),
        CacheEntry {
            fetched_at: Instant::now(),
            text,
        },
    );
}

async fn fetch_instructions(http: &reqwest::Client) -> Result<String> {
    let text = send_checked(http.get(INSTRUCTIONS_URL)).await?.text().await?;
    if text.trim().is_empty() {
        return Err(Error::stream("instructions registry returned empty body"));
    }
    Ok(text)
}

/// Read the on-disk mirror if it exists and is younger than `max_age`.
fn read_mirror(cache_dir: &Path, max_age: Duration) -> Option<String> {
    let path = mirror_path(cache_dir);
    let metadata = std::fs::metadata(&path).ok()?;
    let age = metadata
        .modified()
        .ok()
        .map(|m| {
            SystemTime::now()
                .duration_since(m)
                .unwrap_or(Duration::ZERO)
        })?;
    if age > max_age {
        return None;
    }
    std::fs::read_to_string(&path).ok().filter(|t| !t.is_empty())
}

/// Atomically replace the mirror: write a temp file, then rename over.
fn write_mirror(cache_dir: &Path, text: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(cache_dir)?;
    let path = mirror_path(cache_dir);
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, &path)
}
