//! Built-in `web_search` and `read_url` tools.
//!
//! These back the engine's external-search fallback for providers without
//! native web access. `web_search` queries the DuckDuckGo HTML endpoint
//! and returns a numbered result list; `read_url` fetches a page and
//! reduces it to markdown-ish text, truncated at a character cap.
//!
//! Both are ordinary [`Tool`]s: callers can replace them in the registry
//! with their own implementations (a different search backend, a headless
//! browser) without the engine noticing.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::tools::{Tool, ToolOutput};
use crate::types::ToolSpec;

/// Registry names the engine looks for when injecting external search.
pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const READ_URL_TOOL: &str = "read_url";

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; llm-conduit)";
const MAX_RESULTS: usize = 8;
/// Pages are cut here before being handed to the model.
const READ_URL_CHAR_CAP: usize = 20_000;

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// Textual web search over the DuckDuckGo HTML endpoint.
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            WEB_SEARCH_TOOL,
            "Search the web. Returns a numbered list of result titles, URLs and snippets.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query",
                    },
                },
                "required": ["query"],
            }),
        )
    }

    async fn execute(&self, args: &str) -> anyhow::Result<ToolOutput> {
        let parsed: serde_json::Value = serde_json::from_str(args)?;
        let query = parsed["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing required argument: query"))?;

        log::debug!("web_search: {query}");
        let body = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let results = parse_search_results(&body);
        if results.is_empty() {
            return Ok(ToolOutput::text(format!("No results for \"{query}\".")));
        }

        let mut out = String::new();
        for (i, result) in results.iter().enumerate() {
            out.push_str(&format!(
                "{}. {}\n   {}\n",
                i + 1,
                result.title,
                result.url
            ));
            if !result.snippet.is_empty() {
                out.push_str(&format!("   {}\n", result.snippet));
            }
        }
        Ok(ToolOutput::text(out))
    }
}

#[derive(Debug)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

/// Extract results from the DuckDuckGo HTML page.
///
/// The page marks result anchors with `class="result__a"` and snippets
/// with `result__snippet`; links are wrapped in a `/l/?uddg=` redirect.
fn parse_search_results(html: &str) -> Vec<SearchResult> {
    let mut results = Vec::new();
    let mut rest = html;

    while let Some(pos) = rest.find("result__a") {
        rest = &rest[pos..];
        let Some(href_start) = rest.find("href=\"") else {
            break;
        };
        let after_href = &rest[href_start + 6..];
        let Some(href_end) = after_href.find('"') else {
            break;
        };
        let href = &after_href[..href_end];

        let after_tag = &after_href[href_end..];
        let title = after_tag
            .find('>')
            .and_then(|gt| {
                let inner = &after_tag[gt + 1..];
                inner.find("</a>").map(|end| html_to_text(&inner[..end]))
            })
            .unwrap_or_default();

        let snippet = rest
            .find("result__snippet")
            .and_then(|snip_pos| {
                let inner = &rest[snip_pos..];
                let gt = inner.find('>')?;
                let body = &inner[gt + 1..];
                let end = body.find("</a>").or_else(|| body.find("</td>"))?;
                Some(html_to_text(&body[..end]))
            })
            .unwrap_or_default();

        let url = decode_redirect(href);
        if !url.is_empty() && !title.is_empty() {
            results.push(SearchResult {
                title,
                url,
                snippet,
            });
            if results.len() >= MAX_RESULTS {
                break;
            }
        }
        rest = &rest[9..];
    }
    results
}

/// Unwrap the `//duckduckgo.com/l/?uddg=<encoded>` redirect.
fn decode_redirect(href: &str) -> String {
    if let Some(pos) = href.find("uddg=") {
        let encoded = &href[pos + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    if href.starts_with("//") {
        return format!("https:{href}");
    }
    href.to_string()
}

/// Fetch a URL and return its text content as markdown-ish plain text.
pub struct ReadUrlTool {
    client: reqwest::Client,
    char_cap: usize,
}

impl ReadUrlTool {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            char_cap: READ_URL_CHAR_CAP,
        }
    }

    /// Override the truncation cap
    pub fn with_char_cap(mut self, cap: usize) -> Self {
        self.char_cap = cap;
        self
    }
}

impl Default for ReadUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadUrlTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            READ_URL_TOOL,
            "Fetch a URL and return its readable text content. Long pages are truncated.",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch",
                    },
                },
                "required": ["url"],
            }),
        )
    }

    async fn execute(&self, args: &str) -> anyhow::Result<ToolOutput> {
        let parsed: serde_json::Value = serde_json::from_str(args)?;
        let url = parsed["url"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing required argument: url"))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("unsupported URL scheme: {url}");
        }

        log::debug!("read_url: {url}");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        let mut text = if content_type.contains("html") || looks_like_html(&body) {
            html_to_text(&body)
        } else {
            body
        };

        if text.chars().count() > self.char_cap {
            text = text.chars().take(self.char_cap).collect();
            text.push_str("\n\n[content truncated]");
        }
        Ok(ToolOutput::text(text))
    }
}

fn looks_like_html(body: &str) -> bool {
    let mut end = body.len().min(512);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let head = &body[..end];
    head.contains("<html") || head.contains("<!DOCTYPE") || head.contains("<!doctype")
}

/// Strip tags and decode the common entities, keeping rough block structure.
fn html_to_text(html: &str) -> String {
    fn prefix(s: &str, max: usize) -> &str {
        let mut end = s.len().min(max);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }

    let mut out = String::with_capacity(html.len() / 2);
    let mut i = 0;

    while i < html.len() {
        let rest = &html[i..];
        if rest.starts_with('<') {
            let probe = prefix(rest, 12).to_ascii_lowercase();
            // Skip script/style bodies wholesale.
            let close = if probe.starts_with("<script") {
                Some("</script>")
            } else if probe.starts_with("<style") {
                Some("</style>")
            } else {
                None
            };
            if let Some(close) = close {
                if let Some(end) = rest.to_ascii_lowercase().find(close) {
                    i += end + close.len();
                    continue;
                }
            }
            // Block-level tags become newlines so paragraphs survive.
            if ["<p", "</p", "<br", "<div", "</div", "<li", "<tr", "<h1", "<h2", "<h3"]
                .iter()
                .any(|t| probe.starts_with(t))
            {
                out.push('\n');
            }
            match rest.find('>') {
                Some(gt) => i += gt + 1,
                None => break,
            }
            continue;
        }
        if rest.starts_with('&') {
            let mut replaced = false;
            for (entity, replacement) in [
                ("&amp;", "&"),
                ("&lt;", "<"),
                ("&gt;", ">"),
                ("&quot;", "\""),
                ("&#x27;", "'"),
                ("&#39;", "'"),
                ("&nbsp;", " "),
            ] {
                if rest.starts_with(entity) {
                    out.push_str(replacement);
                    i += entity.len();
                    replaced = true;
                    break;
                }
            }
            if !replaced {
                out.push('&');
                i += 1;
            }
            continue;
        }
        let c = rest.chars().next().unwrap();
        out.push(c);
        i += c.len_utf8();
    }

    // Collapse whitespace runs while keeping line breaks meaningful.
    let mut cleaned = String::with_capacity(out.len());
    let mut blank_run = 0usize;
    for line in out.lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        let mut last_space = false;
        for c in line.chars() {
            if c.is_whitespace() {
                if !last_space {
                    cleaned.push(' ');
                }
                last_space = true;
            } else {
                cleaned.push(c);
                last_space = false;
            }
        }
        cleaned.push('\n');
    }
    cleaned.trim().to_string()
}
