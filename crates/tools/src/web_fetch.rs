//! URL fetching: the HTTP [`UrlFetcher`] and the `fetch_url` tool.
//!
//! Limits:
//! - Hard timeout (`web.timeout_secs`, default 20s)
//! - Max response size (`web.max_bytes`, default 5MB)
//! - Max text output (`web.max_text_chars`, default 250k chars)
//! - Redirect limit (5 hops)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde_json::{json, Value};

use pv_domain::capability::UrlFetcher;
use pv_domain::config::WebConfig;
use pv_domain::error::{Error, Result};
use pv_domain::provenance::Source;

use crate::tool::{required_str, truncate_result, Tool, ToolContext, ToolErrorPolicy};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP fetcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpUrlFetcher {
    client: reqwest::Client,
    user_agent: String,
    max_bytes: usize,
    max_text_chars: usize,
}

impl HttpUrlFetcher {
    pub fn new(config: &WebConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Http(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            max_text_chars: config.max_text_chars,
        })
    }
}

#[async_trait]
impl UrlFetcher for HttpUrlFetcher {
    async fn fetch_markdown(&self, url: &str) -> Result<String> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Validation(format!("not an http(s) URL: {url}")));
        }

        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml,text/markdown,text/plain")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("fetch {url}"))
                } else {
                    Error::Http(format!("fetch {url}: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!("fetch {url}: status {status}")));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // Stream body with hard byte cap
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Http(format!("read {url}: {e}")))?;
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(Error::Http(format!(
                    "response from {url} exceeded {} bytes",
                    self.max_bytes
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&buf);
        let text = if content_type.contains("html") {
            html_to_markdown(&body, self.max_text_chars)
        } else if content_type.contains("text/") || content_type.contains("json") || content_type.is_empty() {
            body.chars().take(self.max_text_chars).collect()
        } else {
            return Err(Error::Validation(format!(
                "unsupported content type `{content_type}` at {url}"
            )));
        };

        tracing::debug!(url = %url, bytes = buf.len(), chars = text.len(), "url fetched");
        Ok(text)
    }
}

/// Reduce HTML to lightweight markdown: headings and list items keep their
/// markers, script/style content is dropped, entities are decoded and
/// whitespace collapsed.
pub fn html_to_markdown(html: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut tag_buf = String::new();
    let mut emitted = 0usize;

    for ch in html.chars() {
        if emitted >= max_chars {
            break;
        }

        match ch {
            '<' => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag = tag_buf.to_lowercase();
                let tag_name = tag
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .find(|s| !s.is_empty())
                    .unwrap_or("");
                let closing = tag.starts_with('/');

                match (closing, tag_name) {
                    (false, "script") => in_script = true,
                    (true, "script") => in_script = false,
                    (false, "style") => in_style = true,
                    (true, "style") => in_style = false,
                    (false, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") => {
                        let level = tag_name[1..].parse::<usize>().unwrap_or(1);
                        push_line_break(&mut out);
                        out.push_str(&"#".repeat(level));
                        out.push(' ');
                    }
                    (false, "li") => {
                        push_line_break(&mut out);
                        out.push_str("- ");
                    }
                    (_, "br") => out.push('\n'),
                    (
                        true,
                        "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "tr"
                        | "article" | "section" | "header" | "footer" | "blockquote",
                    ) => {
                        out.push_str("\n\n");
                    }
                    _ => {}
                }

                tag_buf.clear();
            }
            _ if in_tag => tag_buf.push(ch),
            _ if in_script || in_style => {}
            _ => {
                out.push(ch);
                emitted += 1;
            }
        }
    }

    let out = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    // Collapse whitespace, keeping at most one blank line.
    let mut result = String::new();
    let mut prev_blank = false;
    for line in out.lines() {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if trimmed.is_empty() {
            if !prev_blank && !result.is_empty() {
                result.push('\n');
                prev_blank = true;
            }
        } else {
            result.push_str(&trimmed);
            result.push('\n');
            prev_blank = false;
        }
    }

    result.trim().to_string()
}

fn push_line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fetch_url tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const FETCH_URL_TOOL: &str = "fetch_url";

/// Static tool letting the model read a web page.  Failures are reported
/// back to the model.
pub struct FetchUrlTool {
    fetcher: Arc<dyn UrlFetcher>,
    max_result_chars: usize,
}

impl FetchUrlTool {
    pub fn new(fetcher: Arc<dyn UrlFetcher>, max_result_chars: usize) -> Self {
        Self {
            fetcher,
            max_result_chars,
        }
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn description(&self) -> String {
        "Fetch a web page and return its readable text as markdown.".into()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string", "description": "Absolute http(s) URL to fetch" }
            }
        })
    }

    fn error_policy(&self) -> ToolErrorPolicy {
        ToolErrorPolicy::ReportToModel
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let url = required_str(&args, FETCH_URL_TOOL, "url")?;
        let markdown = self.fetcher.fetch_markdown(url).await?;

        ctx.memory.record(
            &ctx.conversation_id,
            &ctx.tool_name,
            vec![Source::new("url", url).with_url(url).external()],
            Vec::new(),
        );

        Ok(truncate_result(markdown, self.max_result_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolMemory;

    #[test]
    fn strips_tags_and_scripts() {
        let html = "<html><body><h1>Hello</h1><p>World</p><script>var x=1;</script></body></html>";
        let text = html_to_markdown(html, 10_000);
        assert!(text.contains("# Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("var x=1"));
    }

    #[test]
    fn decodes_entities() {
        let text = html_to_markdown("<p>A &amp; B &lt; C</p>", 10_000);
        assert!(text.contains("A & B < C"));
    }

    #[test]
    fn list_items_become_bullets() {
        let text = html_to_markdown("<ul><li>one</li><li>two</li></ul>", 10_000);
        assert!(text.contains("- one"));
        assert!(text.contains("- two"));
    }

    #[test]
    fn respects_char_limit() {
        let html = "<p>This is a very long text that should be truncated</p>";
        let text = html_to_markdown(html, 10);
        assert!(text.chars().count() <= 10);
    }

    struct StaticPage;

    #[async_trait]
    impl UrlFetcher for StaticPage {
        async fn fetch_markdown(&self, url: &str) -> Result<String> {
            if url.contains("down") {
                return Err(Error::Http("status 503".into()));
            }
            Ok("# Title\n\nbody".into())
        }
    }

    fn ctx(memory: Arc<ToolMemory>) -> ToolContext {
        ToolContext {
            conversation_id: "c1".into(),
            tool_name: FETCH_URL_TOOL.into(),
            organisation_id: None,
            user_id: None,
            memory,
        }
    }

    #[tokio::test]
    async fn tool_records_external_source() {
        let memory = Arc::new(ToolMemory::new());
        let tool = FetchUrlTool::new(Arc::new(StaticPage), 1000);
        let out = tool
            .execute(json!({ "url": "https://example.com" }), &ctx(memory.clone()))
            .await
            .unwrap();
        assert_eq!(out, "# Title\n\nbody");

        let entry = &memory.read("c1")[FETCH_URL_TOOL];
        assert_eq!(entry.used_sources[0].label, "https://example.com");
        assert_eq!(entry.used_sources[0].external, Some(true));
    }

    #[tokio::test]
    async fn failed_fetch_records_nothing() {
        let memory = Arc::new(ToolMemory::new());
        let tool = FetchUrlTool::new(Arc::new(StaticPage), 1000);
        let result = tool
            .execute(json!({ "url": "https://down.example.com" }), &ctx(memory.clone()))
            .await;
        assert!(result.is_err());
        assert!(memory.read("c1").is_empty());
        assert_eq!(tool.error_policy(), ToolErrorPolicy::ReportToModel);
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let fetcher = HttpUrlFetcher::new(&WebConfig::default()).unwrap();
        let err = fetcher.fetch_markdown("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
