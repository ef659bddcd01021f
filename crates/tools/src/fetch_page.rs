//! Page fetch tool: retrieves a public reference page as plain text.
//!
//! Used by the document interpreter to pull in a reputable explanation of a
//! test or term. HTML is reduced to readable text and truncated.

use async_trait::async_trait;
use healthflow_core::error::ToolError;
use healthflow_core::tool::{Tool, ToolResult};
use regex_lite::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static SCRIPT_STYLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").ok());
static TAGS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

fn replace_all(re: &Option<Regex>, text: &str, with: &str) -> String {
    match re {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

pub struct FetchPageTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl FetchPageTool {
    pub fn new(max_chars: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("healthflow/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, max_chars }
    }
}

/// Reduce an HTML document to whitespace-normalised text.
pub fn html_to_text(html: &str) -> String {
    let without_scripts = replace_all(&SCRIPT_STYLE, html, " ");
    let without_tags = replace_all(&TAGS, &without_scripts, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    replace_all(&WHITESPACE, &decoded, " ").trim().to_string()
}

/// Truncate to at most `max_chars` characters, on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[async_trait]
impl Tool for FetchPageTool {
    fn name(&self) -> &str {
        crate::FETCH_PAGE
    }

    fn description(&self) -> &str {
        "Fetch a public web page (http or https) and return its readable text, truncated."
    }

    fn usage_guidance(&self) -> &str {
        "Call only for reputable public health sources (e.g. government or major hospital sites)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The page URL"
                }
            },
            "required": ["url"]
        })
    }

    fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "status": { "type": "integer" },
                "text": { "type": "string" },
                "truncated": { "type": "boolean" }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(
                "URL must start with http:// or https://".into(),
            ));
        }

        debug!(url, "Fetching page");

        let response = self.client.get(url).send().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: crate::FETCH_PAGE.into(),
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = response.text().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: crate::FETCH_PAGE.into(),
            reason: e.to_string(),
        })?;

        let text = if is_html { html_to_text(&body) } else { body };
        let (text, truncated) = truncate_chars(&text, self.max_chars);

        Ok(ToolResult {
            call_id: String::new(),
            success: status < 400,
            output: if status < 400 {
                text.clone()
            } else {
                format!("Fetching {url} failed with HTTP {status}")
            },
            data: Some(serde_json::json!({
                "url": url,
                "status": status,
                "text": text,
                "truncated": truncated,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> FetchPageTool {
        FetchPageTool::new(4000, Duration::from_secs(2))
    }

    #[test]
    fn html_is_reduced_to_text() {
        let html = r#"<html><head><style>p { color: red; }</style><script>alert("x")</script></head>
            <body><h1>Complete&nbsp;Blood Count</h1>
            <p>A CBC measures <b>red</b> &amp; white cells.</p></body></html>"#;
        assert_eq!(html_to_text(html), "Complete Blood Count A CBC measures red & white cells.");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (text, truncated) = truncate_chars("héllo wörld", 4);
        assert_eq!(text, "héll");
        assert!(truncated);
        let (text, truncated) = truncate_chars("short", 10);
        assert_eq!(text, "short");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn non_http_url_is_invalid() {
        let err = tool()
            .execute(serde_json::json!({"url": "file:///etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_execution_failure() {
        let err = tool()
            .execute(serde_json::json!({"url": "http://127.0.0.1:1/page"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
