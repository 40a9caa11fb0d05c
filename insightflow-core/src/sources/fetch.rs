//! Page fetching with HTML-to-text extraction.

use super::PageFetcher;
use crate::error::SearchError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "page fetch";

/// Fetches pages over plain HTTP(S).
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent("InsightFlow/0.3 (research agent)")
            .build()
            .map_err(|e| SearchError::Request {
                provider: PROVIDER.into(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, max_chars: usize) -> Result<String, SearchError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SearchError::InvalidUrl {
                url: url.to_string(),
                reason: "URL must start with http:// or https://".into(),
            });
        }

        debug!(url = %url, "GET page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                provider: PROVIDER.into(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Http {
                provider: PROVIDER.into(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.text().await.map_err(|e| SearchError::Request {
            provider: PROVIDER.into(),
            message: format!("Failed to read body: {e}"),
        })?;

        let text = if content_type.contains("text/html") || body.trim_start().starts_with('<') {
            extract_text_from_html(&body)
        } else {
            body
        };

        Ok(truncate_chars(&text, max_chars))
    }
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "section", "article",
];

/// Strip markup from an HTML document, keeping readable text.
///
/// Script, style and noscript bodies are dropped, block elements become line
/// breaks, common entities are decoded and blank lines collapsed.
pub fn extract_text_from_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut skip_depth: Option<&'static str> = None;
    let mut tag_name = String::new();
    let mut building_tag = false;

    for ch in html.chars() {
        if ch == '<' {
            in_tag = true;
            building_tag = true;
            tag_name.clear();
            continue;
        }
        if ch == '>' && in_tag {
            in_tag = false;
            building_tag = false;
            let tag = tag_name.to_ascii_lowercase();

            match skip_depth {
                Some(open) => {
                    if tag.strip_prefix('/') == Some(open) {
                        skip_depth = None;
                    }
                }
                None => {
                    skip_depth = ["script", "style", "noscript"]
                        .into_iter()
                        .find(|t| *t == tag);
                    let bare = tag.trim_start_matches('/');
                    if BLOCK_TAGS.contains(&bare) {
                        text.push('\n');
                    }
                }
            }
            continue;
        }
        if in_tag {
            if building_tag && (ch.is_ascii_alphanumeric() || ch == '/') {
                tag_name.push(ch);
            } else {
                building_tag = false;
            }
            continue;
        }
        if skip_depth.is_none() {
            text.push(ch);
        }
    }

    let text = text
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");

    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
