//! Tavily web search adapter.

use super::{SourceRecord, WebSearchProvider, truncate_chars};
use crate::config::SearchConfig;
use crate::error::SearchError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "Tavily";

/// Tavily search API client.
pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    snippet_max_chars: usize,
}

impl TavilySearch {
    /// Build from config. A missing key is reported on first use, not here,
    /// so the server can still start and report it through the health check.
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SearchError::Request {
                provider: PROVIDER.into(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            snippet_max_chars: config.snippet_max_chars,
        })
    }
}

/// Convert a Tavily response body into source records.
fn parse_results(data: &Value, snippet_max_chars: usize) -> Vec<SourceRecord> {
    data.get("results")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .map(|item| SourceRecord {
                    title: item
                        .get("title")
                        .and_then(|t| t.as_str())
                        .unwrap_or("No title")
                        .to_string(),
                    url: item
                        .get("url")
                        .and_then(|u| u.as_str())
                        .unwrap_or("")
                        .to_string(),
                    content: truncate_chars(
                        item.get("content").and_then(|c| c.as_str()).unwrap_or(""),
                        snippet_max_chars,
                    ),
                    score: item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SourceRecord>, SearchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SearchError::MissingApiKey {
                provider: PROVIDER.into(),
            })?;

        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
            "search_depth": "basic",
            "include_answer": false,
            "include_raw_content": false,
        });

        let url = format!("{}/search", self.base_url);
        debug!(url = %url, query = %query, "POST web search");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                provider: PROVIDER.into(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SearchError::RateLimited {
                provider: PROVIDER.into(),
            });
        }
        if !status.is_success() {
            return Err(SearchError::Http {
                provider: PROVIDER.into(),
                status: status.as_u16(),
            });
        }

        let data: Value = response.json().await.map_err(|e| SearchError::Parse {
            provider: PROVIDER.into(),
            message: e.to_string(),
        })?;

        Ok(parse_results(&data, self.snippet_max_chars))
    }
}
