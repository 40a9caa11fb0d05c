//! Semantic Scholar Graph API paper search.

use super::{AcademicSearchProvider, SearchFilters, SourceRecord};
use crate::config::AcademicConfig;
use crate::error::SearchError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "Semantic Scholar";
const SEARCH_FIELDS: &str = "title,url,abstract,citationCount,year,authors,openAccessPdf";
const MAX_AUTHORS: usize = 3;

/// Client for the `/paper/search` endpoint.
pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(config: &AcademicConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("InsightFlow/0.3")
            .build()
            .map_err(|e| SearchError::Request {
                provider: PROVIDER.into(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
        })
    }

    fn query_params(query: &str, filters: &SearchFilters, limit: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", query.to_string()),
            ("limit", limit.to_string()),
            ("fields", SEARCH_FIELDS.to_string()),
        ];
        if filters.min_citations > 0 {
            params.push(("minCitationCount", filters.min_citations.to_string()));
        }
        if filters.open_access {
            params.push(("openAccessPdf", String::new()));
        }
        params
    }
}

/// Convert a search response into source records. Content carries the
/// abstract plus citation, year and author lines; score is the citation count.
fn parse_papers(body: &Value) -> Vec<SourceRecord> {
    let Some(papers) = body.get("data").and_then(|d| d.as_array()) else {
        return Vec::new();
    };

    papers
        .iter()
        .map(|paper| {
            let title = paper
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled paper")
                .to_string();
            let url = paper
                .get("openAccessPdf")
                .and_then(|p| p.get("url"))
                .and_then(|v| v.as_str())
                .filter(|u| !u.is_empty())
                .or_else(|| paper.get("url").and_then(|v| v.as_str()))
                .unwrap_or("")
                .to_string();
            let citations = paper
                .get("citationCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let abstract_text = paper
                .get("abstract")
                .and_then(|v| v.as_str())
                .unwrap_or("No abstract available.");
            let year = paper
                .get("year")
                .and_then(|v| v.as_u64())
                .map(|y| y.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let authors: Vec<&str> = paper
                .get("authors")
                .and_then(|a| a.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a.get("name").and_then(|n| n.as_str()))
                        .take(MAX_AUTHORS)
                        .collect()
                })
                .unwrap_or_default();
            let authors = if authors.is_empty() {
                "unknown".to_string()
            } else {
                authors.join(", ")
            };

            SourceRecord {
                title,
                url,
                content: format!(
                    "Abstract: {abstract_text}\nCitations: {citations}\nYear: {year}\nAuthors: {authors}"
                ),
                score: citations as f64,
            }
        })
        .collect()
}

#[async_trait]
impl AcademicSearchProvider for SemanticScholarClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, SearchError> {
        let url = format!("{}/paper/search", self.base_url);
        debug!(url = %url, query = %query, min_citations = filters.min_citations, "GET paper search");

        let mut request = self
            .client
            .get(&url)
            .query(&Self::query_params(query, filters, limit));
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| SearchError::Request {
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

        let body: Value = response.json().await.map_err(|e| SearchError::Parse {
            provider: PROVIDER.into(),
            message: e.to_string(),
        })?;

        Ok(parse_papers(&body))
    }
}
