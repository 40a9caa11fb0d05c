//! Source gateways: web search, academic search and page fetching.
//!
//! Each gateway is a trait so the research stages can be driven by scripted
//! fakes in tests. The HTTP adapters live in the submodules.

pub mod fetch;
pub mod semantic_scholar;
pub mod tavily;

use crate::brain::Brain;
use crate::config::InsightConfig;
use crate::error::{InsightError, SearchError};
use crate::providers::create_provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use fetch::{HttpPageFetcher, extract_text_from_html, truncate_chars};
pub use semantic_scholar::SemanticScholarClient;
pub use tavily::TavilySearch;

/// One retrieved source.
///
/// `score` is the provider relevance score for web results and the citation
/// count for academic results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
}

/// Academic search filters. Ignored in web mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub min_citations: u32,
    #[serde(default)]
    pub open_access: bool,
}

/// General web search.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Ranked results for `query`, best first.
    async fn search(&self, query: &str, max_results: usize)
    -> Result<Vec<SourceRecord>, SearchError>;
}

/// Scholarly paper search.
#[async_trait]
pub trait AcademicSearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, SearchError>;
}

/// Fetches a page and returns readable text, at most `max_chars` characters.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, max_chars: usize) -> Result<String, SearchError>;
}

/// The external collaborators a research run talks to.
#[derive(Clone)]
pub struct Gateways {
    pub brain: Brain,
    pub web: Arc<dyn WebSearchProvider>,
    pub academic: Arc<dyn AcademicSearchProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
}

impl Gateways {
    /// Real HTTP gateways built from configuration.
    pub fn from_config(config: &InsightConfig) -> Result<Self, InsightError> {
        config.validate()?;
        let provider = create_provider(&config.llm)?;
        Ok(Self {
            brain: Brain::new(provider, &config.llm),
            web: Arc::new(TavilySearch::new(&config.search)?),
            academic: Arc::new(SemanticScholarClient::new(&config.academic)?),
            fetcher: Arc::new(HttpPageFetcher::new(config.search.timeout_secs)?),
        })
    }
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways")
            .field("brain", &self.brain)
            .field("web", &self.web.name())
            .field("academic", &self.academic.name())
            .finish_non_exhaustive()
    }
}
