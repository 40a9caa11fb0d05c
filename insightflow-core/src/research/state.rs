//! Research state threaded through every stage.

use crate::sources::{SearchFilters, SourceRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which source family a job searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Web,
    Academic,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Web => write!(f, "web"),
            SearchMode::Academic => write!(f, "academic"),
        }
    }
}

/// Label of the active or most recently completed stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    #[default]
    #[serde(rename = "Starting")]
    Starting,
    #[serde(rename = "Planning research")]
    Planning,
    #[serde(rename = "Planning complete")]
    Planned,
    #[serde(rename = "Gathering sources")]
    Gathering,
    #[serde(rename = "Sources gathered")]
    Gathered,
    #[serde(rename = "Analyzing sources")]
    Analyzing,
    #[serde(rename = "Looping for more research")]
    Looping,
    #[serde(rename = "Analysis complete")]
    AnalysisComplete,
    #[serde(rename = "Generating report")]
    Reporting,
    #[serde(rename = "Report complete")]
    ReportComplete,
}

impl Step {
    pub fn label(&self) -> &'static str {
        match self {
            Step::Starting => "Starting",
            Step::Planning => "Planning research",
            Step::Planned => "Planning complete",
            Step::Gathering => "Gathering sources",
            Step::Gathered => "Sources gathered",
            Step::Analyzing => "Analyzing sources",
            Step::Looping => "Looping for more research",
            Step::AnalysisComplete => "Analysis complete",
            Step::Reporting => "Generating report",
            Step::ReportComplete => "Report complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::ReportComplete)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sources gathered for one sub-question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSources {
    pub question: String,
    pub sources: Vec<SourceRecord>,
}

/// A structured finding extracted by Analyze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFinding {
    pub topic: String,
    pub details: String,
    pub source_title: String,
    pub source_url: String,
}

/// What a caller submits to start a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn academic(query: impl Into<String>, filters: SearchFilters) -> Self {
        Self {
            query: query.into(),
            search_mode: SearchMode::Academic,
            filters,
        }
    }
}

/// Everything a run knows. Stages take the state by value and return the
/// successor, so no stage observes another's partial writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub query: String,
    pub search_mode: SearchMode,
    pub filters: SearchFilters,
    pub research_plan: Vec<String>,
    pub search_results: Vec<QuestionSources>,
    pub key_findings: Vec<KeyFinding>,
    pub report: String,
    pub loop_count: u32,
    pub current_step: Step,
    pub logs: Vec<String>,
}

impl ResearchState {
    pub fn new(request: ResearchRequest) -> Self {
        Self {
            query: request.query,
            search_mode: request.search_mode,
            filters: request.filters,
            ..Default::default()
        }
    }

    /// Append a trace line.
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// All gathered sources in plan order.
    pub fn sources(&self) -> impl Iterator<Item = &SourceRecord> {
        self.search_results.iter().flat_map(|q| q.sources.iter())
    }

    pub fn source_count(&self) -> usize {
        self.search_results.iter().map(|q| q.sources.len()).sum()
    }

    /// The first `limit` sources, cloned.
    pub fn top_sources(&self, limit: usize) -> Vec<SourceRecord> {
        self.sources().take(limit).cloned().collect()
    }
}
