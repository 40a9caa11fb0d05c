//! # InsightFlow Core
//!
//! Core library for the InsightFlow research agent.
//! Provides the LLM interface (brain), source gateways, the research
//! workflow (plan, gather, analyze, report), job tracking, the HTTP API,
//! configuration, and error types.

pub mod brain;
pub mod config;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod providers;
pub mod research;
pub mod sources;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{AccumulationPolicy, InsightConfig, load_config};
pub use error::{InsightError, Result};
pub use jobs::{InMemoryJobStore, JobRecord, JobStatus, JobStore, JobTracker, ResultLookup};
pub use research::{
    KeyFinding, NoOpObserver, ResearchEngine, ResearchRequest, ResearchState, SearchMode, Stage,
    Step, WorkflowObserver,
};
pub use sources::{Gateways, SearchFilters, SourceRecord};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
