//! Job tracking: records, the store abstraction and the tracker that runs
//! research workflows in the background.

pub mod tracker;

use crate::research::{KeyFinding, ResearchRequest, ResearchState, SearchMode};
use crate::sources::{SearchFilters, SourceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

pub use tracker::{JobTracker, ProgressObserver};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Final payload of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub query: String,
    pub report: String,
    pub sources: Vec<SourceRecord>,
    pub insights: Vec<KeyFinding>,
}

impl ResearchResult {
    pub fn from_state(state: &ResearchState, source_limit: usize) -> Self {
        Self {
            query: state.query.clone(),
            report: state.report.clone(),
            sources: state.top_sources(source_limit),
            insights: state.key_findings.clone(),
        }
    }
}

/// Everything a poller can see about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "job_id")]
    pub id: Uuid,
    pub query: String,
    pub search_mode: SearchMode,
    pub filters: SearchFilters,
    pub status: JobStatus,
    pub progress: String,
    pub current_step: String,
    pub logs: Vec<String>,
    pub result: Option<ResearchResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh `processing` record for `request`.
    pub fn new(request: &ResearchRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            query: request.query.clone(),
            search_mode: request.search_mode,
            filters: request.filters,
            status: JobStatus::Processing,
            progress: "Initializing agent...".to_string(),
            current_step: crate::research::Step::Starting.to_string(),
            logs: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mirror progress from the running workflow. Ignored once terminal.
    pub fn apply_progress(&mut self, progress: String, state: &ResearchState) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.progress = progress;
        self.current_step = state.current_step.to_string();
        self.logs.clone_from(&state.logs);
        self.updated_at = Utc::now();
        true
    }

    /// Terminal transition to `completed`. Returns false if already terminal.
    pub fn complete(&mut self, result: ResearchResult, state: &ResearchState) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = "Complete!".to_string();
        self.current_step = state.current_step.to_string();
        self.logs.clone_from(&state.logs);
        self.result = Some(result);
        self.updated_at = Utc::now();
        true
    }

    /// Terminal transition to `error`. Returns false if already terminal.
    pub fn fail(&mut self, error: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Error;
        self.progress = "Failed".to_string();
        self.error = Some(error);
        self.updated_at = Utc::now();
        true
    }
}

/// Compact listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub query: String,
    pub status: JobStatus,
    pub progress: String,
    pub created_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            query: record.query.clone(),
            status: record.status,
            progress: record.progress.clone(),
            created_at: record.created_at,
        }
    }
}

/// Outcome of a result lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultLookup {
    NotFound,
    NotCompleted(JobStatus),
    Ready(ResearchResult),
}

/// Storage for job records.
///
/// Each record is written only by the task running its job, so
/// implementations need per-entry consistency, not cross-entry transactions.
pub trait JobStore: Send + Sync {
    fn create(&self, record: JobRecord);

    fn get(&self, id: &Uuid) -> Option<JobRecord>;

    /// Apply `update` to the record in place. Returns false when `id` is unknown.
    fn update(&self, id: &Uuid, update: &mut dyn FnMut(&mut JobRecord)) -> bool;

    fn list(&self) -> Vec<JobRecord>;
}

/// Process-lifetime store backed by a `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, record: JobRecord) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record);
    }

    fn get(&self, id: &Uuid) -> Option<JobRecord> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn update(&self, id: &Uuid, update: &mut dyn FnMut(&mut JobRecord)) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        match jobs.get_mut(id) {
            Some(record) => {
                update(record);
                true
            }
            None => false,
        }
    }

    fn list(&self) -> Vec<JobRecord> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
