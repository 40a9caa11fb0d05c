//! The job tracker: starts workflows in the background and answers polls.

use super::{JobRecord, JobStore, JobSummary, ResearchResult, ResultLookup, InMemoryJobStore};
use crate::error::WorkflowError;
use crate::research::{ResearchEngine, ResearchRequest, ResearchState, Stage, WorkflowObserver};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Copies progress from a running workflow into its job record.
pub struct ProgressObserver {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
}

impl ProgressObserver {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self { store, job_id }
    }

    fn mirror(&self, progress: String, state: &ResearchState) {
        self.store.update(&self.job_id, &mut |record| {
            record.apply_progress(progress.clone(), state);
        });
    }
}

impl WorkflowObserver for ProgressObserver {
    fn on_stage_start(&self, _stage: Stage, state: &ResearchState) {
        self.mirror(format!("{}...", state.current_step), state);
    }

    fn on_stage_complete(&self, _stage: Stage, state: &ResearchState) {
        self.mirror(state.current_step.to_string(), state);
    }
}

/// Registry of research jobs over an injected store.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
    engine: Arc<ResearchEngine>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>, engine: Arc<ResearchEngine>) -> Self {
        Self { store, engine }
    }

    /// Tracker backed by an [`InMemoryJobStore`].
    pub fn in_memory(engine: Arc<ResearchEngine>) -> Self {
        Self::new(Arc::new(InMemoryJobStore::new()), engine)
    }

    /// Register a job and start its workflow on the tokio runtime.
    ///
    /// Returns as soon as the record exists. Must be called from within a
    /// tokio runtime.
    pub fn create(&self, request: ResearchRequest) -> Result<Uuid, WorkflowError> {
        if request.query.trim().is_empty() {
            return Err(WorkflowError::EmptyQuery);
        }

        let record = JobRecord::new(&request);
        let id = record.id;
        self.store.create(record);
        info!(job_id = %id, query = %request.query, mode = %request.search_mode, "Research job created");

        let store = self.store.clone();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            drive(store, engine, id, request).await;
        });
        Ok(id)
    }

    /// Snapshot of a job, or `None` if the id is unknown.
    pub fn get_status(&self, id: &Uuid) -> Option<JobRecord> {
        self.store.get(id)
    }

    pub fn get_result(&self, id: &Uuid) -> ResultLookup {
        match self.store.get(id) {
            None => ResultLookup::NotFound,
            Some(JobRecord {
                result: Some(result),
                ..
            }) => ResultLookup::Ready(result),
            Some(record) => ResultLookup::NotCompleted(record.status),
        }
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self.store.list().iter().map(JobSummary::from).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}

/// Run one job's workflow and record its single terminal transition.
/// Stage errors and panics both end as `status = error`.
async fn drive(
    store: Arc<dyn JobStore>,
    engine: Arc<ResearchEngine>,
    id: Uuid,
    request: ResearchRequest,
) {
    let observer = ProgressObserver::new(store.clone(), id);
    let outcome = AssertUnwindSafe(engine.run(request, &observer))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(state)) => {
            let limit = engine.config().research.result_source_limit;
            let mut result = Some(ResearchResult::from_state(&state, limit));
            store.update(&id, &mut |record| {
                if let Some(result) = result.take() {
                    record.complete(result, &state);
                }
            });
            info!(job_id = %id, loops = state.loop_count, "Research job completed");
            return;
        }
        Ok(Err(e)) => e,
        Err(panic) => WorkflowError::Panicked {
            message: panic_message(panic.as_ref()),
        },
    };

    error!(job_id = %id, error = %failure, "Research job failed");
    let message = failure.to_string();
    store.update(&id, &mut |record| {
        record.fail(message.clone());
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
