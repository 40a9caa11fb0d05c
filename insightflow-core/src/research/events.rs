//! Stage-transition events published by the workflow engine.

use super::state::ResearchState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Plan,
    Gather,
    Analyze,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Plan => "plan",
            Stage::Gather => "gather",
            Stage::Analyze => "analyze",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Receives a snapshot of the state around every stage.
///
/// `on_stage_start` sees the state with `current_step` already set to the
/// stage's in-progress label; `on_stage_complete` sees the stage's output.
pub trait WorkflowObserver: Send + Sync {
    fn on_stage_start(&self, stage: Stage, state: &ResearchState);
    fn on_stage_complete(&self, stage: Stage, state: &ResearchState);
}

/// Observer that ignores every event.
pub struct NoOpObserver;

impl WorkflowObserver for NoOpObserver {
    fn on_stage_start(&self, _stage: Stage, _state: &ResearchState) {}
    fn on_stage_complete(&self, _stage: Stage, _state: &ResearchState) {}
}
