//! Workflow engine: drives Plan → Gather → Analyze (→ Gather …) → Report.
//!
//! The graph has one entry (Plan) and one exit (after Report). The only
//! conditional edge leaves Analyze and is chosen by the state's
//! `current_step`, which the loop controller sets.

use super::analyze::analyze;
use super::controller::{LoopController, Route};
use super::events::{Stage, WorkflowObserver};
use super::gather::gather;
use super::plan::plan;
use super::report::report;
use super::state::{ResearchRequest, ResearchState, Step};
use crate::config::InsightConfig;
use crate::error::WorkflowError;
use crate::sources::Gateways;
use tracing::{debug, info};

/// The label a stage shows while it runs.
fn running_step(stage: Stage) -> Step {
    match stage {
        Stage::Plan => Step::Planning,
        Stage::Gather => Step::Gathering,
        Stage::Analyze => Step::Analyzing,
        Stage::Report => Step::Reporting,
    }
}

/// The next node after `stage` has produced `state`, or `None` at the exit.
pub fn successor(stage: Stage, state: &ResearchState) -> Option<Stage> {
    match stage {
        Stage::Plan => Some(Stage::Gather),
        Stage::Gather => Some(Stage::Analyze),
        Stage::Analyze if state.current_step == Step::Looping => Some(Stage::Gather),
        Stage::Analyze => Some(Stage::Report),
        Stage::Report => None,
    }
}

/// Runs research queries end to end. Holds only configuration and gateways;
/// each run's state lives on that run's stack.
#[derive(Debug, Clone)]
pub struct ResearchEngine {
    gateways: Gateways,
    config: InsightConfig,
    controller: LoopController,
}

impl ResearchEngine {
    pub fn new(gateways: Gateways, config: InsightConfig) -> Self {
        let controller = LoopController::new(config.research.loop_cap());
        Self {
            gateways,
            config,
            controller,
        }
    }

    pub fn config(&self) -> &InsightConfig {
        &self.config
    }

    /// Drive one query to completion.
    ///
    /// Returns the final state, or the first stage failure. Only Report can
    /// fail; Plan, Gather and Analyze degrade instead.
    pub async fn run(
        &self,
        request: ResearchRequest,
        observer: &dyn WorkflowObserver,
    ) -> Result<ResearchState, WorkflowError> {
        if request.query.trim().is_empty() {
            return Err(WorkflowError::EmptyQuery);
        }

        let mut state = ResearchState::new(request);
        info!(query = %state.query, mode = %state.search_mode, "Research run started");

        let mut node = Some(Stage::Plan);
        while let Some(stage) = node {
            state.current_step = running_step(stage);
            debug!(%stage, step = %state.current_step, "Entering stage");
            observer.on_stage_start(stage, &state);

            state = self.execute(stage, state).await?;

            observer.on_stage_complete(stage, &state);
            node = successor(stage, &state);
        }

        info!(
            query = %state.query,
            loops = state.loop_count,
            findings = state.key_findings.len(),
            "Research run complete"
        );
        Ok(state)
    }

    async fn execute(
        &self,
        stage: Stage,
        state: ResearchState,
    ) -> Result<ResearchState, WorkflowError> {
        let state = match stage {
            Stage::Plan => plan(&self.gateways.brain, state).await,
            Stage::Gather => gather(&self.gateways, &self.config, state).await,
            Stage::Analyze => {
                let (state, verdict) =
                    analyze(&self.gateways.brain, &self.config.research, state).await;
                let (state, route) = self.controller.decide(state, verdict);
                debug_assert_eq!(route == Route::Gather, state.current_step == Step::Looping);
                state
            }
            Stage::Report => report(&self.gateways.brain, &self.config.research, state).await?,
        };
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_edges() {
        let mut state = ResearchState::default();
        assert_eq!(successor(Stage::Plan, &state), Some(Stage::Gather));
        assert_eq!(successor(Stage::Gather, &state), Some(Stage::Analyze));

        state.current_step = Step::Looping;
        assert_eq!(successor(Stage::Analyze, &state), Some(Stage::Gather));

        state.current_step = Step::AnalysisComplete;
        assert_eq!(successor(Stage::Analyze, &state), Some(Stage::Report));
        assert_eq!(successor(Stage::Report, &state), None);
    }

    #[test]
    fn test_running_steps() {
        assert_eq!(running_step(Stage::Plan).label(), "Planning research");
        assert_eq!(running_step(Stage::Report).label(), "Generating report");
    }
}
