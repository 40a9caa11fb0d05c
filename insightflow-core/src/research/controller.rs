//! Loop controller: decides, after Analyze, between another Gather pass and
//! the Report. It is the only writer of `loop_count`.

use super::analyze::Verdict;
use super::plan::normalize_questions;
use super::state::{ResearchState, Step};
use crate::config::MAX_LOOPS;
use tracing::info;

/// Where control goes after Analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Gather,
    Report,
}

/// Bounded loop-back policy.
#[derive(Debug, Clone, Copy)]
pub struct LoopController {
    max_loops: u32,
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new(MAX_LOOPS)
    }
}

impl LoopController {
    /// `max_loops` is clamped to [`MAX_LOOPS`].
    pub fn new(max_loops: u32) -> Self {
        Self {
            max_loops: max_loops.min(MAX_LOOPS),
        }
    }

    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }

    /// Apply the verdict: either loop back with a replacement plan or move on.
    pub fn decide(&self, mut state: ResearchState, verdict: Verdict) -> (ResearchState, Route) {
        if let Verdict::NeedsMore { follow_ups } = verdict {
            let follow_ups = normalize_questions(follow_ups);
            if follow_ups.is_empty() {
                state.log("Loop: further research requested without follow-ups, proceeding to report");
            } else if state.loop_count >= self.max_loops {
                state.log(format!(
                    "Loop: limit of {} reached, proceeding to report",
                    self.max_loops
                ));
            } else {
                state.loop_count += 1;
                info!(loop_count = state.loop_count, follow_ups = follow_ups.len(), "Looping for more research");
                state.log(format!(
                    "Loop {}/{}: researching {} follow-up questions: {}",
                    state.loop_count,
                    self.max_loops,
                    follow_ups.len(),
                    follow_ups.join(" | ")
                ));
                state.research_plan = follow_ups;
                state.current_step = Step::Looping;
                return (state, Route::Gather);
            }
        }

        state.current_step = Step::AnalysisComplete;
        (state, Route::Report)
    }
}
