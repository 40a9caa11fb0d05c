//! Plan stage: decompose the query into sub-questions.

use super::prompts;
use super::state::{ResearchState, Step};
use crate::brain::Brain;
use serde::Deserialize;
use tracing::{info, warn};

/// Upper bound on sub-questions kept from a plan or a loop-back.
pub const MAX_SUB_QUESTIONS: usize = 5;

#[derive(Debug, Deserialize)]
struct PlanOutput {
    sub_questions: Vec<String>,
}

/// Trim, drop blanks and cap at [`MAX_SUB_QUESTIONS`].
pub fn normalize_questions(questions: Vec<String>) -> Vec<String> {
    questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(MAX_SUB_QUESTIONS)
        .collect()
}

/// Deterministic plan used when the model gives nothing usable.
pub fn fallback_plan(query: &str) -> Vec<String> {
    let query = query.trim();
    vec![
        format!("{query} overview"),
        format!("{query} statistics"),
        format!("{query} latest news"),
    ]
}

/// Run the Plan stage. Never fails: a bad model reply yields [`fallback_plan`].
pub async fn plan(brain: &Brain, mut state: ResearchState) -> ResearchState {
    let prompt = prompts::plan_prompt(&state.query, state.search_mode);
    let extracted = brain
        .extract::<PlanOutput>(prompts::PLAN_SCHEMA_NAME, prompts::plan_schema(), &prompt)
        .await;

    let plan = match extracted {
        Ok(output) => {
            let questions = normalize_questions(output.sub_questions);
            if questions.is_empty() {
                warn!(query = %state.query, "Planner returned no sub-questions, using fallback plan");
                state.log("Plan: model returned no sub-questions, using fallback plan");
                fallback_plan(&state.query)
            } else {
                questions
            }
        }
        Err(e) => {
            warn!(query = %state.query, error = %e, "Plan extraction failed, using fallback plan");
            state.log(format!("Plan: extraction failed ({e}), using fallback plan"));
            fallback_plan(&state.query)
        }
    };

    info!(count = plan.len(), mode = %state.search_mode, "Research plan ready");
    state.log(format!(
        "Plan: {} sub-questions ({} mode): {}",
        plan.len(),
        state.search_mode,
        plan.join(" | ")
    ));
    state.research_plan = plan;
    state.current_step = Step::Planned;
    state
}
