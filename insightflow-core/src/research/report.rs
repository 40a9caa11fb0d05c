//! Report stage: synthesize the final document.

use super::prompts;
use super::state::{ResearchState, Step};
use crate::brain::{Brain, strip_code_fences};
use crate::config::ResearchConfig;
use crate::error::WorkflowError;
use tracing::info;

/// Run the Report stage. Unlike Plan and Analyze there is no fallback text:
/// a failed or empty generation fails the run.
pub async fn report(
    brain: &Brain,
    config: &ResearchConfig,
    mut state: ResearchState,
) -> Result<ResearchState, WorkflowError> {
    let sources = state.top_sources(config.report_source_limit);
    let prompt = prompts::report_prompt(
        &state.query,
        &state.research_plan,
        &state.key_findings,
        &sources,
    );
    state.log(format!(
        "Report: synthesizing from {} findings and {} sources",
        state.key_findings.len(),
        sources.len()
    ));

    let raw = brain
        .generate(Some(prompts::REPORT_SYSTEM), &prompt)
        .await
        .map_err(|e| WorkflowError::ReportFailed {
            message: e.to_string(),
        })?;

    let text = strip_code_fences(&raw);
    if text.is_empty() {
        return Err(WorkflowError::EmptyReport);
    }

    info!(chars = text.len(), "Report generated");
    state.log(format!("Report: {} characters generated", text.chars().count()));
    state.report = text;
    state.current_step = Step::ReportComplete;
    Ok(state)
}
