//! Analyze stage: extract structured findings and judge sufficiency.

use super::prompts;
use super::state::{KeyFinding, ResearchState, SearchMode};
use crate::brain::Brain;
use crate::config::{AccumulationPolicy, ResearchConfig};
use serde::Deserialize;
use tracing::{info, warn};

pub const NO_INFORMATION_TOPIC: &str = "No information found";
pub const FALLBACK_TOPIC: &str = "Preliminary source review";

/// The Analyze stage's opinion on whether more research is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Findings are good enough to write the report.
    Sufficient,
    /// The model asked for another pass with these follow-ups.
    NeedsMore { follow_ups: Vec<String> },
    /// Extraction failed; a synthetic finding was used. Never loops.
    Fallback,
}

#[derive(Debug, Deserialize)]
struct AnalysisOutput {
    key_findings: Vec<KeyFinding>,
    further_research_needed: bool,
    #[serde(default)]
    follow_up_questions: Vec<String>,
}

fn no_information_finding(query: &str, mode: SearchMode) -> KeyFinding {
    KeyFinding {
        topic: NO_INFORMATION_TOPIC.to_string(),
        details: format!(
            "The {mode} search returned no sources for \"{query}\". There is no evidence \
             available to support conclusions on this topic."
        ),
        source_title: "N/A".to_string(),
        source_url: String::new(),
    }
}

fn fallback_finding(state: &ResearchState) -> KeyFinding {
    let first = state.sources().next();
    KeyFinding {
        topic: FALLBACK_TOPIC.to_string(),
        details: format!(
            "Gathered {} sources for the sub-questions: {}. Structured analysis was unavailable, \
             so findings could not be extracted in detail.",
            state.source_count(),
            state.research_plan.join("; ")
        ),
        source_title: first.map(|s| s.title.clone()).unwrap_or_else(|| "N/A".into()),
        source_url: first.map(|s| s.url.clone()).unwrap_or_default(),
    }
}

fn apply_findings(state: &mut ResearchState, findings: Vec<KeyFinding>, policy: AccumulationPolicy) {
    match policy {
        AccumulationPolicy::Replace => state.key_findings = findings,
        AccumulationPolicy::Accumulate => {
            for finding in findings {
                if !state.key_findings.contains(&finding) {
                    state.key_findings.push(finding);
                }
            }
        }
    }
}

/// Run the Analyze stage. Sets `key_findings` and returns the verdict for the
/// loop controller; it never touches `loop_count` or routing.
pub async fn analyze(
    brain: &Brain,
    config: &ResearchConfig,
    mut state: ResearchState,
) -> (ResearchState, Verdict) {
    if state.source_count() == 0 {
        info!(query = %state.query, "No sources gathered, skipping analysis");
        state.log("Analyze: no sources gathered, recording absence of information");
        let finding = no_information_finding(&state.query, state.search_mode);
        apply_findings(&mut state, vec![finding], config.accumulation);
        return (state, Verdict::Sufficient);
    }

    let sources = state.top_sources(config.analysis_source_limit);
    let prompt = prompts::analysis_prompt(
        &state.query,
        state.search_mode,
        &sources,
        config.analysis_content_chars,
    );
    state.log(format!("Analyze: extracting findings from {} sources", sources.len()));

    let extracted = brain
        .extract::<AnalysisOutput>(prompts::ANALYSIS_SCHEMA_NAME, prompts::analysis_schema(), &prompt)
        .await;

    let output = match extracted {
        Ok(output) if !output.key_findings.is_empty() => output,
        Ok(_) => {
            warn!("Analysis returned no findings, using fallback finding");
            state.log("Analyze: model returned no findings, using fallback finding");
            let finding = fallback_finding(&state);
            apply_findings(&mut state, vec![finding], config.accumulation);
            return (state, Verdict::Fallback);
        }
        Err(e) => {
            warn!(error = %e, "Analysis extraction failed, using fallback finding");
            state.log(format!("Analyze: extraction failed ({e}), using fallback finding"));
            let finding = fallback_finding(&state);
            apply_findings(&mut state, vec![finding], config.accumulation);
            return (state, Verdict::Fallback);
        }
    };

    info!(
        findings = output.key_findings.len(),
        further_research_needed = output.further_research_needed,
        "Analysis complete"
    );
    state.log(format!(
        "Analyze: {} findings, further research needed: {}",
        output.key_findings.len(),
        output.further_research_needed
    ));
    apply_findings(&mut state, output.key_findings, config.accumulation);

    let verdict = if output.further_research_needed {
        Verdict::NeedsMore {
            follow_ups: output.follow_up_questions,
        }
    } else {
        Verdict::Sufficient
    };
    (state, verdict)
}
