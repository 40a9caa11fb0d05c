//! Gather stage: retrieve sources for every sub-question in the plan.
//!
//! Web mode searches and deep-fetches the top hit. Academic mode searches with
//! citation filters under a rate-limit discipline: a courtesy delay before
//! every attempt and linear backoff on HTTP 429. A failing sub-question
//! degrades to an empty list and never fails the stage.

use super::state::{QuestionSources, ResearchState, SearchMode, Step};
use crate::config::{AccumulationPolicy, AcademicConfig, InsightConfig, SearchConfig};
use crate::error::SearchError;
use crate::sources::{Gateways, SourceRecord};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FULL_CONTENT_PREFIX: &str = "[FULL CONTENT] ";
pub const SNIPPET_PREFIX: &str = "[SNIPPET] ";

/// Run the Gather stage over the current plan.
pub async fn gather(
    gateways: &Gateways,
    config: &InsightConfig,
    mut state: ResearchState,
) -> ResearchState {
    let plan = state.research_plan.clone();
    let mut gathered = Vec::with_capacity(plan.len());

    for question in &plan {
        let sources = match state.search_mode {
            SearchMode::Web => search_web(gateways, &config.search, question, &mut state).await,
            SearchMode::Academic => {
                let filters = state.filters;
                search_academic(gateways, &config.academic, question, &filters, &mut state).await
            }
        };
        gathered.push(QuestionSources {
            question: question.clone(),
            sources,
        });
    }

    state.search_results = match config.research.accumulation {
        AccumulationPolicy::Replace => gathered,
        AccumulationPolicy::Accumulate => merge_results(state.search_results, gathered),
    };

    let total = state.source_count();
    info!(sources = total, sub_questions = plan.len(), "Sources gathered");
    state.log(format!(
        "Gather: {total} sources across {} sub-questions",
        plan.len()
    ));
    state.current_step = Step::Gathered;
    state
}

/// Merge a new Gather pass into earlier results: re-searched questions are
/// replaced in place, new questions are appended.
pub fn merge_results(
    mut existing: Vec<QuestionSources>,
    fresh: Vec<QuestionSources>,
) -> Vec<QuestionSources> {
    for entry in fresh {
        match existing.iter_mut().find(|e| e.question == entry.question) {
            Some(slot) => *slot = entry,
            None => existing.push(entry),
        }
    }
    existing
}

async fn search_web(
    gateways: &Gateways,
    config: &SearchConfig,
    question: &str,
    state: &mut ResearchState,
) -> Vec<SourceRecord> {
    state.log(format!("POST {} search: '{question}'", gateways.web.name()));
    let mut results = match gateways
        .web
        .search(question, config.max_results_per_query)
        .await
    {
        Ok(results) => results,
        Err(e) => {
            warn!(question = %question, error = %e, "Web search failed");
            state.log(format!("Web search failed for '{question}': {e}"));
            return Vec::new();
        }
    };
    results.truncate(config.max_results_per_query);

    for result in results.iter_mut() {
        result.content = format!("{SNIPPET_PREFIX}{}", result.content);
    }

    if config.deep_fetch
        && let Some(top) = results.first_mut()
        && !top.url.is_empty()
    {
        state.log(format!("GET {} (deep fetch)", top.url));
        match gateways.fetcher.fetch(&top.url, config.fetch_max_chars).await {
            Ok(text) if !text.trim().is_empty() => {
                top.content = format!("{FULL_CONTENT_PREFIX}{text}");
            }
            Ok(_) => {
                state.log(format!("Deep fetch of {} returned no text, keeping snippet", top.url));
            }
            Err(e) => {
                debug!(url = %top.url, error = %e, "Deep fetch failed");
                state.log(format!("Deep fetch failed for {}: {e}, keeping snippet", top.url));
            }
        }
    }

    state.log(format!("Found {} results for '{question}'", results.len()));
    results
}

async fn search_academic(
    gateways: &Gateways,
    config: &AcademicConfig,
    question: &str,
    filters: &crate::sources::SearchFilters,
    state: &mut ResearchState,
) -> Vec<SourceRecord> {
    let max_attempts = config.max_attempts.max(1);
    let provider = gateways.academic.name().to_string();

    for attempt in 1..=max_attempts {
        tokio::time::sleep(Duration::from_millis(config.courtesy_delay_ms)).await;
        state.log(format!(
            "GET {provider} paper search: '{question}' (attempt {attempt}/{max_attempts})"
        ));

        match gateways
            .academic
            .search(question, filters, config.max_results_per_query)
            .await
        {
            Ok(papers) => {
                let before = papers.len();
                let min = f64::from(filters.min_citations);
                let papers: Vec<SourceRecord> =
                    papers.into_iter().filter(|p| p.score >= min).collect();
                let dropped = before - papers.len();
                if dropped > 0 {
                    state.log(format!(
                        "Dropped {dropped} papers below {} citations for '{question}'",
                        filters.min_citations
                    ));
                }
                state.log(format!("Found {} papers for '{question}'", papers.len()));
                return papers;
            }
            Err(SearchError::RateLimited { .. }) => {
                if attempt < max_attempts {
                    let wait = Duration::from_millis(config.backoff_step_ms * u64::from(attempt));
                    warn!(question = %question, attempt, ?wait, "Academic search rate limited, backing off");
                    state.log(format!(
                        "Rate limited (429) on '{question}', retrying in {wait:?} (attempt {attempt}/{max_attempts})"
                    ));
                    tokio::time::sleep(wait).await;
                } else {
                    warn!(question = %question, attempt, "Academic search rate limited, no retries left");
                    state.log(format!(
                        "Rate limited (429) on '{question}', no retries left (attempt {attempt}/{max_attempts})"
                    ));
                }
            }
            Err(e) => {
                warn!(question = %question, error = %e, "Academic search failed");
                state.log(format!("Academic search failed for '{question}': {e}, skipping"));
                return Vec::new();
            }
        }
    }

    state.log(format!(
        "Giving up on '{question}' after {max_attempts} rate-limited attempts"
    ));
    Vec::new()
}
