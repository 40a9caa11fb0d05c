//! Prompt text and JSON schemas for the model-backed stages.

use super::state::{KeyFinding, SearchMode};
use crate::sources::{SourceRecord, truncate_chars};
use serde_json::{Value, json};
use std::fmt::Write;

pub const PLAN_SCHEMA_NAME: &str = "research_plan";
pub const ANALYSIS_SCHEMA_NAME: &str = "source_analysis";

pub const REPORT_SYSTEM: &str = "You are a careful research writer. You only state what the \
supplied findings support and you never invent sources or citations.";

/// How sub-questions should be phrased for the given mode.
fn phrasing_rule(mode: SearchMode) -> &'static str {
    match mode {
        SearchMode::Web => {
            "Phrase each item as a specific natural-language question suitable for a web search engine."
        }
        SearchMode::Academic => {
            "Phrase each item as a short keyword phrase of 6-8 words for an academic paper search \
             engine. Drop stop-words and question words; use technical terms only."
        }
    }
}

pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sub_questions": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["sub_questions"],
        "additionalProperties": false
    })
}

pub fn plan_prompt(query: &str, mode: SearchMode) -> String {
    format!(
        "You are a research planner. Break the following research query into 3-5 specific \
         sub-questions that together answer it comprehensively.\n\n\
         Query: \"{query}\"\n\n\
         {rule}\n\n\
         Return a JSON object of the form {{\"sub_questions\": [\"...\", \"...\"]}}.",
        rule = phrasing_rule(mode),
    )
}

pub fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "key_findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "topic": {"type": "string"},
                        "details": {"type": "string"},
                        "source_title": {"type": "string"},
                        "source_url": {"type": "string"}
                    },
                    "required": ["topic", "details", "source_title", "source_url"],
                    "additionalProperties": false
                }
            },
            "further_research_needed": {"type": "boolean"},
            "follow_up_questions": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["key_findings", "further_research_needed", "follow_up_questions"],
        "additionalProperties": false
    })
}

pub fn analysis_prompt(
    query: &str,
    mode: SearchMode,
    sources: &[SourceRecord],
    content_chars: usize,
) -> String {
    let mut context = String::new();
    for (i, source) in sources.iter().enumerate() {
        let _ = write!(
            context,
            "[{n}] {title}\nURL: {url}\n{content}\n\n",
            n = i + 1,
            title = source.title,
            url = source.url,
            content = truncate_chars(&source.content, content_chars),
        );
    }

    format!(
        "You are a research analyst. Extract the key findings from the sources below that help \
         answer the query. Every finding must name the source it came from. Sources marked \
         [FULL CONTENT] contain the full page text and are more reliable than [SNIPPET] sources.\n\n\
         Query: \"{query}\"\n\n\
         Sources:\n{context}\
         Then judge whether the sources are sufficient to answer the query well. If they are not, \
         set further_research_needed to true and list 1-5 follow-up items that would fill the gaps. \
         {rule} If they are sufficient, set further_research_needed to false and return an empty \
         follow_up_questions list.",
        rule = phrasing_rule(mode),
    )
}

pub fn report_prompt(
    query: &str,
    plan: &[String],
    findings: &[KeyFinding],
    sources: &[SourceRecord],
) -> String {
    let mut findings_text = String::new();
    for finding in findings {
        let _ = writeln!(
            findings_text,
            "- {}: {} (Source: {})",
            finding.topic, finding.details, finding.source_title
        );
    }

    let mut citations = String::new();
    for (i, source) in sources.iter().enumerate() {
        let _ = writeln!(citations, "[{}] {} - {}", i + 1, source.title, source.url);
    }
    if citations.is_empty() {
        citations.push_str("(no sources were found)\n");
    }

    format!(
        "Write a research report answering the query below, in markdown.\n\n\
         Query: \"{query}\"\n\n\
         Research plan:\n{plan}\n\n\
         Key findings:\n{findings_text}\n\
         Available sources:\n{citations}\n\
         Rules:\n\
         1. Use ONLY the key findings above. Do not add facts from memory.\n\
         2. Cite sources inline with their [n] numbers from the list above. Never invent citations.\n\
         3. If an aspect of the query is not supported by the findings, say explicitly that \
         there is insufficient evidence for it.\n\
         4. Structure: Executive Summary, Key Findings, Detailed Analysis, Limitations.\n\
         5. Do NOT add a Sources or References section; it is appended separately.\n\
         6. Do not wrap the report in a code block.",
        plan = plan
            .iter()
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
