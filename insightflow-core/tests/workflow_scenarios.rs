//! End-to-end workflow scenarios driven by scripted gateways.

use async_trait::async_trait;
use insightflow_core::brain::{Brain, MockLlmProvider};
use insightflow_core::config::{AccumulationPolicy, InsightConfig, LlmConfig, RetryConfig};
use insightflow_core::error::{SearchError, WorkflowError};
use insightflow_core::research::analyze::NO_INFORMATION_TOPIC;
use insightflow_core::research::{
    NoOpObserver, ResearchEngine, ResearchRequest, ResearchState, Stage, Step, WorkflowObserver,
};
use insightflow_core::sources::{
    AcademicSearchProvider, Gateways, PageFetcher, SearchFilters, SourceRecord, WebSearchProvider,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// --- fakes ---

/// Returns `per_query` results for every query, titled after the query.
struct FakeWeb {
    per_query: usize,
    calls: AtomicUsize,
}

impl FakeWeb {
    fn new(per_query: usize) -> Self {
        Self {
            per_query,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WebSearchProvider for FakeWeb {
    fn name(&self) -> &str {
        "FakeWeb"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SourceRecord>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.per_query.min(max_results))
            .map(|i| SourceRecord {
                title: format!("{query} #{i}"),
                url: format!("https://example.com/{}/{i}", query.replace(' ', "-")),
                content: format!("snippet about {query}"),
                score: 1.0 - i as f64 * 0.1,
            })
            .collect())
    }
}

/// Academic backend with a fixed answer.
enum AcademicBehavior {
    AlwaysRateLimited,
    Papers(Vec<(String, u64)>),
}

struct FakeScholar {
    behavior: AcademicBehavior,
    calls: AtomicUsize,
}

impl FakeScholar {
    fn new(behavior: AcademicBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AcademicSearchProvider for FakeScholar {
    fn name(&self) -> &str {
        "Semantic Scholar"
    }

    async fn search(
        &self,
        _query: &str,
        _filters: &SearchFilters,
        _limit: usize,
    ) -> Result<Vec<SourceRecord>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            AcademicBehavior::AlwaysRateLimited => Err(SearchError::RateLimited {
                provider: "Semantic Scholar".into(),
            }),
            AcademicBehavior::Papers(papers) => Ok(papers
                .iter()
                .map(|(title, citations)| SourceRecord {
                    title: title.clone(),
                    url: format!("https://papers.example/{title}"),
                    content: format!("Abstract: about {title}\nCitations: {citations}"),
                    score: *citations as f64,
                })
                .collect()),
        }
    }
}

struct FakeFetcher;

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _max_chars: usize) -> Result<String, SearchError> {
        Ok(format!("full text of {url}"))
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<(&'static str, Stage, Step)>>,
}

impl RecordingObserver {
    fn completed_stages(&self) -> Vec<Stage> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _, _)| *kind == "complete")
            .map(|(_, stage, _)| *stage)
            .collect()
    }
}

impl WorkflowObserver for RecordingObserver {
    fn on_stage_start(&self, stage: Stage, state: &ResearchState) {
        self.events.lock().unwrap().push(("start", stage, state.current_step));
    }

    fn on_stage_complete(&self, stage: Stage, state: &ResearchState) {
        self.events.lock().unwrap().push(("complete", stage, state.current_step));
    }
}

// --- helpers ---

fn test_config() -> InsightConfig {
    let mut config = InsightConfig::default();
    config.academic.courtesy_delay_ms = 0;
    config.academic.backoff_step_ms = 0;
    config
}

fn engine(
    llm: Arc<MockLlmProvider>,
    web: Arc<FakeWeb>,
    academic: Arc<FakeScholar>,
    config: InsightConfig,
) -> ResearchEngine {
    let brain = Brain::new(llm, &LlmConfig::default()).with_retry_config(RetryConfig {
        max_retries: 0,
        ..Default::default()
    });
    let gateways = Gateways {
        brain,
        web,
        academic,
        fetcher: Arc::new(FakeFetcher),
    };
    ResearchEngine::new(gateways, config)
}

fn plan_reply(questions: &[&str]) -> serde_json::Value {
    json!({ "sub_questions": questions })
}

fn analysis_reply(topic: &str, more: bool, follow_ups: &[&str]) -> serde_json::Value {
    json!({
        "key_findings": [{
            "topic": topic,
            "details": format!("details on {topic}"),
            "source_title": "some source",
            "source_url": "https://example.com"
        }],
        "further_research_needed": more,
        "follow_up_questions": follow_ups,
    })
}

fn no_papers() -> Arc<FakeScholar> {
    Arc::new(FakeScholar::new(AcademicBehavior::Papers(Vec::new())))
}

// --- scenarios ---

#[tokio::test]
async fn zero_web_results_produce_no_information_finding_and_report() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&[
        "How is AI used in classrooms?",
        "What outcomes are measured?",
        "What are the risks?",
    ]));
    llm.queue_text("# Executive Summary\nThere is insufficient evidence to assess this topic.");

    let web = Arc::new(FakeWeb::new(0));
    let engine = engine(llm.clone(), web.clone(), no_papers(), test_config());

    let state = engine
        .run(ResearchRequest::new("impact of AI on education"), &NoOpObserver)
        .await
        .unwrap();

    assert_eq!(web.calls.load(Ordering::SeqCst), 3);
    assert_eq!(state.search_results.len(), 3);
    assert_eq!(state.source_count(), 0);
    assert_eq!(state.key_findings.len(), 1);
    assert_eq!(state.key_findings[0].topic, NO_INFORMATION_TOPIC);
    assert_eq!(state.loop_count, 0);
    assert!(!state.report.is_empty());
    assert_eq!(state.current_step, Step::ReportComplete);
    // Plan and Report only; Analyze short-circuits without a model call.
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn academic_rate_limit_on_every_attempt_degrades_to_empty_results() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["llm tutoring learning outcomes", "automated grading reliability"]));
    llm.queue_text("# Report\nNo papers could be retrieved; evidence is lacking.");

    let scholar = Arc::new(FakeScholar::new(AcademicBehavior::AlwaysRateLimited));
    let engine = engine(llm, Arc::new(FakeWeb::new(3)), scholar.clone(), test_config());

    let state = engine
        .run(
            ResearchRequest::academic("AI in education", SearchFilters::default()),
            &NoOpObserver,
        )
        .await
        .unwrap();

    assert_eq!(scholar.calls.load(Ordering::SeqCst), 6);
    assert_eq!(state.search_results.len(), 2);
    assert!(state.search_results.iter().all(|q| q.sources.is_empty()));
    for question in &state.research_plan {
        let notices = state
            .logs
            .iter()
            .filter(|l| l.starts_with("Rate limited (429)") && l.contains(question.as_str()))
            .count();
        assert_eq!(notices, 3, "retry notices for '{question}'");
        assert!(
            state
                .logs
                .iter()
                .any(|l| l.starts_with("Giving up") && l.contains(question.as_str()))
        );
    }
    assert_eq!(state.current_step, Step::ReportComplete);
}

#[tokio::test]
async fn persistent_insufficiency_stops_after_three_loops() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["initial question"]));
    for i in 1..=4 {
        llm.queue_json(analysis_reply(
            &format!("finding {i}"),
            true,
            &[format!("follow-up {i}").as_str()],
        ));
    }
    llm.queue_text("# Report\nFinal.");

    let web = Arc::new(FakeWeb::new(2));
    let engine = engine(llm.clone(), web.clone(), no_papers(), test_config());
    let observer = RecordingObserver::default();

    let state = engine
        .run(ResearchRequest::new("battery recycling economics"), &observer)
        .await
        .unwrap();

    assert_eq!(state.loop_count, 3);
    assert_eq!(state.current_step, Step::ReportComplete);
    // Plan + 4 Analyze + Report.
    assert_eq!(llm.call_count(), 6);
    assert_eq!(web.calls.load(Ordering::SeqCst), 4);
    // The plan holds the last accepted follow-ups; the fourth request was refused.
    assert_eq!(state.research_plan, vec!["follow-up 3"]);
    assert_eq!(state.key_findings[0].topic, "finding 4");
    assert!(state.logs.iter().any(|l| l.contains("limit of 3 reached")));

    use Stage::*;
    assert_eq!(
        observer.completed_stages(),
        vec![Plan, Gather, Analyze, Gather, Analyze, Gather, Analyze, Gather, Analyze, Report]
    );
}

#[tokio::test]
async fn one_loop_then_sufficient() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["q1", "q2"]));
    llm.queue_json(analysis_reply("partial", true, &["gap question"]));
    llm.queue_json(analysis_reply("complete", false, &[]));
    llm.queue_text("# Report\nDone.");

    let engine = engine(llm, Arc::new(FakeWeb::new(1)), no_papers(), test_config());
    let observer = RecordingObserver::default();
    let state = engine
        .run(ResearchRequest::new("q"), &observer)
        .await
        .unwrap();

    assert_eq!(state.loop_count, 1);
    // Replace policy: only the re-searched question remains.
    let questions: Vec<_> = state.search_results.iter().map(|q| q.question.as_str()).collect();
    assert_eq!(questions, vec!["gap question"]);
    let looped = observer
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|(kind, stage, step)| *kind == "complete" && *stage == Stage::Analyze && *step == Step::Looping);
    assert!(looped);
}

#[tokio::test]
async fn accumulate_policy_keeps_earlier_results_and_findings() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["q1", "q2"]));
    llm.queue_json(analysis_reply("first pass", true, &["gap question"]));
    llm.queue_json(analysis_reply("second pass", false, &[]));
    llm.queue_text("# Report\nDone.");

    let mut config = test_config();
    config.research.accumulation = AccumulationPolicy::Accumulate;
    let engine = engine(llm, Arc::new(FakeWeb::new(1)), no_papers(), config);
    let state = engine
        .run(ResearchRequest::new("q"), &NoOpObserver)
        .await
        .unwrap();

    let questions: Vec<_> = state.search_results.iter().map(|q| q.question.as_str()).collect();
    assert_eq!(questions, vec!["q1", "q2", "gap question"]);
    let topics: Vec<_> = state.key_findings.iter().map(|f| f.topic.as_str()).collect();
    assert_eq!(topics, vec!["first pass", "second pass"]);
}

#[tokio::test]
async fn academic_results_respect_min_citations() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["graph neural networks drug discovery"]));
    llm.queue_json(analysis_reply("gnn", false, &[]));
    llm.queue_text("# Report\nText.");

    let scholar = Arc::new(FakeScholar::new(AcademicBehavior::Papers(vec![
        ("landmark".into(), 900),
        ("borderline".into(), 50),
        ("niche".into(), 49),
        ("new".into(), 0),
    ])));
    let engine = engine(llm, Arc::new(FakeWeb::new(3)), scholar, test_config());
    let filters = SearchFilters {
        min_citations: 50,
        open_access: true,
    };
    let state = engine
        .run(ResearchRequest::academic("gnn drug discovery", filters), &NoOpObserver)
        .await
        .unwrap();

    assert!(state.sources().all(|s| s.score >= 50.0));
    let titles: Vec<_> = state.sources().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["landmark", "borderline"]);
}

#[tokio::test]
async fn web_gather_deep_fetches_top_result_only() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["solar adoption"]));
    llm.queue_json(analysis_reply("solar", false, &[]));
    llm.queue_text("# Report\nText.");

    let engine = engine(llm, Arc::new(FakeWeb::new(3)), no_papers(), test_config());
    let state = engine
        .run(ResearchRequest::new("solar"), &NoOpObserver)
        .await
        .unwrap();

    let sources = &state.search_results[0].sources;
    assert_eq!(sources.len(), 3);
    assert!(sources[0].content.starts_with("[FULL CONTENT] full text of"));
    assert!(sources[1..].iter().all(|s| s.content.starts_with("[SNIPPET] ")));
}

#[tokio::test]
async fn fenced_report_is_unwrapped() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["q1"]));
    llm.queue_json(analysis_reply("t", false, &[]));
    llm.queue_text("```\nmarkdown\n# Executive Summary\nBody\n```");

    let engine = engine(llm, Arc::new(FakeWeb::new(1)), no_papers(), test_config());
    let state = engine
        .run(ResearchRequest::new("q"), &NoOpObserver)
        .await
        .unwrap();

    assert_eq!(state.report, "# Executive Summary\nBody");
    assert!(!state.report.starts_with("```"));
    assert!(!state.report.ends_with("```"));
}

#[tokio::test]
async fn planner_failure_falls_back_and_run_continues() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_text("not json at all");
    llm.queue_json(analysis_reply("t", false, &[]));
    llm.queue_text("# Report\nText.");

    let web = Arc::new(FakeWeb::new(1));
    let engine = engine(llm, web.clone(), no_papers(), test_config());
    let state = engine
        .run(ResearchRequest::new("heat pumps"), &NoOpObserver)
        .await
        .unwrap();

    assert_eq!(
        state.research_plan,
        vec!["heat pumps overview", "heat pumps statistics", "heat pumps latest news"]
    );
    assert_eq!(web.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_query_is_rejected_before_plan() {
    let llm = Arc::new(MockLlmProvider::new());
    let engine = engine(llm.clone(), Arc::new(FakeWeb::new(1)), no_papers(), test_config());
    let err = engine
        .run(ResearchRequest::new("  "), &NoOpObserver)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::EmptyQuery));
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn report_failure_ends_the_run() {
    let llm = Arc::new(MockLlmProvider::new());
    llm.queue_json(plan_reply(&["q1"]));
    llm.queue_json(analysis_reply("t", false, &[]));
    llm.queue_error(insightflow_core::error::LlmError::ApiRequest {
        message: "upstream 500".into(),
    });

    let engine = engine(llm, Arc::new(FakeWeb::new(1)), no_papers(), test_config());
    let observer = RecordingObserver::default();
    let err = engine
        .run(ResearchRequest::new("q"), &observer)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ReportFailed { .. }));
    // Report started but never completed.
    assert_eq!(observer.completed_stages().last(), Some(&Stage::Analyze));
}
