//! Subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use insightflow_core::config::{ConfigOverrides, ServerOverrides, load_config};
use insightflow_core::gateway::{self, GatewayState};
use insightflow_core::jobs::ResearchResult;
use insightflow_core::{
    Gateways, InsightConfig, JobTracker, ResearchEngine, ResearchRequest, ResearchState,
    SearchFilters, SearchMode, Stage, WorkflowObserver,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Serve { host, port } => handle_serve(host, port, workspace).await,
        Commands::Research {
            query,
            academic,
            min_citations,
            open_access,
            json,
        } => {
            let request = ResearchRequest {
                query,
                search_mode: if academic {
                    SearchMode::Academic
                } else {
                    SearchMode::Web
                },
                filters: SearchFilters {
                    min_citations,
                    open_access,
                },
            };
            handle_research(request, json, workspace).await
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path, overrides: Option<&ConfigOverrides>) -> anyhow::Result<InsightConfig> {
    load_config(Some(workspace), overrides)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

async fn handle_serve(
    host: Option<String>,
    port: Option<u16>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        server: ServerOverrides { host, port },
        ..Default::default()
    };
    let config = load(workspace, Some(&overrides))?;

    let gateways = Gateways::from_config(&config)?;
    info!(
        model = %config.llm.model,
        max_loops = config.research.loop_cap(),
        "Research engine ready"
    );
    let engine = Arc::new(ResearchEngine::new(gateways, config.clone()));
    let state = Arc::new(GatewayState::new(JobTracker::in_memory(engine), &config));

    gateway::run(state, &config.server.host, config.server.port).await?;
    Ok(())
}

async fn handle_research(
    request: ResearchRequest,
    json: bool,
    workspace: &Path,
) -> anyhow::Result<()> {
    if request.query.trim().is_empty() {
        anyhow::bail!("Research query must not be empty");
    }

    let config = load(workspace, None)?;
    let gateways = Gateways::from_config(&config)?;
    let engine = ResearchEngine::new(gateways, config.clone());

    let observer = ConsoleObserver::default();
    let state = engine.run(request, &observer).await?;
    let result = ResearchResult::from_state(&state, config.research.result_source_limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", render_report(&result));
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".insightflow");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&InsightConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = redact(load(workspace, None)?);
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Mask inline secrets before printing.
fn redact(mut config: InsightConfig) -> InsightConfig {
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("********".into());
    }
    config
}

/// Markdown report followed by a numbered source list.
fn render_report(result: &ResearchResult) -> String {
    let mut out = result.report.trim_end().to_string();
    if !result.sources.is_empty() {
        out.push_str("\n\n## Sources\n");
        for (i, source) in result.sources.iter().enumerate() {
            out.push_str(&format!("{}. {} <{}>\n", i + 1, source.title, source.url));
        }
    }
    out
}

/// Streams the run's trace lines to stderr as each stage finishes.
#[derive(Default)]
struct ConsoleObserver {
    printed: AtomicUsize,
}

impl ConsoleObserver {
    fn pending_lines<'a>(&self, state: &'a ResearchState) -> &'a [String] {
        let start = self.printed.swap(state.logs.len(), Ordering::SeqCst);
        state.logs.get(start..).unwrap_or_default()
    }
}

impl WorkflowObserver for ConsoleObserver {
    fn on_stage_start(&self, stage: Stage, state: &ResearchState) {
        eprintln!("==> {} ({})", state.current_step, stage);
    }

    fn on_stage_complete(&self, _stage: Stage, state: &ResearchState) {
        for line in self.pending_lines(state) {
            eprintln!("    {line}");
        }
    }
}
