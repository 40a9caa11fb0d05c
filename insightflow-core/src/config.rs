//! Configuration system for InsightFlow.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/insightflow/config.toml` and/or
//! `.insightflow/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hard upper bound on loop-backs from Analyze to Gather.
pub const MAX_LOOPS: u32 = 3;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub academic: AcademicConfig,
    pub research: ResearchConfig,
    pub server: ServerConfig,
}

impl InsightConfig {
    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::Invalid {
            field: field.to_string(),
            message: message.to_string(),
        };
        if self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model", "must not be empty"));
        }
        if self.search.max_results_per_query == 0 {
            return Err(invalid("search.max_results_per_query", "must be at least 1"));
        }
        if self.academic.max_results_per_query == 0 {
            return Err(invalid("academic.max_results_per_query", "must be at least 1"));
        }
        if self.academic.max_attempts == 0 {
            return Err(invalid("academic.max_attempts", "must be at least 1"));
        }
        if self.server.host.trim().is_empty() {
            return Err(invalid("server.host", "must not be empty"));
        }
        Ok(())
    }
}

/// Configuration for the language model gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openrouter", "openai", "groq", "ollama". All speak the
    /// OpenAI chat completions format.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key. Takes precedence over `api_key_env` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4000,
            temperature: 0.7,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Base URL for the configured provider, honoring an explicit override.
    pub fn resolved_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1",
            "groq" => "https://api.groq.com/openai/v1",
            "ollama" => "http://localhost:11434/v1",
            _ => "https://openrouter.ai/api/v1",
        }
        .to_string()
    }

    /// Resolve the API key from the explicit value or the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Retry policy for transient LLM errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Configuration for the web search gateway (Tavily) and page fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Environment variable name containing the Tavily API key.
    pub api_key_env: String,
    /// Base URL of the search API.
    pub base_url: String,
    /// Results requested per sub-question.
    pub max_results_per_query: usize,
    /// Maximum characters kept from each result snippet.
    pub snippet_max_chars: usize,
    /// Whether to fetch the full page of the top-ranked result.
    pub deep_fetch: bool,
    /// Maximum characters kept from a fetched page.
    pub fetch_max_chars: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "TAVILY_API_KEY".to_string(),
            base_url: "https://api.tavily.com".to_string(),
            max_results_per_query: 3,
            snippet_max_chars: 1000,
            deep_fetch: true,
            fetch_max_chars: 5000,
            timeout_secs: 10,
        }
    }
}

impl SearchConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Configuration for the academic search gateway (Semantic Scholar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicConfig {
    /// Base URL of the Semantic Scholar Graph API.
    pub base_url: String,
    /// Optional environment variable holding an API key (raises rate limits).
    pub api_key_env: String,
    /// Papers requested per sub-question.
    pub max_results_per_query: usize,
    /// Attempts per sub-question when the backend answers HTTP 429.
    pub max_attempts: u32,
    /// Linear backoff step: the n-th retry waits `n * backoff_step_ms`.
    pub backoff_step_ms: u64,
    /// Fixed delay before every attempt.
    pub courtesy_delay_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AcademicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.semanticscholar.org/graph/v1".to_string(),
            api_key_env: "SEMANTIC_SCHOLAR_API_KEY".to_string(),
            max_results_per_query: 5,
            max_attempts: 3,
            backoff_step_ms: 2000,
            courtesy_delay_ms: 1000,
            timeout_secs: 10,
        }
    }
}

impl AcademicConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Whether results and findings from earlier loop iterations are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulationPolicy {
    /// Each Gather/Analyze replaces the previous iteration's output.
    #[default]
    Replace,
    /// Results are merged per sub-question and findings are appended.
    Accumulate,
}

impl std::fmt::Display for AccumulationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccumulationPolicy::Replace => write!(f, "replace"),
            AccumulationPolicy::Accumulate => write!(f, "accumulate"),
        }
    }
}

/// Configuration for the research pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum loop-backs from Analyze to Gather. Clamped to [`MAX_LOOPS`].
    pub max_loops: u32,
    /// Sources included in the analysis prompt.
    pub analysis_source_limit: usize,
    /// Characters kept from each source in the analysis prompt.
    pub analysis_content_chars: usize,
    /// Sources included in the report citation list.
    pub report_source_limit: usize,
    /// Sources returned in the final job result.
    pub result_source_limit: usize,
    /// Whether loop iterations replace or accumulate earlier output.
    pub accumulation: AccumulationPolicy,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_loops: MAX_LOOPS,
            analysis_source_limit: 10,
            analysis_content_chars: 1500,
            report_source_limit: 15,
            result_source_limit: 10,
            accumulation: AccumulationPolicy::Replace,
        }
    }
}

impl ResearchConfig {
    /// Effective loop cap, never above [`MAX_LOOPS`].
    pub fn loop_cap(&self) -> u32 {
        self.max_loops.min(MAX_LOOPS)
    }
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Origins allowed by CORS.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Command-line overrides. Only fields that are set replace lower layers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "LlmOverrides::is_empty")]
    pub llm: LlmOverrides,
    #[serde(skip_serializing_if = "ServerOverrides::is_empty")]
    pub server: ServerOverrides,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl LlmOverrides {
    fn is_empty(&self) -> bool {
        self.provider.is_none() && self.model.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ServerOverrides {
    fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none()
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (only the fields they set)
/// 2. Environment variables (prefixed with `INSIGHTFLOW_`)
/// 3. Workspace-local config (`.insightflow/config.toml`)
/// 4. User config (`~/.config/insightflow/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<InsightConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(InsightConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "insightflow", "insightflow") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".insightflow").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // INSIGHTFLOW_LLM__MODEL, INSIGHTFLOW_SERVER__PORT, etc.
    figment = figment.merge(Env::prefixed("INSIGHTFLOW_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InsightConfig::default();
        assert_eq!(config.llm.provider, "openrouter");
        assert_eq!(config.llm.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(config.search.max_results_per_query, 3);
        assert_eq!(config.academic.max_attempts, 3);
        assert_eq!(config.academic.backoff_step_ms, 2000);
        assert_eq!(config.research.max_loops, 3);
        assert_eq!(config.research.accumulation, AccumulationPolicy::Replace);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_validate() {
        assert!(InsightConfig::default().validate().is_ok());

        let mut config = InsightConfig::default();
        config.academic.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("academic.max_attempts"));

        let mut config = InsightConfig::default();
        config.llm.model = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_loop_cap_is_clamped() {
        let config = ResearchConfig {
            max_loops: 10,
            ..Default::default()
        };
        assert_eq!(config.loop_cap(), MAX_LOOPS);

        let config = ResearchConfig {
            max_loops: 1,
            ..Default::default()
        };
        assert_eq!(config.loop_cap(), 1);
    }

    #[test]
    fn test_resolved_base_url() {
        let mut config = LlmConfig::default();
        assert_eq!(config.resolved_base_url(), "https://openrouter.ai/api/v1");

        config.provider = "groq".into();
        assert_eq!(config.resolved_base_url(), "https://api.groq.com/openai/v1");

        config.base_url = Some("http://localhost:8080/v1/".into());
        assert_eq!(config.resolved_base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = LlmConfig {
            api_key: Some("sk-explicit".into()),
            api_key_env: "INSIGHTFLOW_TEST_UNSET_KEY_VAR".into(),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-explicit"));

        let config = LlmConfig {
            api_key: Some("   ".into()),
            api_key_env: "INSIGHTFLOW_TEST_UNSET_KEY_VAR".into(),
            ..Default::default()
        };
        assert!(config.resolve_api_key().is_none());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = InsightConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: InsightConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(deserialized.research.accumulation, config.research.accumulation);
        assert_eq!(deserialized.server.cors_origins, config.server.cors_origins);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let overrides = ConfigOverrides {
            llm: LlmOverrides {
                model: Some("meta-llama/llama-3.1-70b-instruct".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "meta-llama/llama-3.1-70b-instruct");
        assert_eq!(config.llm.provider, "openrouter");
    }

    #[test]
    fn test_overrides_keep_workspace_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".insightflow");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[research]\naccumulation = \"accumulate\"\n\n[server]\nport = 9100\n",
        )
        .unwrap();

        let overrides = ConfigOverrides {
            server: ServerOverrides {
                host: Some("0.0.0.0".into()),
                port: None,
            },
            ..Default::default()
        };
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.research.accumulation, AccumulationPolicy::Accumulate);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".insightflow");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[llm]
model = "moonshotai/kimi-k2-instruct"

[research]
accumulation = "accumulate"
report_source_limit = 20

[server]
port = 9100
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.llm.model, "moonshotai/kimi-k2-instruct");
        assert_eq!(config.research.accumulation, AccumulationPolicy::Accumulate);
        assert_eq!(config.research.report_source_limit, 20);
        assert_eq!(config.server.port, 9100);
        // Untouched sections keep their defaults.
        assert_eq!(config.academic.max_attempts, 3);
    }
}
