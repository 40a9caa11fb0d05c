//! Error types for the InsightFlow core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM gateway, source gateways, configuration, and the
//! research workflow itself.

/// Top-level error type for the InsightFlow core library.
#[derive(Debug, thiserror::Error)]
pub enum InsightError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from web search, academic search, and page fetch gateways.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("{provider} API key is not configured")]
    MissingApiKey { provider: String },

    #[error("{provider} rate limited the request (HTTP 429)")]
    RateLimited { provider: String },

    #[error("{provider} returned HTTP {status}")]
    Http { provider: String, status: u16 },

    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("Failed to parse {provider} response: {message}")]
    Parse { provider: String, message: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {field} {message}")]
    Invalid { field: String, message: String },
}

/// Errors raised by the research workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Research query must not be empty")]
    EmptyQuery,

    #[error("Report generation failed: {message}")]
    ReportFailed { message: String },

    #[error("Report generation produced an empty document")]
    EmptyReport,

    #[error("Workflow task panicked: {message}")]
    Panicked { message: String },
}

/// A type alias for results using the top-level `InsightError`.
pub type Result<T> = std::result::Result<T, InsightError>;
