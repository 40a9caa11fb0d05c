//! # HTTP Gateway
//!
//! REST API over the job tracker: submit research, poll status, fetch
//! results, list jobs, health, and an upload stub. JSON field names are
//! snake_case.

mod server;

pub use server::{router, run};

use crate::config::InsightConfig;
use crate::jobs::JobTracker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which credentials were configured at startup. The server starts without
/// them; jobs then fail with an authentication error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthFlags {
    pub llm_api_key_set: bool,
    pub search_api_key_set: bool,
}

impl HealthFlags {
    pub fn from_config(config: &InsightConfig) -> Self {
        Self {
            llm_api_key_set: config.llm.resolve_api_key().is_some(),
            search_api_key_set: config.search.resolve_api_key().is_some(),
        }
    }
}

/// State shared by every handler.
pub struct GatewayState {
    pub tracker: JobTracker,
    pub health: HealthFlags,
    pub cors_origins: Vec<String>,
}

impl GatewayState {
    pub fn new(tracker: JobTracker, config: &InsightConfig) -> Self {
        Self {
            tracker,
            health: HealthFlags::from_config(config),
            cors_origins: config.server.cors_origins.clone(),
        }
    }
}

/// Thread-safe shared gateway state for axum handlers.
pub type SharedState = Arc<GatewayState>;
