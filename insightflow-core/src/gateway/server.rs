//! REST server built on axum.

use super::SharedState;
use crate::jobs::ResultLookup;
use crate::research::{ResearchRequest, SearchMode};
use crate::sources::SearchFilters;
use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Body of `POST /api/research`.
#[derive(Debug, Deserialize)]
struct CreateResearchBody {
    #[serde(default)]
    query: String,
    #[serde(default)]
    search_mode: SearchMode,
    #[serde(default)]
    min_citations: u32,
    #[serde(default)]
    open_access: bool,
}

impl From<CreateResearchBody> for ResearchRequest {
    fn from(body: CreateResearchBody) -> Self {
        ResearchRequest {
            query: body.query,
            search_mode: body.search_mode,
            filters: SearchFilters {
                min_citations: body.min_citations,
                open_access: body.open_access,
            },
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn job_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Job not found")
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the axum Router with all `/api` routes.
pub fn router(state: SharedState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/api/research", post(create_research_handler))
        .route("/api/status/{job_id}", get(status_handler))
        .route("/api/result/{job_id}", get(result_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/api/health", get(health_handler))
        .route("/api/upload", post(upload_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start a research job.
async fn create_research_handler(
    State(state): State<SharedState>,
    Json(body): Json<CreateResearchBody>,
) -> Response {
    match state.tracker.create(body.into()) {
        Ok(job_id) => Json(json!({ "job_id": job_id, "status": "processing" })).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Job record snapshot.
async fn status_handler(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return job_not_found();
    };
    match state.tracker.get_status(&id) {
        Some(record) => Json(record).into_response(),
        None => job_not_found(),
    }
}

/// Final payload of a completed job.
async fn result_handler(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return job_not_found();
    };
    match state.tracker.get_result(&id) {
        ResultLookup::Ready(result) => Json(result).into_response(),
        ResultLookup::NotCompleted(status) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Job not completed yet", "status": status })),
        )
            .into_response(),
        ResultLookup::NotFound => job_not_found(),
    }
}

/// All jobs, newest first.
async fn jobs_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let jobs = state.tracker.list();
    Json(json!({ "total": jobs.len(), "jobs": jobs }))
}

/// Health check endpoint.
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "llm_api_key_set": state.health.llm_api_key_set,
        "search_api_key_set": state.health.search_api_key_set,
    }))
}

/// Accepts a file and acknowledges it. Contents are not parsed.
async fn upload_handler(mut multipart: Multipart) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
        };
        if let Some(filename) = field.file_name().map(str::to_string) {
            info!(filename = %filename, "Upload received");
            return Json(json!({ "filename": filename, "status": "uploaded" })).into_response();
        }
    }
    error_response(StatusCode::BAD_REQUEST, "No file provided")
}

/// Start the HTTP server on the configured address.
///
/// Runs until Ctrl-C.
pub async fn run(state: SharedState, host: &str, port: u16) -> Result<(), std::io::Error> {
    let app = router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "InsightFlow API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_defaults() {
        let body: CreateResearchBody =
            serde_json::from_str(r#"{"query": "impact of AI on education"}"#).unwrap();
        let request: ResearchRequest = body.into();
        assert_eq!(request.search_mode, SearchMode::Web);
        assert_eq!(request.filters, SearchFilters::default());
    }

    #[test]
    fn test_body_academic() {
        let body: CreateResearchBody = serde_json::from_str(
            r#"{"query": "q", "search_mode": "academic", "min_citations": 10, "open_access": true}"#,
        )
        .unwrap();
        let request: ResearchRequest = body.into();
        assert_eq!(request.search_mode, SearchMode::Academic);
        assert_eq!(request.filters.min_citations, 10);
        assert!(request.filters.open_access);
    }

    #[test]
    fn test_cors_layer_skips_invalid_origins() {
        let _layer = cors_layer(&["http://localhost:3000".into(), "bad\norigin".into()]);
    }
}
