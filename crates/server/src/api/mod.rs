//! # HTTP API
//!
//! One endpoint per pipeline stage, the progress stream, and read-only views.
//!
//! ```text
//! POST /api/v1/documents/upload | extract | analyze | generate-requirements-from-document | store
//! GET  /api/v1/documents/progress/:document_id   (text/event-stream)
//! GET  /api/v1/documents/:document_id/events
//! GET  /api/v1/projects/:project_id/requirements
//! GET  /api/v1/openapi.json
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use reqflow_core::pipeline::Orchestrator;
use reqflow_core::progress::GatewaySettings;
use reqflow_core::{PipelineError, PipelineResult};
use utoipa::OpenApi;

pub mod error;
pub mod pipeline;
pub mod progress;
pub mod project;

pub use error::{ApiError, ApiResult, ErrorBody};

/// Application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub gateway: GatewaySettings,
}

pub type SharedState = Arc<AppState>;

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Reqflow API",
        version = "1.0.0",
        description = "Document to requirements pipeline with live progress"
    ),
    paths(
        pipeline::upload,
        pipeline::extract,
        pipeline::analyze,
        pipeline::generate_from_document,
        pipeline::store,
        progress::progress_sse,
        progress::list_events,
        project::list_requirements,
        project::list_test_cases
    ),
    components(schemas(ErrorBody)),
    tags(
        (name = "documents", description = "Pipeline stages"),
        (name = "progress", description = "Job progress"),
        (name = "projects", description = "Stored requirements")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(spec))
            .unwrap_or_default(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router(state: SharedState) -> Router {
    let limits = &state.orchestrator.config().limits;
    // Multipart framing on top of the largest allowed upload
    let upload_limit = (limits.max_file_bytes as usize)
        .saturating_mul(limits.max_files)
        .saturating_add(1024 * 1024);

    let document_routes = Router::new()
        .route(
            "/upload",
            post(pipeline::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/extract", post(pipeline::extract))
        .route("/analyze", post(pipeline::analyze))
        .route(
            "/generate-requirements-from-document",
            post(pipeline::generate_from_document),
        )
        .route("/store", post(pipeline::store))
        .route("/progress/:document_id", get(progress::progress_sse))
        .route("/:document_id/events", get(progress::list_events));

    let project_routes =
        Router::new().route("/:project_id/requirements", get(project::list_requirements));
    let requirement_routes =
        Router::new().route("/:requirement_id/test-cases", get(project::list_test_cases));

    Router::new()
        .nest("/api/v1/documents", document_routes)
        .nest("/api/v1/projects", project_routes)
        .nest("/api/v1/requirements", requirement_routes)
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

/// Run a stage on its own task so a dropped connection does not cancel it.
/// Progress keeps flowing to any stream subscriber either way.
pub async fn run_detached<T, F>(stage: F) -> ApiResult<T>
where
    F: Future<Output = PipelineResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(stage).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError(PipelineError::UpstreamService(format!(
            "Stage task ended unexpectedly: {}",
            e
        )))),
    }
}
