//! # Progress API
//!
//! Server-sent events for one job: every recorded event, then the live tail.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::{header, HeaderName},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures::StreamExt;
use reqflow_core::progress::{progress_stream, GatewayFrame, ProgressEvent};

use super::SharedState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Stream a job's progress as `text/event-stream`
#[utoipa::path(
    get,
    path = "/api/v1/documents/progress/{document_id}",
    tag = "progress",
    params(("document_id" = String, Path, description = "Job id returned by upload")),
    responses(
        (status = 200, description = "Event stream; `data:` frames carry progress events", content_type = "text/event-stream")
    )
)]
pub async fn progress_sse(
    State(state): State<SharedState>,
    Path(document_id): Path<String>,
) -> impl IntoResponse {
    tracing::info!(%document_id, "Progress stream requested");
    let frames = progress_stream(state.orchestrator.progress(), &document_id, state.gateway);
    let events = frames.map(|frame| Ok::<_, Infallible>(to_sse(frame)));

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(events),
    )
}

fn to_sse(frame: GatewayFrame) -> Event {
    match frame {
        GatewayFrame::Comment(text) => Event::default().comment(text),
        GatewayFrame::Event(event) => {
            let json = serde_json::to_string(&event).unwrap_or_default();
            Event::default().data(json)
        }
    }
}

/// Recorded events for a job, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/documents/{document_id}/events",
    tag = "progress",
    params(("document_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Event history; empty for unknown or collected jobs", body = serde_json::Value)
    )
)]
pub async fn list_events(
    State(state): State<SharedState>,
    Path(document_id): Path<String>,
) -> Json<Vec<ProgressEvent>> {
    Json(state.orchestrator.progress().history(&document_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support;
    use reqflow_core::progress::{ProgressUpdate, Step};

    #[tokio::test]
    async fn test_stream_replays_and_closes_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let progress = state.orchestrator.progress();
        progress.append("doc-1", ProgressUpdate::processing(Step::Upload, "Uploading").with_progress(0, 2));
        progress.append("doc-1", ProgressUpdate::completed(Step::Upload, "Uploaded"));
        progress.append("doc-1", ProgressUpdate::completed(Step::Complete, "Done"));

        let response = progress_sse(State(state), Path("doc-1".to_string()))
            .await
            .into_response();
        let headers = response.headers().clone();
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.starts_with(":"));
        assert!(body.contains("connected"));

        let sequences: Vec<u64> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|json| serde_json::from_str::<ProgressEvent>(json.trim_start()).unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_events_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        state
            .orchestrator
            .progress()
            .append("doc-2", ProgressUpdate::processing(Step::Extract, "Extracting"));

        let Json(events) = list_events(State(state.clone()), Path("doc-2".to_string())).await;
        assert_eq!(events.len(), 1);
        let Json(unknown) = list_events(State(state), Path("nope".to_string())).await;
        assert!(unknown.is_empty());
    }
}
