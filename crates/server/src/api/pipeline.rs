//! # Pipeline API
//!
//! Each endpoint runs exactly one stage. The response body of one stage is
//! the request body of the next.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    Json,
};
use reqflow_core::pipeline::{
    AnalyzeOutput, ExtractOutput, GenerateOutput, GenerateRequest, PipelineContext, StoreOutput,
    StoreRequest, UploadInput, UploadOutput, UploadedFile,
};

use super::{run_detached, ApiResult, SharedState};

/// Upload files (multipart: `projectId`, optional `documentId`, one part per file)
#[utoipa::path(
    post,
    path = "/api/v1/documents/upload",
    tag = "documents",
    responses(
        (status = 200, description = "Stored files and page representations", body = serde_json::Value),
        (status = 400, description = "No files, too many files, or a file over the size limit", body = super::ErrorBody),
        (status = 500, description = "Storage is not configured", body = super::ErrorBody)
    )
)]
pub async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadOutput>> {
    let input = read_upload(&mut multipart).await?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let output = run_detached(async move { orchestrator.upload(input).await }).await?;
    Ok(Json(output))
}

async fn read_upload(multipart: &mut Multipart) -> ApiResult<UploadInput> {
    let mut project_id = String::new();
    let mut document_id = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field.bytes().await?;
                files.push(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            None => {
                let value = field.text().await?;
                match name.as_str() {
                    "projectId" => project_id = value.trim().to_string(),
                    "documentId" => document_id = Some(value.trim().to_string()),
                    other => tracing::debug!(field = other, "Ignoring form field"),
                }
            }
        }
    }

    // Missing fields are rejected by the stage so the job records the error
    Ok(UploadInput {
        project_id,
        document_id,
        files,
    })
}

/// Extract text from uploaded files
#[utoipa::path(
    post,
    path = "/api/v1/documents/extract",
    tag = "documents",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Documents with extracted content", body = serde_json::Value),
        (status = 502, description = "Model call failed", body = super::ErrorBody)
    )
)]
pub async fn extract(
    State(state): State<SharedState>,
    Json(context): Json<PipelineContext>,
) -> ApiResult<Json<ExtractOutput>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let output = run_detached(async move { orchestrator.extract(context).await }).await?;
    Ok(Json(output))
}

/// Find gaps; returns either a questionnaire or requirement drafts
#[utoipa::path(
    post,
    path = "/api/v1/documents/analyze",
    tag = "documents",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Gap analysis with questions or drafts", body = serde_json::Value),
        (status = 400, description = "No extracted content", body = super::ErrorBody),
        (status = 502, description = "Model call failed", body = super::ErrorBody)
    )
)]
pub async fn analyze(
    State(state): State<SharedState>,
    Json(context): Json<PipelineContext>,
) -> ApiResult<Json<AnalyzeOutput>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let output = run_detached(async move { orchestrator.analyze(context).await }).await?;
    Ok(Json(output))
}

/// Generate and store requirements from the analysis and questionnaire answers
#[utoipa::path(
    post,
    path = "/api/v1/documents/generate-requirements-from-document",
    tag = "documents",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Stored requirements and test case counts", body = serde_json::Value),
        (status = 502, description = "Model call failed", body = super::ErrorBody)
    )
)]
pub async fn generate_from_document(
    State(state): State<SharedState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateOutput>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let output =
        run_detached(async move { orchestrator.generate_from_answers(request).await }).await?;
    Ok(Json(output))
}

/// Store requirement drafts and complete the job
#[utoipa::path(
    post,
    path = "/api/v1/documents/store",
    tag = "documents",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Saved and failed counts", body = serde_json::Value),
        (status = 500, description = "No requirement could be saved", body = super::ErrorBody)
    )
)]
pub async fn store(
    State(state): State<SharedState>,
    Json(request): Json<StoreRequest>,
) -> ApiResult<Json<StoreOutput>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let output = run_detached(async move { orchestrator.store(request).await }).await?;
    Ok(Json(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{header, Request, StatusCode};
    use axum::response::IntoResponse;
    use reqflow_core::progress::{Step, StepStatus};
    use reqflow_core::skills::RequirementDraft;

    fn multipart_request(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, file_name, value) in parts {
            body.push_str("--XBOUNDARY\r\n");
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                    name, file_name
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str("--XBOUNDARY--\r\n");

        Request::builder()
            .method("POST")
            .uri("/api/v1/documents/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_upload_collects_fields_and_files() {
        let request = multipart_request(&[
            ("projectId", None, " proj "),
            ("documentId", None, "doc-1"),
            ("files", Some("a.txt"), "alpha"),
            ("files", Some("b.md"), "# Beta"),
        ]);
        let mut multipart = Multipart::from_request(request, &()).await.unwrap();

        let input = read_upload(&mut multipart).await.unwrap();
        assert_eq!(input.project_id, "proj");
        assert_eq!(input.document_id.as_deref(), Some("doc-1"));
        assert_eq!(input.files.len(), 2);
        assert_eq!(input.files[1].file_name, "b.md");
        assert_eq!(input.files[1].bytes, b"# Beta");
    }

    #[tokio::test]
    async fn test_upload_then_extract_over_http_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());

        let request = multipart_request(&[
            ("projectId", None, "proj"),
            ("documentId", None, "doc-1"),
            ("files", Some("brief.md"), "# Scope\nThe portal lists invoices."),
        ]);
        let multipart = Multipart::from_request(request, &()).await.unwrap();
        let Json(uploaded) = upload(State(state.clone()), multipart).await.unwrap();
        assert_eq!(uploaded.context.documents.len(), 1);

        let Json(extracted) = extract(State(state.clone()), Json(uploaded.context))
            .await
            .unwrap();
        let content = extracted.context.documents[0]
            .extracted_content
            .as_ref()
            .unwrap();
        assert!(content.text.contains("invoices"));

        let history = state.orchestrator.progress().history("doc-1");
        let last = history.last().unwrap();
        assert_eq!((last.step, last.status), (Step::Extract, StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_upload_without_project_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let request = multipart_request(&[("files", Some("a.txt"), "alpha")]);
        let multipart = Multipart::from_request(request, &()).await.unwrap();

        let response = upload(State(state), multipart).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = test_support::body_json(response).await;
        assert_eq!(body["kind"], "invalid_input_error");
    }

    #[tokio::test]
    async fn test_store_handler_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let request = StoreRequest {
            document_id: "doc-9".into(),
            project_id: "proj".into(),
            requirements: vec![RequirementDraft {
                title: "Invoice list".into(),
                description: "The portal shall list invoices".into(),
                priority: "high".into(),
                category: "functional".into(),
                acceptance_criteria: vec![],
                source: None,
            }],
        };

        let response = store(State(state), Json(request)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = test_support::body_json(response).await;
        assert_eq!(body["savedRequirements"], 1);
    }
}
