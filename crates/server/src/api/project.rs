//! # Project API
//!
//! Read-only views over stored requirements and their test cases.

use axum::{
    extract::{Path, State},
    Json,
};
use reqflow_core::state::{RequirementRepository, StoredRequirement, StoredTestCase};

use super::{ApiResult, SharedState};

/// Requirements stored for a project, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/requirements",
    tag = "projects",
    params(("project_id" = String, Path, description = "Owning project")),
    responses(
        (status = 200, description = "Stored requirements", body = serde_json::Value),
        (status = 500, description = "Database error", body = super::ErrorBody)
    )
)]
pub async fn list_requirements(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<StoredRequirement>>> {
    let requirements = state
        .orchestrator
        .repository()
        .list_requirements(&project_id)
        .await?;
    Ok(Json(requirements))
}

#[utoipa::path(
    get,
    path = "/api/v1/requirements/{requirement_id}/test-cases",
    tag = "projects",
    params(("requirement_id" = String, Path, description = "Parent requirement")),
    responses(
        (status = 200, description = "Stored test cases", body = serde_json::Value),
        (status = 404, description = "Unknown requirement", body = super::ErrorBody),
        (status = 500, description = "Database error", body = super::ErrorBody)
    )
)]
pub async fn list_test_cases(
    State(state): State<SharedState>,
    Path(requirement_id): Path<String>,
) -> ApiResult<Json<Vec<StoredTestCase>>> {
    let cases = state
        .orchestrator
        .repository()
        .list_test_cases(&requirement_id)
        .await?;
    Ok(Json(cases))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support;
    use reqflow_core::skills::{RequirementDraft, TestCaseDraft};

    #[tokio::test]
    async fn test_lists_only_the_projects_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let repository = state.orchestrator.repository();
        let draft = RequirementDraft {
            title: "Invoice list".into(),
            description: "The portal shall list invoices".into(),
            priority: "medium".into(),
            category: "functional".into(),
            acceptance_criteria: vec![],
            source: None,
        };
        repository.create_requirement("proj", Some("doc-1"), &draft).await.unwrap();
        repository.create_requirement("other", None, &draft).await.unwrap();

        let Json(listed) = list_requirements(State(state.clone()), Path("proj".to_string()))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_id, "proj");
    }

    #[tokio::test]
    async fn test_lists_test_cases_of_a_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path());
        let repository = state.orchestrator.repository();
        let draft = RequirementDraft {
            title: "Export".into(),
            description: "The portal shall export invoices".into(),
            priority: "low".into(),
            category: "functional".into(),
            acceptance_criteria: vec![],
            source: None,
        };
        let requirement = repository.create_requirement("proj", None, &draft).await.unwrap();
        let case = TestCaseDraft {
            title: "Export as CSV".into(),
            description: "Exports the invoice list".into(),
            preconditions: vec![],
            steps: vec!["Click export".into()],
            expected_result: "A CSV file downloads".into(),
            priority: "low".into(),
        };
        repository.create_test_case(&requirement.id, &case).await.unwrap();

        let Json(cases) = list_test_cases(State(state.clone()), Path(requirement.id.clone()))
            .await
            .unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].draft.title, "Export as CSV");

        let missing = list_test_cases(State(state), Path("nope".to_string())).await;
        assert!(missing.is_err());
    }
}
