//! Persistence boundary for requirements and their test cases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::skills::{RequirementDraft, TestCaseDraft};

/// A persisted requirement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredRequirement {
    pub id: String,
    pub project_id: String,
    /// Document the requirement was generated from, when known
    pub document_id: Option<String>,
    #[serde(flatten)]
    pub draft: RequirementDraft,
    pub created_at: DateTime<Utc>,
}

/// A persisted test case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredTestCase {
    pub id: String,
    pub requirement_id: String,
    #[serde(flatten)]
    pub draft: TestCaseDraft,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait RequirementRepository: Send + Sync {
    async fn create_requirement(
        &self,
        project_id: &str,
        document_id: Option<&str>,
        draft: &RequirementDraft,
    ) -> PipelineResult<StoredRequirement>;

    async fn create_test_case(
        &self,
        requirement_id: &str,
        draft: &TestCaseDraft,
    ) -> PipelineResult<StoredTestCase>;

    /// Requirements of a project, oldest first
    async fn list_requirements(&self, project_id: &str) -> PipelineResult<Vec<StoredRequirement>>;

    /// Test cases of a requirement; `NotFound` when the requirement is unknown
    async fn list_test_cases(&self, requirement_id: &str) -> PipelineResult<Vec<StoredTestCase>>;
}
