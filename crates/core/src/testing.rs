//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Attachment, GenerativeModel};
use crate::skills::{RequirementDraft, TestCaseDraft};
use crate::state::{RequirementRepository, StoredRequirement, StoredTestCase};
use crate::storage::BlobStore;

// Phrases that identify each bundled prompt
pub const GAP_MARKER: &str = "Classify every gap";
pub const GENERIC_MARKER: &str = "stakeholder interview";
pub const TARGETED_MARKER: &str = "close specific gaps";
pub const REQUIREMENTS_MARKER: &str = "Turn the source material below into atomic";
pub const ANSWERS_MARKER: &str = "answered the follow-up questionnaire";
pub const OCR_MARKER: &str = "Transcribe all readable text";
pub const DOCUMENT_MARKER: &str = "Extract the full textual content";
pub const TEST_CASE_MARKER: &str = "You are a QA engineer";

#[derive(Clone)]
enum Rule {
    Reply(String),
    Fail(PipelineError),
}

/// Scripted model: the first rule whose marker appears in the prompt answers
pub struct FakeModel {
    rules: Vec<(String, Rule)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_when(mut self, marker: &str, reply: &str) -> Self {
        self.rules
            .push((marker.to_string(), Rule::Reply(reply.to_string())));
        self
    }

    pub fn fail_when(mut self, marker: &str, error: PipelineError) -> Self {
        self.rules.push((marker.to_string(), Rule::Fail(error)));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn attachment_counts(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(|(_, m)| m.len()).collect()
    }

    /// MIME types of every attachment sent, in call order
    pub fn attachment_mimes(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, m)| m.iter().cloned())
            .collect()
    }

    pub fn calls_matching(&self, marker: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p.contains(marker))
            .count()
    }
}

#[async_trait]
impl GenerativeModel for FakeModel {
    async fn generate(&self, prompt: &str, attachments: &[Attachment]) -> PipelineResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((
                prompt.to_string(),
                attachments.iter().map(|a| a.mime_type.clone()).collect(),
            ));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let rule = self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, rule)| rule.clone());
        match rule {
            Some(Rule::Reply(reply)) => Ok(reply),
            Some(Rule::Fail(error)) => Err(error),
            None => Ok("Sorry, I can't help with that.".to_string()),
        }
    }
}

/// Blob store backed by a map
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.blobs.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> PipelineResult<()> {
        if self.fail_writes {
            return Err(PipelineError::UpstreamService(format!(
                "storage unavailable for {}",
                path
            )));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("Blob not found: {}", path)))
    }
}

/// Repository that keeps records in memory and can refuse chosen titles
#[derive(Default)]
pub struct MemoryRepository {
    requirements: Mutex<Vec<StoredRequirement>>,
    test_cases: Mutex<Vec<StoredTestCase>>,
    reject_titles: Vec<String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail persistence for requirements or test cases with this title
    pub fn rejecting(mut self, title: &str) -> Self {
        self.reject_titles.push(title.to_string());
        self
    }

    pub fn test_cases(&self) -> Vec<StoredTestCase> {
        self.test_cases.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequirementRepository for MemoryRepository {
    async fn create_requirement(
        &self,
        project_id: &str,
        document_id: Option<&str>,
        draft: &RequirementDraft,
    ) -> PipelineResult<StoredRequirement> {
        if self.reject_titles.contains(&draft.title) {
            return Err(PipelineError::Persistence(format!(
                "constraint violation on '{}'",
                draft.title
            )));
        }
        let stored = StoredRequirement {
            id: format!("req-{}", self.requirements.lock().unwrap().len() + 1),
            project_id: project_id.to_string(),
            document_id: document_id.map(str::to_string),
            draft: draft.clone(),
            created_at: Utc::now(),
        };
        self.requirements.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn create_test_case(
        &self,
        requirement_id: &str,
        draft: &TestCaseDraft,
    ) -> PipelineResult<StoredTestCase> {
        if self.reject_titles.contains(&draft.title) {
            return Err(PipelineError::Persistence(format!(
                "constraint violation on '{}'",
                draft.title
            )));
        }
        let stored = StoredTestCase {
            id: format!("tc-{}", self.test_cases.lock().unwrap().len() + 1),
            requirement_id: requirement_id.to_string(),
            draft: draft.clone(),
            created_at: Utc::now(),
        };
        self.test_cases.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn list_requirements(&self, project_id: &str) -> PipelineResult<Vec<StoredRequirement>> {
        Ok(self
            .requirements
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_test_cases(&self, requirement_id: &str) -> PipelineResult<Vec<StoredTestCase>> {
        if !self
            .requirements
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.id == requirement_id)
        {
            return Err(PipelineError::NotFound(format!(
                "Requirement not found: {}",
                requirement_id
            )));
        }
        Ok(self
            .test_cases
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.requirement_id == requirement_id)
            .cloned()
            .collect())
    }
}
