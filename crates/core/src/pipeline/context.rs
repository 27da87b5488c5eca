//! # Pipeline Context
//!
//! The state handed back to the caller between stages. Each stage's output
//! is the next stage's input, so a job can pause (for example while a
//! stakeholder answers the questionnaire) without any server-side task
//! staying alive.

use serde::{Deserialize, Serialize};

use crate::skills::{DynamicQuestion, GapAnalysis, GapAnswer, RequirementDraft};
use crate::state::StoredRequirement;
use crate::storage::FileType;

/// Next step hint returned when gaps need answers
pub const NEXT_STEP_QUESTIONNAIRE: &str = "show-questionnaire";
/// Next step hint returned when drafts are ready to store
pub const NEXT_STEP_STORE: &str = "/store";

/// A raw file as received from the client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Upload stage input
#[derive(Debug, Clone)]
pub struct UploadInput {
    pub project_id: String,
    /// Client-chosen job id; generated when absent
    pub document_id: Option<String>,
    pub files: Vec<UploadedFile>,
}

/// How a file's text was obtained
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Read as text
    Direct,
    /// Embedded PDF text on every page
    TextLayer,
    /// At least one page read by the model
    Ocr,
    /// Whole file sent to the model
    DocumentModel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub heading: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub char_count: usize,
    pub word_count: usize,
    pub page_count: usize,
    pub method: ExtractionMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub text: String,
    pub sections: Vec<Section>,
    pub metadata: ExtractionMetadata,
}

/// Manifest entry for one uploaded file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedDocument {
    pub original_name: String,
    pub storage_path: String,
    pub file_type: FileType,
    pub page_count: usize,
    /// Stored page representations, in page order
    #[serde(default)]
    pub image_paths: Vec<String>,
    /// Filled in by the Extract stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<ExtractedContent>,
}

/// The documents of one job; input to Extract and Analyze
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineContext {
    pub document_id: String,
    pub project_id: String,
    pub documents: Vec<UploadedDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutput {
    #[serde(flatten)]
    pub context: PipelineContext,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOutput {
    #[serde(flatten)]
    pub context: PipelineContext,
    pub total_extracted: usize,
}

/// Analyze stage result. With gaps it carries the questionnaire, without
/// gaps it carries requirement drafts ready for the Store stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOutput {
    pub document_id: String,
    pub project_id: String,
    pub has_gaps: bool,
    pub analysis: GapAnalysis,
    /// Generic interview questions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<DynamicQuestion>,
    /// Gap-targeted questions; only when `has_gaps`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_questions: Vec<DynamicQuestion>,
    /// Drafts; only when not `has_gaps`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<RequirementDraft>,
    pub next_step: String,
}

impl AnalyzeOutput {
    pub fn with_gaps(
        context: &PipelineContext,
        analysis: GapAnalysis,
        questions: Vec<DynamicQuestion>,
        dynamic_questions: Vec<DynamicQuestion>,
    ) -> Self {
        Self {
            document_id: context.document_id.clone(),
            project_id: context.project_id.clone(),
            has_gaps: true,
            analysis,
            questions,
            dynamic_questions,
            requirements: Vec::new(),
            next_step: NEXT_STEP_QUESTIONNAIRE.to_string(),
        }
    }

    pub fn ready(
        context: &PipelineContext,
        analysis: GapAnalysis,
        questions: Vec<DynamicQuestion>,
        requirements: Vec<RequirementDraft>,
    ) -> Self {
        Self {
            document_id: context.document_id.clone(),
            project_id: context.project_id.clone(),
            has_gaps: false,
            analysis,
            questions,
            dynamic_questions: Vec::new(),
            requirements,
            next_step: NEXT_STEP_STORE.to_string(),
        }
    }

    /// Store request for the no-gap path
    pub fn store_request(&self) -> StoreRequest {
        StoreRequest {
            document_id: self.document_id.clone(),
            project_id: self.project_id.clone(),
            requirements: self.requirements.clone(),
        }
    }
}

/// Input to "generate requirements from document + answers"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub project_id: String,
    pub document_id: String,
    pub analysis: GapAnalysis,
    #[serde(default)]
    pub gap_answers: Vec<GapAnswer>,
    /// Merged document text, when the client still has it
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestCaseSummary {
    pub generated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutput {
    pub requirements: Vec<StoredRequirement>,
    pub saved_requirements: usize,
    pub failed_requirements: usize,
    pub test_cases: TestCaseSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    pub document_id: String,
    pub project_id: String,
    pub requirements: Vec<RequirementDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOutput {
    pub document_id: String,
    pub saved_requirements: usize,
    pub failed_requirements: usize,
    pub requirements: Vec<StoredRequirement>,
}
