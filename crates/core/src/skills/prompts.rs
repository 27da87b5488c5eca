//! Default prompt templates bundled at compile time.
//!
//! These are used for seeding the database on first run.
//! At runtime, stored templates override the defaults to allow customization.
//! Placeholders are written `{{name}}` and filled by [`Prompts::render`].

use std::collections::HashMap;

/// Gap analysis - classifies missing information by severity
pub const GAP_ANALYSIS: &str = include_str!("defaults/gap_analysis.md");

/// Generic questions - stakeholder interview for the whole material
pub const GENERIC_QUESTIONS: &str = include_str!("defaults/generic_questions.md");

/// Targeted questions - one question per significant gap
pub const TARGETED_QUESTIONS: &str = include_str!("defaults/targeted_questions.md");

/// Requirements - drafts from source material alone
pub const REQUIREMENTS: &str = include_str!("defaults/requirements.md");

/// Requirements from answers - drafts from gap analysis plus questionnaire
pub const REQUIREMENTS_FROM_ANSWERS: &str = include_str!("defaults/requirements_from_answers.md");

/// Page OCR - transcribes one page image or single-page PDF
pub const PAGE_OCR: &str = include_str!("defaults/page_ocr.md");

/// Document extraction - whole-file fallback for unconvertible formats
pub const DOCUMENT_EXTRACTION: &str = include_str!("defaults/document_extraction.md");

/// Test cases - QA cases for one requirement
pub const TEST_CASES: &str = include_str!("defaults/test_cases.md");

/// Every model call the pipeline makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    GapAnalysis,
    GenericQuestions,
    TargetedQuestions,
    Requirements,
    RequirementsFromAnswers,
    PageOcr,
    DocumentExtraction,
    TestCases,
}

impl PromptKind {
    pub const ALL: [PromptKind; 8] = [
        PromptKind::GapAnalysis,
        PromptKind::GenericQuestions,
        PromptKind::TargetedQuestions,
        PromptKind::Requirements,
        PromptKind::RequirementsFromAnswers,
        PromptKind::PageOcr,
        PromptKind::DocumentExtraction,
        PromptKind::TestCases,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            PromptKind::GapAnalysis => "gap_analysis",
            PromptKind::GenericQuestions => "generic_questions",
            PromptKind::TargetedQuestions => "targeted_questions",
            PromptKind::Requirements => "requirements",
            PromptKind::RequirementsFromAnswers => "requirements_from_answers",
            PromptKind::PageOcr => "page_ocr",
            PromptKind::DocumentExtraction => "document_extraction",
            PromptKind::TestCases => "test_cases",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.slug() == slug)
    }

    pub fn default_template(&self) -> &'static str {
        match self {
            PromptKind::GapAnalysis => GAP_ANALYSIS,
            PromptKind::GenericQuestions => GENERIC_QUESTIONS,
            PromptKind::TargetedQuestions => TARGETED_QUESTIONS,
            PromptKind::Requirements => REQUIREMENTS,
            PromptKind::RequirementsFromAnswers => REQUIREMENTS_FROM_ANSWERS,
            PromptKind::PageOcr => PAGE_OCR,
            PromptKind::DocumentExtraction => DOCUMENT_EXTRACTION,
            PromptKind::TestCases => TEST_CASES,
        }
    }
}

/// All default prompts with their slugs for seeding
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    PromptKind::ALL
        .iter()
        .map(|kind| (kind.slug(), kind.default_template()))
        .collect()
}

/// Active prompt set: bundled defaults plus any stored overrides
#[derive(Debug, Clone, Default)]
pub struct Prompts {
    overrides: HashMap<PromptKind, String>,
}

impl Prompts {
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Build from stored `(slug, content)` rows; unknown slugs are ignored
    pub fn from_stored(rows: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut prompts = Self::default();
        for (slug, content) in rows {
            match PromptKind::from_slug(&slug) {
                Some(kind) => prompts = prompts.with_override(kind, content),
                None => tracing::warn!(slug = %slug, "Ignoring stored prompt with unknown slug"),
            }
        }
        prompts
    }

    pub fn with_override(mut self, kind: PromptKind, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() && content != kind.default_template() {
            self.overrides.insert(kind, content);
        }
        self
    }

    pub fn template(&self, kind: PromptKind) -> &str {
        self.overrides
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_template())
    }

    /// Fill `{{name}}` placeholders; unknown placeholders are left as-is
    pub fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> String {
        let mut out = self.template(kind).to_string();
        for (name, value) in vars {
            out = out.replace(&format!("{{{{{}}}}}", name), value);
        }
        out
    }
}
