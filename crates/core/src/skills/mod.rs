//! # Reqflow Skills
//!
//! One skill per kind of model call the pipeline makes. Skills render a
//! prompt, call the model and parse the reply into typed drafts; they never
//! touch the progress store or persistence.
//!
//! ## Skill Categories
//!
//! **Reading:**
//! - `extraction_skill` - OCR of pages and whole-document extraction
//!
//! **Analysis:**
//! - `gap_skill` - Classify missing information by severity
//! - `question_skill` - Generic and gap-targeted questionnaires
//!
//! **Generation:**
//! - `requirement_skill` - Requirement drafts from content or answers
//! - `test_case_skill` - Test cases per requirement
//!
//! A reply that does not parse is a `MalformedOutput` error; callers recover
//! from it with the deterministic generators in `fallback`.

use std::time::Duration;

use crate::models::GenerativeModel;

pub mod fallback;
pub mod llm_helpers;
pub mod prompts;

pub mod extraction_skill;
pub mod gap_skill;
pub mod question_skill;
pub mod requirement_skill;
pub mod test_case_skill;

pub use fallback::{recover, Recovered};
pub use gap_skill::{Gap, GapAnalysis};
pub use prompts::{PromptKind, Prompts};
pub use question_skill::{DynamicQuestion, MAX_DYNAMIC_QUESTIONS};
pub use requirement_skill::{GapAnswer, RequirementDraft};
pub use test_case_skill::TestCaseDraft;

/// Everything a skill needs for one model call
#[derive(Clone, Copy)]
pub struct SkillContext<'a> {
    pub model: &'a dyn GenerativeModel,
    pub prompts: &'a Prompts,
    pub timeout: Duration,
}
