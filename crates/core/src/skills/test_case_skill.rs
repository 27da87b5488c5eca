//! # Test Case Skill
//!
//! QA test cases for a single requirement.

use serde::{Deserialize, Serialize};

use super::llm_helpers::{call_model, parse_model_list};
use super::prompts::PromptKind;
use super::requirement_skill::RequirementDraft;
use super::SkillContext;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, alias = "expected")]
    pub expected_result: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_priority() -> String {
    "medium".to_string()
}

/// Test cases for one requirement
pub async fn generate_test_cases(
    ctx: &SkillContext<'_>,
    requirement: &RequirementDraft,
) -> PipelineResult<Vec<TestCaseDraft>> {
    let criteria = if requirement.acceptance_criteria.is_empty() {
        "- (none given)".to_string()
    } else {
        requirement
            .acceptance_criteria
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let reply = call_model(
        ctx,
        PromptKind::TestCases,
        &[
            ("title", &requirement.title),
            ("description", &requirement.description),
            ("criteria", &criteria),
        ],
        &[],
    )
    .await?;

    let cases: Vec<TestCaseDraft> = parse_model_list(&reply, "testCases")?;
    let cases: Vec<TestCaseDraft> = cases
        .into_iter()
        .filter(|c| !c.title.trim().is_empty())
        .collect();
    if cases.is_empty() {
        return Err(PipelineError::MalformedOutput(format!(
            "No test cases returned for '{}'",
            requirement.title
        )));
    }
    Ok(cases)
}
