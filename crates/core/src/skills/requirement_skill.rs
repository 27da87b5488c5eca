//! # Requirement Skill
//!
//! Drafts atomic, testable requirements either straight from extracted
//! content or from a gap analysis plus the stakeholder's answers.

use serde::{Deserialize, Serialize};

use super::gap_skill::GapAnalysis;
use super::llm_helpers::{call_model, parse_model_list};
use super::prompts::PromptKind;
use super::SkillContext;
use crate::error::{PipelineError, PipelineResult};

/// A requirement before it is persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequirementDraft {
    pub title: String,
    pub description: String,
    /// "high", "medium" or "low"
    #[serde(default = "default_priority")]
    pub priority: String,
    /// "functional", "non-functional" or "constraint"
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Section or questionnaire the draft came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn default_priority() -> String {
    "medium".to_string()
}

fn default_category() -> String {
    "functional".to_string()
}

impl RequirementDraft {
    /// Reject drafts that cannot be persisted meaningfully
    pub fn validate(&self) -> PipelineResult<()> {
        if self.title.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "Requirement title must not be empty".into(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "Requirement '{}' has no description",
                self.title
            )));
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.priority = match self.priority.trim().to_lowercase().as_str() {
            "high" | "critical" | "must" => "high",
            "low" | "could" | "nice-to-have" => "low",
            _ => "medium",
        }
        .to_string();
        self.acceptance_criteria.retain(|c| !c.trim().is_empty());
        self
    }
}

/// One answered questionnaire entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GapAnswer {
    pub question_id: String,
    #[serde(default)]
    pub question: String,
    pub answer: String,
}

fn answers_for_prompt(answers: &[GapAnswer]) -> String {
    let lines: Vec<String> = answers
        .iter()
        .filter(|a| !a.answer.trim().is_empty())
        .map(|a| {
            let question = if a.question.is_empty() {
                &a.question_id
            } else {
                &a.question
            };
            format!("Q: {}\nA: {}", question, a.answer.trim())
        })
        .collect();
    if lines.is_empty() {
        "(no answers given)".to_string()
    } else {
        lines.join("\n\n")
    }
}

fn keep_valid(drafts: Vec<RequirementDraft>) -> PipelineResult<Vec<RequirementDraft>> {
    let drafts: Vec<RequirementDraft> = drafts
        .into_iter()
        .map(RequirementDraft::normalized)
        .filter(|d| d.validate().is_ok())
        .collect();
    if drafts.is_empty() {
        return Err(PipelineError::MalformedOutput(
            "Model returned no usable requirements".into(),
        ));
    }
    Ok(drafts)
}

/// Requirement drafts from extracted content alone
pub async fn generate_requirements(
    ctx: &SkillContext<'_>,
    content: &str,
) -> PipelineResult<Vec<RequirementDraft>> {
    let reply = call_model(ctx, PromptKind::Requirements, &[("content", content)], &[]).await?;
    let drafts = keep_valid(parse_model_list(&reply, "requirements")?)?;
    tracing::info!(count = drafts.len(), "Requirements generated from content");
    Ok(drafts)
}

/// Requirement drafts from a gap analysis and the questionnaire answers
pub async fn generate_from_answers(
    ctx: &SkillContext<'_>,
    analysis: &GapAnalysis,
    answers: &[GapAnswer],
    content: &str,
) -> PipelineResult<Vec<RequirementDraft>> {
    let analysis_text = format!(
        "Summary: {}\nGaps:\n{}",
        analysis.summary,
        analysis.to_prompt_list()
    );
    let answers_text = answers_for_prompt(answers);
    let reply = call_model(
        ctx,
        PromptKind::RequirementsFromAnswers,
        &[
            ("analysis", &analysis_text),
            ("answers", &answers_text),
            ("content", content),
        ],
        &[],
    )
    .await?;

    let drafts = keep_valid(parse_model_list(&reply, "requirements")?)?;
    tracing::info!(
        count = drafts.len(),
        answers = answers.len(),
        "Requirements generated from answers"
    );
    Ok(drafts)
}
