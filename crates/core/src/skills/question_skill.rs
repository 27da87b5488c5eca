//! # Question Skill
//!
//! Builds the questionnaire shown to a stakeholder: a generic interview for
//! any material, and targeted questions scoped to the gaps actually found.

use serde::{Deserialize, Serialize};

use super::gap_skill::GapAnalysis;
use super::llm_helpers::{call_model, parse_model_list};
use super::prompts::PromptKind;
use super::SkillContext;
use crate::error::PipelineResult;

/// Upper bound on targeted questions per questionnaire
pub const MAX_DYNAMIC_QUESTIONS: usize = 8;

/// One questionnaire entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicQuestion {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "text")]
    pub question: String,
    /// "critical", "important", "optional" or "general"
    #[serde(default = "default_category")]
    pub category: String,
    /// Area of the gap this question closes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<String>,
    /// Suggested answers for multiple choice
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

impl DynamicQuestion {
    pub fn new(id: impl Into<String>, question: impl Into<String>, category: &str) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            category: category.to_string(),
            gap: None,
            options: Vec::new(),
        }
    }
}

/// Drop blank questions, cap the list and give every question a unique id
pub fn normalize_questions(questions: Vec<DynamicQuestion>, cap: usize) -> Vec<DynamicQuestion> {
    let mut seen = std::collections::HashSet::new();
    questions
        .into_iter()
        .filter(|q| !q.question.trim().is_empty())
        .take(cap)
        .enumerate()
        .map(|(i, mut q)| {
            if q.id.trim().is_empty() || !seen.insert(q.id.clone()) {
                let mut n = i + 1;
                while !seen.insert(format!("q{}", n)) {
                    n += 1;
                }
                q.id = format!("q{}", n);
            }
            q
        })
        .collect()
}

/// Generic interview questions for the whole material
pub async fn generate_questions(
    ctx: &SkillContext<'_>,
    content: &str,
) -> PipelineResult<Vec<DynamicQuestion>> {
    let reply = call_model(ctx, PromptKind::GenericQuestions, &[("content", content)], &[]).await?;
    let questions = parse_model_list(&reply, "questions")?;
    Ok(normalize_questions(questions, MAX_DYNAMIC_QUESTIONS))
}

/// Questions scoped to the significant gaps in `analysis`
pub async fn generate_targeted_questions(
    ctx: &SkillContext<'_>,
    content: &str,
    analysis: &GapAnalysis,
) -> PipelineResult<Vec<DynamicQuestion>> {
    let gaps = analysis.to_prompt_list();
    let max = MAX_DYNAMIC_QUESTIONS.to_string();
    let reply = call_model(
        ctx,
        PromptKind::TargetedQuestions,
        &[("content", content), ("gaps", &gaps), ("max_questions", &max)],
        &[],
    )
    .await?;

    let questions = normalize_questions(
        parse_model_list(&reply, "questions")?,
        MAX_DYNAMIC_QUESTIONS,
    );
    tracing::info!(count = questions.len(), "Targeted questions generated");
    Ok(questions)
}
