//! # Fallback Generators
//!
//! Deterministic, non-AI output used when the model answers with something
//! that does not parse. The results are conservative but valid, so a job can
//! keep going with degraded content instead of failing.

use super::gap_skill::GapAnalysis;
use super::question_skill::{normalize_questions, DynamicQuestion, MAX_DYNAMIC_QUESTIONS};
use super::requirement_skill::RequirementDraft;
use super::test_case_skill::TestCaseDraft;
use crate::error::{PipelineError, PipelineResult};

/// A value and whether it came from a fallback generator
#[derive(Debug, Clone)]
pub struct Recovered<T> {
    pub value: T,
    pub used_fallback: bool,
}

/// Swap a `MalformedOutput` error for fallback output; other errors propagate
pub fn recover<T>(
    result: PipelineResult<T>,
    what: &str,
    fallback: impl FnOnce() -> T,
) -> PipelineResult<Recovered<T>> {
    match result {
        Ok(value) => Ok(Recovered {
            value,
            used_fallback: false,
        }),
        Err(PipelineError::MalformedOutput(reason)) => {
            tracing::warn!(what, %reason, "Model output unusable, using fallback");
            Ok(Recovered {
                value: fallback(),
                used_fallback: true,
            })
        }
        Err(e) => Err(e),
    }
}

/// No gaps, middling confidence
pub fn gap_analysis() -> GapAnalysis {
    GapAnalysis {
        confidence: 0.5,
        summary: "Automatic gap analysis was unavailable; the documents were taken as complete."
            .to_string(),
        ..Default::default()
    }
}

const GENERIC_QUESTIONS: [(&str, &str); 4] = [
    ("Who are the primary users of the system and what are their roles?", "general"),
    ("What are the most important goals the system must achieve?", "general"),
    ("Are there performance, security or compliance constraints to respect?", "general"),
    ("Which existing systems must this integrate with?", "general"),
];

/// A fixed interview set
pub fn generic_questions() -> Vec<DynamicQuestion> {
    GENERIC_QUESTIONS
        .iter()
        .enumerate()
        .map(|(i, (question, category))| {
            DynamicQuestion::new(format!("q{}", i + 1), *question, category)
        })
        .collect()
}

/// One question per significant gap, or the generic set when there are none
pub fn targeted_questions(analysis: &GapAnalysis) -> Vec<DynamicQuestion> {
    let questions: Vec<DynamicQuestion> = analysis
        .significant_gaps()
        .map(|(severity, gap)| {
            let mut question = DynamicQuestion::new(
                "",
                format!("Can you clarify: {}?", gap.description.trim_end_matches(['.', '?'])),
                severity,
            );
            if !gap.area.is_empty() {
                question.gap = Some(gap.area.clone());
            }
            question
        })
        .collect();

    if questions.is_empty() {
        generic_questions()
    } else {
        normalize_questions(questions, MAX_DYNAMIC_QUESTIONS)
    }
}

/// One boilerplate requirement per section heading, at least one overall
pub fn requirements(headings: &[&str]) -> Vec<RequirementDraft> {
    let mut drafts: Vec<RequirementDraft> = headings
        .iter()
        .map(|h| h.trim())
        .filter(|h| !h.is_empty())
        .map(|heading| RequirementDraft {
            title: heading.to_string(),
            description: format!(
                "The system shall implement the behaviour described in section \"{}\".",
                heading
            ),
            priority: "medium".to_string(),
            category: "functional".to_string(),
            acceptance_criteria: vec![format!(
                "The behaviour described in \"{}\" is demonstrated and reviewed with stakeholders.",
                heading
            )],
            source: Some(heading.to_string()),
        })
        .collect();

    if drafts.is_empty() {
        drafts.push(RequirementDraft {
            title: "Document scope".to_string(),
            description: "The system shall implement the behaviour described in the uploaded documents."
                .to_string(),
            priority: "medium".to_string(),
            category: "functional".to_string(),
            acceptance_criteria: vec![
                "Stakeholders confirm the documented behaviour is implemented.".to_string(),
            ],
            source: None,
        });
    }
    drafts
}

/// One positive acceptance case
pub fn test_cases(requirement: &RequirementDraft) -> Vec<TestCaseDraft> {
    let steps = if requirement.acceptance_criteria.is_empty() {
        vec![format!("Exercise: {}", requirement.description)]
    } else {
        requirement
            .acceptance_criteria
            .iter()
            .map(|c| format!("Verify: {}", c))
            .collect()
    };
    vec![TestCaseDraft {
        title: format!("{} - acceptance", requirement.title),
        description: requirement.description.clone(),
        preconditions: Vec::new(),
        steps,
        expected_result: "All acceptance criteria are met.".to_string(),
        priority: requirement.priority.clone(),
    }]
}
