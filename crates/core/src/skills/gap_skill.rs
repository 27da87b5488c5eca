//! # Gap Skill
//!
//! Classifies what the source material leaves open into critical, important
//! and optional gaps, with a confidence score.

use serde::{Deserialize, Serialize};

use super::llm_helpers::{call_model, parse_model_json};
use super::prompts::PromptKind;
use super::SkillContext;
use crate::error::PipelineResult;

/// A single piece of missing or ambiguous information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "GapRepr")]
pub struct Gap {
    /// Short label, e.g. "User roles"
    pub area: String,
    pub description: String,
    /// Reasonable default when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Models answer with either plain strings or objects
#[derive(Deserialize)]
#[serde(untagged)]
enum GapRepr {
    Text(String),
    Detailed {
        #[serde(default, alias = "category", alias = "title")]
        area: String,
        #[serde(alias = "gap", alias = "question", alias = "details")]
        description: String,
        #[serde(default)]
        suggestion: Option<String>,
    },
}

impl From<GapRepr> for Gap {
    fn from(repr: GapRepr) -> Self {
        match repr {
            GapRepr::Text(description) => Gap {
                area: String::new(),
                description,
                suggestion: None,
            },
            GapRepr::Detailed {
                area,
                description,
                suggestion,
            } => Gap {
                area,
                description,
                suggestion: suggestion.filter(|s| !s.trim().is_empty()),
            },
        }
    }
}

impl Gap {
    /// Label for prompts and fallback questions
    pub fn label(&self) -> &str {
        if self.area.is_empty() {
            &self.description
        } else {
            &self.area
        }
    }
}

/// Output of gap analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GapAnalysis {
    pub critical_gaps: Vec<Gap>,
    pub important_gaps: Vec<Gap>,
    pub optional_gaps: Vec<Gap>,
    /// How complete the material is (0.0 - 1.0)
    pub confidence: f32,
    pub summary: String,
}

impl GapAnalysis {
    /// Critical or important gaps stop the automated path
    pub fn has_significant_gaps(&self) -> bool {
        !self.critical_gaps.is_empty() || !self.important_gaps.is_empty()
    }

    pub fn gap_count(&self) -> usize {
        self.critical_gaps.len() + self.important_gaps.len() + self.optional_gaps.len()
    }

    /// Significant gaps with their severity, most severe first
    pub fn significant_gaps(&self) -> impl Iterator<Item = (&'static str, &Gap)> {
        self.critical_gaps
            .iter()
            .map(|g| ("critical", g))
            .chain(self.important_gaps.iter().map(|g| ("important", g)))
    }

    /// Counts for progress event details
    pub fn counts(&self) -> serde_json::Value {
        serde_json::json!({
            "critical": self.critical_gaps.len(),
            "important": self.important_gaps.len(),
            "optional": self.optional_gaps.len(),
            "confidence": self.confidence,
        })
    }

    /// Bulleted listing used inside prompts
    pub fn to_prompt_list(&self) -> String {
        let optional = self.optional_gaps.iter().map(|g| ("optional", g));
        let lines: Vec<String> = self
            .significant_gaps()
            .chain(optional)
            .map(|(severity, gap)| {
                if gap.area.is_empty() {
                    format!("- [{}] {}", severity, gap.description)
                } else {
                    format!("- [{}] {}: {}", severity, gap.area, gap.description)
                }
            })
            .collect();
        if lines.is_empty() {
            "- none".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

/// Classify the gaps in `content`
pub async fn analyze_gaps(ctx: &SkillContext<'_>, content: &str) -> PipelineResult<GapAnalysis> {
    let reply = call_model(ctx, PromptKind::GapAnalysis, &[("content", content)], &[]).await?;
    let analysis: GapAnalysis = parse_model_json(&reply)?;
    let analysis = analysis.normalized();

    tracing::info!(
        critical = analysis.critical_gaps.len(),
        important = analysis.important_gaps.len(),
        optional = analysis.optional_gaps.len(),
        confidence = analysis.confidence,
        "Gap analysis complete"
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::Prompts;
    use crate::testing::{FakeModel, GAP_MARKER};
    use std::time::Duration;

    #[test]
    fn test_gaps_accept_strings_and_objects() {
        let analysis: GapAnalysis = serde_json::from_str(
            r#"{
                "criticalGaps": ["Who are the users?"],
                "importantGaps": [{"category": "Security", "gap": "No auth model", "suggestion": ""}],
                "confidence": 0.4
            }"#,
        )
        .unwrap();

        assert_eq!(analysis.critical_gaps[0].label(), "Who are the users?");
        assert_eq!(analysis.important_gaps[0].area, "Security");
        assert_eq!(analysis.important_gaps[0].suggestion, None);
        assert!(analysis.optional_gaps.is_empty());
        assert!(analysis.has_significant_gaps());
        assert_eq!(analysis.gap_count(), 2);
    }

    #[test]
    fn test_optional_gaps_are_not_significant() {
        let analysis = GapAnalysis {
            optional_gaps: vec![Gap {
                area: "Theme".into(),
                description: "No colour scheme".into(),
                suggestion: None,
            }],
            ..Default::default()
        };
        assert!(!analysis.has_significant_gaps());
        assert!(analysis.to_prompt_list().contains("[optional] Theme"));
    }

    #[tokio::test]
    async fn test_analyze_gaps_parses_and_clamps() {
        let model = FakeModel::new().reply_when(
            GAP_MARKER,
            "```json\n{\"criticalGaps\": [{\"area\": \"Users\", \"description\": \"Unknown actors\"}], \"confidence\": 3.5}\n```",
        );
        let prompts = Prompts::defaults();
        let ctx = SkillContext {
            model: &model,
            prompts: &prompts,
            timeout: Duration::from_secs(5),
        };

        let analysis = analyze_gaps(&ctx, "Some content").await.unwrap();
        assert_eq!(analysis.critical_gaps.len(), 1);
        assert_eq!(analysis.confidence, 1.0);
        assert!(model.prompts()[0].contains("Some content"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_malformed_output() {
        let model = FakeModel::new().reply_when(GAP_MARKER, "I think the document is fine.");
        let prompts = Prompts::defaults();
        let ctx = SkillContext {
            model: &model,
            prompts: &prompts,
            timeout: Duration::from_secs(5),
        };

        let err = analyze_gaps(&ctx, "x").await.unwrap_err();
        assert_eq!(err.kind(), "malformed_output_error");
    }
}
