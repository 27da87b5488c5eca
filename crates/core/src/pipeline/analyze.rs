//! Analyze stage: classify gaps, build the questionnaire, and either stop for
//! answers or draft requirements straight away.

use serde_json::json;

use super::content::{merge_documents, section_headings};
use super::context::{AnalyzeOutput, PipelineContext};
use super::orchestrator::Orchestrator;
use super::stage::StageReporter;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::Step;
use crate::skills::{
    fallback, gap_skill, question_skill, recover, requirement_skill, Recovered,
};

const ANALYZE_CALLS: u32 = 3;

impl Orchestrator {
    #[tracing::instrument(skip(self, context), fields(document_id = %context.document_id))]
    pub async fn analyze(&self, context: PipelineContext) -> PipelineResult<AnalyzeOutput> {
        let reporter = StageReporter::begin(
            &self.progress,
            &context.document_id,
            Step::Analyze,
            "Analyzing content for gaps",
        );
        let result = self.analyze_content(&reporter, &context).await;
        let result = reporter.finish(result, |(output, fallbacks)| {
            let mut details = json!({
                "hasGaps": output.has_gaps,
                "gaps": output.analysis.counts(),
                "questions": output.questions.len(),
                "dynamicQuestions": output.dynamic_questions.len(),
                "fallbacks": fallbacks,
            });
            if !output.has_gaps {
                details["requirements"] = json!(output.requirements);
            }
            let message = if output.has_gaps {
                format!(
                    "Found {} significant gap(s); {} question(s) for the stakeholder",
                    output.analysis.critical_gaps.len() + output.analysis.important_gaps.len(),
                    output.dynamic_questions.len()
                )
            } else {
                format!(
                    "No significant gaps; drafted {} requirement(s)",
                    output.requirements.len()
                )
            };
            (message, Some(details))
        });
        result.map(|(output, _)| output)
    }

    async fn analyze_content(
        &self,
        reporter: &StageReporter<'_>,
        context: &PipelineContext,
    ) -> PipelineResult<(AnalyzeOutput, Vec<&'static str>)> {
        let content = merge_documents(&context.documents);
        if content.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "No extracted content to analyze; run extract first".into(),
            ));
        }

        let model = self.model()?;
        let ctx = self.skill_context(model.as_ref());
        let mut fallbacks = Vec::new();

        reporter.progress(0, ANALYZE_CALLS, "Identifying gaps");
        let analysis = recover(
            gap_skill::analyze_gaps(&ctx, &content).await,
            "gap analysis",
            fallback::gap_analysis,
        )?;
        let analysis = note_fallback(analysis, "gapAnalysis", &mut fallbacks);

        reporter.progress_with(
            1,
            ANALYZE_CALLS,
            "Generating questions",
            json!({ "gaps": analysis.counts() }),
        );
        let questions = recover(
            question_skill::generate_questions(&ctx, &content).await,
            "generic questions",
            fallback::generic_questions,
        )?;
        let questions = note_fallback(questions, "questions", &mut fallbacks);

        if analysis.has_significant_gaps() {
            reporter.progress(2, ANALYZE_CALLS, "Generating targeted questions");
            let targeted = recover(
                question_skill::generate_targeted_questions(&ctx, &content, &analysis).await,
                "targeted questions",
                || fallback::targeted_questions(&analysis),
            )?;
            let targeted = note_fallback(targeted, "dynamicQuestions", &mut fallbacks);

            tracing::info!(
                critical = analysis.critical_gaps.len(),
                important = analysis.important_gaps.len(),
                questions = targeted.len(),
                "Gaps found, waiting for answers"
            );
            return Ok((
                AnalyzeOutput::with_gaps(context, analysis, questions, targeted),
                fallbacks,
            ));
        }

        reporter.progress(2, ANALYZE_CALLS, "Generating requirements");
        let requirements = recover(
            requirement_skill::generate_requirements(&ctx, &content).await,
            "requirements",
            || fallback::requirements(&section_headings(&context.documents)),
        )?;
        let requirements = note_fallback(requirements, "requirements", &mut fallbacks);

        Ok((
            AnalyzeOutput::ready(context, analysis, questions, requirements),
            fallbacks,
        ))
    }
}

fn note_fallback<T>(recovered: Recovered<T>, name: &'static str, used: &mut Vec<&'static str>) -> T {
    if recovered.used_fallback {
        used.push(name);
    }
    recovered.value
}
