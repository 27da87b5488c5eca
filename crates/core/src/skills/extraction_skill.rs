//! # Extraction Skill
//!
//! Reads text out of things that are not text: page images, single-page
//! PDFs, and whole documents in formats we cannot convert ourselves.

use super::llm_helpers::{call_model, strip_code_fences};
use super::prompts::PromptKind;
use super::SkillContext;
use crate::error::{PipelineError, PipelineResult};
use crate::models::Attachment;

fn clean(reply: String, what: &str) -> PipelineResult<String> {
    let text = strip_code_fences(&reply).to_string();
    if text.is_empty() {
        return Err(PipelineError::MalformedOutput(format!(
            "Model returned no text for {}",
            what
        )));
    }
    Ok(text)
}

/// OCR one page (1-based) of `name`
pub async fn ocr_page(
    ctx: &SkillContext<'_>,
    name: &str,
    page: usize,
    total: usize,
    attachment: Attachment,
) -> PipelineResult<String> {
    let page_str = page.to_string();
    let total_str = total.to_string();
    let reply = call_model(
        ctx,
        PromptKind::PageOcr,
        &[("name", name), ("page", &page_str), ("total", &total_str)],
        &[attachment],
    )
    .await?;
    clean(reply, &format!("page {} of {}", page, name))
}

/// Send a whole document to the model and return its text
pub async fn extract_document(
    ctx: &SkillContext<'_>,
    name: &str,
    attachment: Attachment,
) -> PipelineResult<String> {
    let reply = call_model(
        ctx,
        PromptKind::DocumentExtraction,
        &[("name", name)],
        &[attachment],
    )
    .await?;
    clean(reply, name)
}
