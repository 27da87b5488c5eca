//! # LLM Helpers
//!
//! Shared plumbing for every skill: one bounded model call, and turning the
//! model's free-form reply into typed values.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;

use super::prompts::PromptKind;
use super::SkillContext;
use crate::error::{PipelineError, PipelineResult};
use crate::models::Attachment;

/// Render a prompt and call the model, bounded by the configured timeout
pub async fn call_model(
    ctx: &SkillContext<'_>,
    kind: PromptKind,
    vars: &[(&str, &str)],
    attachments: &[Attachment],
) -> PipelineResult<String> {
    let prompt = ctx.prompts.render(kind, vars);
    tracing::debug!(
        prompt = kind.slug(),
        chars = prompt.len(),
        attachments = attachments.len(),
        "Calling model"
    );

    match timeout(ctx.timeout, ctx.model.generate(&prompt, attachments)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::UpstreamService(format!(
            "Model call '{}' timed out after {}s",
            kind.slug(),
            ctx.timeout.as_secs()
        ))),
    }
}

/// Strip a surrounding Markdown code fence, if any
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Locate the outermost JSON object or array in a model reply
pub fn extract_json(text: &str) -> Option<&str> {
    let body = strip_code_fences(text);
    let start = body.find(['{', '['])?;
    let close = match body.as_bytes()[start] {
        b'{' => '}',
        _ => ']',
    };
    let end = body.rfind(close)?;
    (end > start).then(|| &body[start..=end])
}

/// Parse a model reply into `T`
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> PipelineResult<T> {
    let json = extract_json(text).ok_or_else(|| {
        PipelineError::MalformedOutput(format!("No JSON found in model reply: {}", preview(text)))
    })?;
    serde_json::from_str(json).map_err(|e| {
        PipelineError::MalformedOutput(format!("Model reply did not match expected shape: {}", e))
    })
}

/// Parse a reply that is either a bare array or an object wrapping one under `key`
pub fn parse_model_list<T: DeserializeOwned>(text: &str, key: &str) -> PipelineResult<Vec<T>> {
    let value: Value = parse_model_json(text)?;
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map.remove(key).ok_or_else(|| {
            PipelineError::MalformedOutput(format!("Model reply has no '{}' field", key))
        })?,
        _ => {
            return Err(PipelineError::MalformedOutput(
                "Model reply is not an object or array".into(),
            ))
        }
    };
    serde_json::from_value(list).map_err(|e| {
        PipelineError::MalformedOutput(format!("Invalid '{}' entries in model reply: {}", key, e))
    })
}

fn preview(text: &str) -> String {
    let mut short: String = text.chars().take(120).collect();
    if short.len() < text.len() {
        short.push_str("...");
    }
    short
}
