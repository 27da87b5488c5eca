//! # Reqflow Models
//!
//! Generative model configuration and the HTTP client used by every model
//! call in the pipeline (OCR, gap analysis, question and requirement
//! generation).
//!
//! Providers and the environment variable holding their key:
//! - Gemini - `GEMINI_API_KEY`
//! - OpenAI (or any compatible endpoint) - `OPENAI_API_KEY`
//! - Anthropic - `ANTHROPIC_API_KEY`

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 8192;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Gemini,
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    /// Display name for logs and API responses
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
        }
    }

    /// Environment variable that must hold the API key
    pub fn env_var(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-2.0-flash",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            "openai" => Ok(LlmProvider::OpenAI),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            other => Err(PipelineError::Configuration(format!(
                "Unknown model provider '{}'",
                other
            ))),
        }
    }
}

/// Configuration for model selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "gemini-2.0-flash", "gpt-4o")
    pub model: String,
    /// Optional base URL override (proxies, OpenAI-compatible servers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key, when not the provider's usual one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::Gemini, LlmProvider::Gemini.default_model())
    }
}

impl ModelConfig {
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            api_key_env: None,
        }
    }

    pub fn api_key_var(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.env_var())
    }

    /// Build a client, reading the provider's API key from the environment.
    ///
    /// A missing key is a configuration error, reported by the first stage
    /// that needs the model.
    pub fn create_model(&self, timeout: Duration) -> PipelineResult<HttpModel> {
        let var = self.api_key_var();
        let api_key = std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "{} is not set; {} model calls are unavailable",
                    var,
                    self.provider.display_name()
                ))
            })?;
        HttpModel::new(self.clone(), api_key, timeout)
    }
}

/// Binary content sent alongside a prompt (page images, PDFs, documents)
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    fn base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A text-generating model. Returns raw text; callers parse it.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, attachments: &[Attachment]) -> PipelineResult<String>;
}

/// HTTP client for the configured provider
pub struct HttpModel {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl HttpModel {
    pub fn new(config: ModelConfig, api_key: String, timeout: Duration) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn base_url(&self, default: &str) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    fn header(value: &str) -> PipelineResult<HeaderValue> {
        HeaderValue::from_str(value)
            .map_err(|_| PipelineError::Configuration("API key contains invalid characters".into()))
    }

    /// Build (url, headers, body) for the configured provider
    fn build_request(
        &self,
        prompt: &str,
        attachments: &[Attachment],
    ) -> PipelineResult<(String, HeaderMap, serde_json::Value)> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let request = match self.config.provider {
            LlmProvider::Gemini => {
                headers.insert("x-goog-api-key", Self::header(&self.api_key)?);
                let url = format!(
                    "{}/models/{}:generateContent",
                    self.base_url(GEMINI_API_URL),
                    self.config.model
                );
                (url, headers, gemini_body(prompt, attachments))
            }
            LlmProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    Self::header(&format!("Bearer {}", self.api_key))?,
                );
                let url = format!("{}/chat/completions", self.base_url(OPENAI_API_URL));
                (url, headers, openai_body(&self.config.model, prompt, attachments))
            }
            LlmProvider::Anthropic => {
                headers.insert("x-api-key", Self::header(&self.api_key)?);
                headers.insert(
                    "anthropic-version",
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
                let url = format!("{}/messages", self.base_url(ANTHROPIC_API_URL));
                (url, headers, anthropic_body(&self.config.model, prompt, attachments))
            }
        };
        Ok(request)
    }
}

#[async_trait]
impl GenerativeModel for HttpModel {
    async fn generate(&self, prompt: &str, attachments: &[Attachment]) -> PipelineResult<String> {
        let (url, headers, body) = self.build_request(prompt, attachments)?;
        let provider = self.config.provider.display_name();

        tracing::debug!(
            provider,
            model = %self.config.model,
            attachments = attachments.len(),
            prompt_chars = prompt.len(),
            "Model request"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamService(format!(
                "{} API error {}: {}",
                provider,
                status,
                text.chars().take(500).collect::<String>()
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let text = match self.config.provider {
            LlmProvider::Gemini => gemini_text(&payload),
            LlmProvider::OpenAI => openai_text(&payload),
            LlmProvider::Anthropic => anthropic_text(&payload),
        };

        match text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(PipelineError::MalformedOutput(format!(
                "{} returned no text content",
                provider
            ))),
        }
    }
}

fn gemini_body(prompt: &str, attachments: &[Attachment]) -> serde_json::Value {
    let mut parts = vec![serde_json::json!({ "text": prompt })];
    for attachment in attachments {
        parts.push(serde_json::json!({
            "inline_data": {
                "mime_type": attachment.mime_type,
                "data": attachment.base64()
            }
        }));
    }
    serde_json::json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "maxOutputTokens": MAX_OUTPUT_TOKENS }
    })
}

fn openai_body(model: &str, prompt: &str, attachments: &[Attachment]) -> serde_json::Value {
    let mut content = vec![serde_json::json!({ "type": "text", "text": prompt })];
    for (i, attachment) in attachments.iter().enumerate() {
        let data_url = format!("data:{};base64,{}", attachment.mime_type, attachment.base64());
        if attachment.is_image() {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": data_url }
            }));
        } else {
            content.push(serde_json::json!({
                "type": "file",
                "file": { "filename": format!("attachment-{}", i + 1), "file_data": data_url }
            }));
        }
    }
    serde_json::json!({
        "model": model,
        "max_tokens": MAX_OUTPUT_TOKENS,
        "messages": [{ "role": "user", "content": content }]
    })
}

fn anthropic_body(model: &str, prompt: &str, attachments: &[Attachment]) -> serde_json::Value {
    let mut content: Vec<serde_json::Value> = attachments
        .iter()
        .map(|attachment| {
            let kind = if attachment.is_image() { "image" } else { "document" };
            serde_json::json!({
                "type": kind,
                "source": {
                    "type": "base64",
                    "media_type": attachment.mime_type,
                    "data": attachment.base64()
                }
            })
        })
        .collect();
    content.push(serde_json::json!({ "type": "text", "text": prompt }));
    serde_json::json!({
        "model": model,
        "max_tokens": MAX_OUTPUT_TOKENS,
        "messages": [{ "role": "user", "content": content }]
    })
}

fn gemini_text(payload: &serde_json::Value) -> Option<String> {
    let parts = payload["candidates"][0]["content"]["parts"].as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
    )
}

fn openai_text(payload: &serde_json::Value) -> Option<String> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
}

fn anthropic_text(payload: &serde_json::Value) -> Option<String> {
    let blocks = payload["content"].as_array()?;
    Some(
        blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, LlmProvider::Gemini);
        assert!(config.model.contains("gemini"));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAI);
        assert_eq!("claude".parse::<LlmProvider>().unwrap(), LlmProvider::Anthropic);
        assert!("mystery".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_model_config_serialization() {
        let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("openai"));
        assert!(json.contains("gpt-4o"));
        assert!(!json.contains("base_url"));
    }

    #[test]
    fn test_gemini_body_inlines_attachments() {
        let body = gemini_body("read this", &[Attachment::new("image/png", vec![1, 2, 3])]);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "AQID");
    }

    #[test]
    fn test_openai_body_distinguishes_images_and_files() {
        let body = openai_body(
            "gpt-4o",
            "read",
            &[
                Attachment::new("image/jpeg", vec![0]),
                Attachment::new("application/pdf", vec![0]),
            ],
        );
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[2]["type"], "file");
        assert!(content[2]["file"]["file_data"]
            .as_str()
            .unwrap()
            .starts_with("data:application/pdf;base64,"));
    }

    #[test]
    fn test_anthropic_body_puts_text_last() {
        let body = anthropic_body("claude", "read", &[Attachment::new("application/pdf", vec![0])]);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "document");
        assert_eq!(content[1]["type"], "text");
    }

    #[test]
    fn test_response_text_extraction() {
        let gemini = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }]
        });
        assert_eq!(gemini_text(&gemini).unwrap(), "Hello world");

        let openai = serde_json::json!({ "choices": [{ "message": { "content": "{}" } }] });
        assert_eq!(openai_text(&openai).unwrap(), "{}");

        let anthropic = serde_json::json!({
            "content": [{ "type": "thinking", "text": "hmm" }, { "type": "text", "text": "[]" }]
        });
        assert_eq!(anthropic_text(&anthropic).unwrap(), "[]");

        assert!(gemini_text(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let mut config = ModelConfig::with_provider(LlmProvider::Anthropic, "x");
        config.api_key_env = Some("REQFLOW_UNSET_KEY_FOR_MODEL_TESTS".into());
        assert_eq!(config.api_key_var(), "REQFLOW_UNSET_KEY_FOR_MODEL_TESTS");
        match config.create_model(Duration::from_secs(1)) {
            Err(e) => {
                assert_eq!(e.kind(), "configuration_error");
                assert!(e.message().contains("REQFLOW_UNSET_KEY_FOR_MODEL_TESTS"));
            }
            Ok(_) => panic!("expected configuration error"),
        }
    }
}
