//! # Pipeline Errors
//!
//! Error taxonomy shared by every stage. Each variant maps to a stable
//! `kind()` string that travels in `details.error` on progress events and in
//! HTTP error bodies.

use thiserror::Error;

/// Errors surfaced by pipeline stages and their collaborators
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Missing or invalid configuration (API key, storage location). Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A storage or model call failed. The caller may re-invoke the stage.
    #[error("upstream service error: {0}")]
    UpstreamService(String),

    /// The model answered with something that did not parse as expected
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    /// Referenced document, job, or record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Writing a record failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The request itself was unusable (no files, file too large, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    /// Stable identifier used in `details.error` and API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::UpstreamService(_) => "upstream_service_error",
            Self::MalformedOutput(_) => "malformed_output_error",
            Self::NotFound(_) => "not_found_error",
            Self::Persistence(_) => "persistence_error",
            Self::InvalidInput(_) => "invalid_input_error",
        }
    }

    /// The detail text without the category prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Configuration(m)
            | Self::UpstreamService(m)
            | Self::MalformedOutput(m)
            | Self::NotFound(m)
            | Self::Persistence(m)
            | Self::InvalidInput(m) => m,
        }
    }

    /// Whether re-invoking the same stage can reasonably succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::UpstreamService(_))
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound(e.to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        Self::UpstreamService(e.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
