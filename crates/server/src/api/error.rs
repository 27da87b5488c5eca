//! HTTP mapping for pipeline errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reqflow_core::PipelineError;
use serde::Serialize;
use utoipa::ToSchema;

/// Error body returned by every endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Full error text
    pub error: String,
    /// Stable error kind, e.g. `configuration_error`
    pub kind: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::Configuration(_) | PipelineError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PipelineError::UpstreamService(_) | PipelineError::MalformedOutput(_) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
            message: self.0.message().to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Self(PipelineError::InvalidInput(format!("Malformed upload: {}", e)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), "Request failed: {}", self.0);
        }
        (status, Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
