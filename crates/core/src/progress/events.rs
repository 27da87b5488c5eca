//! # Progress Events
//!
//! Immutable facts about pipeline progress, keyed by job id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// Pipeline step an event belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Files persisted and paginated
    Upload,
    /// Text extracted from every file
    Extract,
    /// Gap analysis and (maybe) requirement drafting
    Analyze,
    /// Requirement drafts persisted
    Store,
    /// Synthetic step marking the whole job as done
    Complete,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Upload => "upload",
            Step::Extract => "extract",
            Step::Analyze => "analyze",
            Step::Store => "store",
            Step::Complete => "complete",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a step. `Completed` and `Error` are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Processing,
    Completed,
    Error,
}

impl StepStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Error)
    }
}

/// An event before the store has assigned its sequence and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub step: Step,
    pub status: StepStatus,
    pub current: Option<u32>,
    pub total: Option<u32>,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ProgressUpdate {
    pub fn new(step: Step, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            step,
            status,
            current: None,
            total: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn processing(step: Step, message: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Processing, message)
    }

    pub fn completed(step: Step, message: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Completed, message)
    }

    /// Terminal error event carrying the classified error in `details.error`
    pub fn failed(step: Step, error: &PipelineError) -> Self {
        Self::new(step, StepStatus::Error, error.to_string()).with_details(serde_json::json!({
            "error": error.kind(),
            "reason": error.to_string(),
            "retriable": error.is_retriable(),
        }))
    }

    /// Attach sub-progress counters
    pub fn with_progress(mut self, current: u32, total: u32) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    /// Attach a step-specific payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One recorded fact about a job's progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub step: Step,
    pub status: StepStatus,
    /// Monotonic per job, starting at 0
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub(crate) fn from_update(job_id: &str, sequence: u64, update: ProgressUpdate) -> Self {
        Self {
            job_id: job_id.to_string(),
            step: update.step,
            status: update.status,
            sequence,
            current: update.current,
            total: update.total,
            message: update.message,
            details: update.details,
            timestamp: Utc::now(),
        }
    }

    /// Terminal for garbage-collection purposes: job finished or any error
    pub fn is_terminal(&self) -> bool {
        self.step == Step::Complete || self.status == StepStatus::Error
    }

    /// The event after which a live stream should close
    pub fn ends_stream(&self) -> bool {
        self.step == Step::Complete && self.status == StepStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_camel_case() {
        let update = ProgressUpdate::processing(Step::Upload, "Uploading a.pdf").with_progress(0, 2);
        let event = ProgressEvent::from_update("doc-1", 0, update);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["jobId"], "doc-1");
        assert_eq!(json["step"], "upload");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["current"], 0);
        assert_eq!(json["total"], 2);
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_failed_update_carries_error_kind() {
        let err = PipelineError::Configuration("GEMINI_API_KEY is not set".into());
        let update = ProgressUpdate::failed(Step::Extract, &err);

        assert_eq!(update.status, StepStatus::Error);
        let details = update.details.unwrap();
        assert_eq!(details["error"], "configuration_error");
        assert_eq!(details["retriable"], false);
    }

    #[test]
    fn test_terminal_classification() {
        let complete = ProgressEvent::from_update(
            "j",
            4,
            ProgressUpdate::completed(Step::Complete, "done"),
        );
        assert!(complete.is_terminal());
        assert!(complete.ends_stream());

        let stored = ProgressEvent::from_update("j", 3, ProgressUpdate::completed(Step::Store, "ok"));
        assert!(!stored.is_terminal());

        let err = PipelineError::UpstreamService("503".into());
        let failed = ProgressEvent::from_update("j", 1, ProgressUpdate::failed(Step::Analyze, &err));
        assert!(failed.is_terminal());
        assert!(!failed.ends_stream());
    }
}
