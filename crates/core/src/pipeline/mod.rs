//! # Document Pipeline
//!
//! Stages that turn uploaded documents into stored requirements.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Upload → Extract → Analyze ─[no gaps]→ Store → Complete
//!                       └─[gaps]→ (questionnaire) → Generate from answers → Complete
//! ```
//!
//! Each stage is an async method on [`Orchestrator`] and reports through the
//! shared [`ProgressStore`](crate::progress::ProgressStore).

pub mod analyze;
pub mod content;
pub mod context;
pub mod extract;
pub mod generate;
pub mod orchestrator;
pub mod stage;
pub mod store;
pub mod upload;

pub use context::{
    AnalyzeOutput, ExtractOutput, ExtractedContent, ExtractionMethod, GenerateOutput,
    GenerateRequest, PipelineContext, Section, StoreOutput, StoreRequest, TestCaseSummary,
    UploadInput, UploadOutput, UploadedDocument, UploadedFile,
};
pub use orchestrator::{Orchestrator, PipelineOutcome};
pub use stage::{NextStep, StageReporter};
