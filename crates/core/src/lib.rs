//! # Reqflow Core
//!
//! Turns uploaded documents into requirements: extraction, gap analysis,
//! the stakeholder questionnaire, and persistence, with every step reported
//! to a per-job progress log that remote clients can stream.
//!
//! ## Architecture
//!
//! - `pipeline/` - Stage functions and the orchestrator that sequences them
//! - `progress/` - Per-job event store and the streaming contract
//! - `skills/` - One skill per kind of model call, plus fallbacks
//! - `models/` - LLM provider configuration and the HTTP client
//! - `storage/` - Blob storage and file type handling
//! - `state/` - Requirement persistence (SQLite)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reqflow_core::config::PipelineConfig;
//! use reqflow_core::pipeline::{Orchestrator, PipelineOutcome};
//! use reqflow_core::progress::ProgressStore;
//! use reqflow_core::state::RequirementDb;
//!
//! let config = PipelineConfig::load().await?;
//! let db = Arc::new(RequirementDb::open_at(&config.db_path)?);
//! let orchestrator = Orchestrator::new(Arc::new(ProgressStore::default()), db, config);
//! let outcome = orchestrator.run_to_completion(input).await?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod skills;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PipelineError, PipelineResult};
