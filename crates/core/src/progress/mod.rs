//! # Progress Notification
//!
//! The only shared mutable state in the system: a per-job event log with live
//! fan-out, and the streaming contract that exposes it to remote readers.
//!
//! ```text
//! Stage ──append──▶ ProgressStore ──subscribe_with_history──▶ progress_stream ──▶ SSE
//! ```

pub mod events;
pub mod gateway;
pub mod store;

pub use events::{ProgressEvent, ProgressUpdate, Step, StepStatus};
pub use gateway::{progress_stream, GatewayFrame, GatewaySettings};
pub use store::{ProgressStore, Subscription};
