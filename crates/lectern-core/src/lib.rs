//! # lectern-core
//!
//! Core types, traits, and abstractions for the lectern lecture-video pipeline.
//!
//! This crate provides the data model shared by every stage (tasks, keyframes,
//! sections, cache entries, index handles), the crate-wide error type, and the
//! port traits through which the pipeline talks to storage and to inference
//! engines.
//!
//! ## Logging
//!
//! Every crate logs through `tracing` with the same structured fields:
//! `subsystem` and `component` identify the source, `op` the operation,
//! `task_id`, `subject_id` and `stage` the pipeline entity, and
//! `duration_ms` with `slow = true` marks calls over their latency budget.
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A stage unit was degraded or a task failed |
//! | WARN  | Recoverable issue with a fallback applied |
//! | INFO  | Task, stage and worker lifecycle |
//! | DEBUG | Decision points: kept frames, cache hits, split reasons |
//! | TRACE | Per-item iteration |

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

/// Embedding vector type used by every backend and index.
pub type Vector = Vec<f32>;

/// Generate a new time-ordered UUIDv7.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
