//! # lectern-jobs
//!
//! Lecture-video pipeline and the worker pool that schedules it.
//!
//! This crate provides:
//! - A bounded orchestrator with cooperative cancellation and task events
//! - Keyframe extraction (ffmpeg I-frames deduplicated by perceptual hash)
//! - OCR and ASR stages that degrade per frame instead of failing
//! - Sectioning and cached section summaries
//! - [`VideoPipeline`], the [`TaskRunner`] that ties the stages together
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lectern_jobs::{Orchestrator, OrchestratorConfig, PipelineConfig, VideoPipeline};
//!
//! let pipeline = VideoPipeline::new(services, PipelineConfig::from_env());
//! let orchestrator = Orchestrator::builder(Arc::new(pipeline))
//!     .with_config(OrchestratorConfig::from_env())
//!     .start();
//!
//! let (task_id, token) = orchestrator.submit(video_id, StageSet::all(), false).await?;
//! let mut events = orchestrator.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! orchestrator.shutdown().await;
//! ```

pub mod handler;
pub mod logger;
pub mod media;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod stages;

// Re-export core types
pub use lectern_core::*;

pub use handler::{NoOpRunner, ProgressCallback, TaskContext, TaskOutcome, TaskRunner};
pub use logger::TaskLogger;
pub use media::{FfmpegToolkit, FrameHash, MediaToolkit, RawFrame, VideoInfo};
pub use notifier::StoreTaskNotifier;
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, OrchestratorEvent, PoolStatus,
    CANCELLED_MESSAGE,
};
pub use pipeline::{PipelineConfig, PipelineServices, VideoPipeline};
pub use stages::{
    align_segments, group_keyframes_into_sections, section_cache_key, AsrStage,
    KeyframeExtractor, OcrStage, SectionConfig, SectionSummarizer,
};
