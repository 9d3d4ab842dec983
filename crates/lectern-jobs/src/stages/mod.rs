//! Pipeline stages, in execution order.

pub mod asr;
pub mod keyframes;
pub mod ocr;
pub mod sections;
pub mod summary;

pub use asr::{align_segments, AsrStage};
pub use keyframes::{DistinctFilter, ExtractedKeyframes, KeyframeExtractor};
pub use ocr::OcrStage;
pub use sections::{content_similarity, group_keyframes_into_sections, SectionConfig};
pub use summary::{section_cache_key, SectionSummarizer};
