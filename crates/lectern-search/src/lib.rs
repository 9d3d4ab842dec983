//! # lectern-search
//!
//! Vector indices over keyframe text for lecture retrieval.
//!
//! This crate provides:
//! - A flat cosine-similarity index that persists to a single JSON file
//! - Batched index construction from keyframes
//! - On-demand merge of many per-video indices for cross-video queries,
//!   with an LRU cache keyed by the sorted subject set
//!
//! ## Example
//!
//! ```ignore
//! use lectern_search::{IndexBuilder, IndexMerger, IndexStore};
//!
//! let built = IndexBuilder::new(embedder.clone()).build(subject_id, &keyframes).await?;
//! let location = IndexStore::new("data/vector_indices").save(subject_id, &built.index).await?;
//!
//! let merged = merger.merge(&[video_a, video_b]).await?;
//! let hits = merged.search(&query_vector, 5);
//! ```

pub mod builder;
pub mod index;
pub mod merge;
pub mod store;

// Re-export core types
pub use lectern_core::*;

pub use builder::{document_text, BuiltIndex, IndexBuilder};
pub use index::{cosine_similarity, DocumentMetadata, IndexDocument, SearchHit, VectorIndex};
pub use merge::{merge_cache_key, IndexMerger};
pub use store::IndexStore;
