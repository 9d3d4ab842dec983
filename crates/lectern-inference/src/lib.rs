//! # lectern-inference
//!
//! Recognition and language-model backends for the lectern pipeline.
//!
//! This crate provides:
//! - OCR backends (`OcrBackend`): Tesseract CLI and Ollama vision models
//! - Speech recognition (`TranscriptionBackend`): Whisper-compatible HTTP
//!   servers and pre-made subtitle files
//! - Embedding and generation: Ollama (default) and OpenAI-compatible
//!   endpoints (feature `openai`)
//! - Recovery of JSON objects from free-form model output
//! - Deterministic mock backends (feature `mock`)
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama backend
//! - `openai`: Enable OpenAI-compatible backend
//! - `mock`: Expose mock backends to other crates' tests
//!
//! # Example
//!
//! ```rust,no_run
//! use lectern_inference::OllamaBackend;
//! use lectern_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaBackend::from_env();
//!     let texts = vec!["Fourier series".to_string()];
//!     let embeddings = backend.embed_texts(&texts).await.unwrap();
//! }
//! ```

pub mod json;
pub mod ocr;
pub mod transcription;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

// Mock backends for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use lectern_core::*;

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};

pub use json::{extract_first_json_object, parse_json_lenient, strip_thinking};
pub use ocr::{OcrBackend, OllamaVisionOcr, TesseractOcr};
pub use transcription::{
    SubtitleTranscriber, TranscriptionBackend, TranscriptionResult, TranscriptionSegment,
    WhisperBackend,
};
