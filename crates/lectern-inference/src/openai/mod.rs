//! OpenAI-compatible inference backend.
//!
//! Works with any endpoint that speaks the OpenAI embeddings and chat
//! completions API: OpenAI itself, SiliconFlow, vLLM, LocalAI, or Ollama in
//! compatibility mode.

mod backend;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL, DEFAULT_GEN_MODEL,
    DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS,
};
