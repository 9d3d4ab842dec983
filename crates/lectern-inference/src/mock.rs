//! Mock backends for deterministic testing.
//!
//! Available inside this crate's tests and, through the `mock` feature, to
//! other crates' tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lectern_inference::mock::MockInferenceBackend;
//!
//! let backend = MockInferenceBackend::new()
//!     .with_dimension(8)
//!     .with_response_mapping("keywords", r#"{"summary":"s","keywords":["k"]}"#);
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lectern_core::{EmbeddingBackend, Error, GenerationBackend, Result, Vector};

use crate::ocr::{split_fragments, OcrBackend};
use crate::transcription::{TranscriptionBackend, TranscriptionResult, TranscriptionSegment};

/// A recorded call against a mock backend.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
}

#[derive(Default)]
struct CallLog(Mutex<Vec<MockCall>>);

impl CallLog {
    fn push(&self, operation: &str, input: &str) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(MockCall {
                operation: operation.to_string(),
                input: input.to_string(),
            });
        }
    }

    fn snapshot(&self) -> Vec<MockCall> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn count(&self, operation: &str) -> usize {
        self.snapshot()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }
}

// =============================================================================
// EMBEDDING + GENERATION
// =============================================================================

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    /// (prompt substring, response), first match wins.
    mapped_responses: Vec<(String, String)>,
    default_response: String,
    latency_ms: u64,
    fail_embed: bool,
    fail_generate: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 16,
            mapped_responses: Vec::new(),
            default_response: "Mock response".to_string(),
            latency_ms: 0,
            fail_embed: false,
            fail_generate: false,
        }
    }
}

/// Mock embedding + generation backend.
#[derive(Clone)]
pub struct MockInferenceBackend {
    config: Arc<MockConfig>,
    calls: Arc<CallLog>,
}

impl MockInferenceBackend {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            calls: Arc::new(CallLog::default()),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Set the response returned when no mapping matches.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Return `output` for any prompt containing `needle`.
    pub fn with_response_mapping(
        mut self,
        needle: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .mapped_responses
            .push((needle.into(), output.into()));
        self
    }

    /// Set simulated latency for all operations.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Make every embedding call fail.
    pub fn with_embed_failure(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_embed = true;
        self
    }

    /// Make every generation call fail.
    pub fn with_generate_failure(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_generate = true;
        self
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.snapshot()
    }

    /// Number of `embed_texts` calls (batches, not texts).
    pub fn embed_call_count(&self) -> usize {
        self.calls.count("embed")
    }

    pub fn generate_call_count(&self) -> usize {
        self.calls.count("generate")
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }
}

impl Default for MockInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockInferenceBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls.push("embed", &texts.join("\u{1e}"));
        self.simulate_latency().await;
        if self.config.fail_embed {
            return Err(Error::Embedding("Simulated failure for testing".to_string()));
        }
        Ok(texts
            .iter()
            .map(|t| MockEmbeddingGenerator::generate(t, self.config.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

#[async_trait]
impl GenerationBackend for MockInferenceBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
        self.calls.push("generate", prompt);
        self.simulate_latency().await;
        if self.config.fail_generate {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }
        let response = self
            .config
            .mapped_responses
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| self.config.default_response.clone());
        Ok(response)
    }

    fn model_name(&self) -> &str {
        "mock-gen"
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit vector from text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension.max(1)];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % vec.len();
            vec[idx] += 0.1;
        }
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
        vec
    }
}

// =============================================================================
// OCR
// =============================================================================

/// OCR mock that treats image bytes as UTF-8 text.
///
/// Images containing `CORRUPT` fail, which exercises per-frame degradation.
#[derive(Clone, Default)]
pub struct MockOcrBackend {
    calls: Arc<CallLog>,
}

impl MockOcrBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.count("recognize")
    }
}

#[async_trait]
impl OcrBackend for MockOcrBackend {
    async fn recognize(&self, image_data: &[u8]) -> Result<Vec<String>> {
        let text = String::from_utf8_lossy(image_data);
        self.calls.push("recognize", &text);
        if text.contains("CORRUPT") {
            return Err(Error::Recognition("Simulated unreadable image".to_string()));
        }
        Ok(split_fragments(&text))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn model_name(&self) -> &str {
        "mock-ocr"
    }
}

// =============================================================================
// TRANSCRIPTION
// =============================================================================

/// Transcription mock returning a fixed segment list.
#[derive(Clone, Default)]
pub struct MockTranscriptionBackend {
    segments: Vec<TranscriptionSegment>,
    fail: bool,
    calls: Arc<CallLog>,
}

impl MockTranscriptionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segments(mut self, segments: Vec<TranscriptionSegment>) -> Self {
        self.segments = segments;
        self
    }

    /// Convenience: build segments from `(start, end, text)` triples.
    pub fn with_triples(self, triples: &[(f64, f64, &str)]) -> Self {
        self.with_segments(
            triples
                .iter()
                .map(|(start, end, text)| TranscriptionSegment {
                    start_secs: *start,
                    end_secs: *end,
                    text: text.to_string(),
                })
                .collect(),
        )
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.count("transcribe")
    }
}

#[async_trait]
impl TranscriptionBackend for MockTranscriptionBackend {
    async fn transcribe(
        &self,
        audio_data: &[u8],
        _mime_type: &str,
        _language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        self.calls
            .push("transcribe", &format!("{} bytes", audio_data.len()));
        if self.fail {
            return Err(Error::Recognition("Simulated ASR outage".to_string()));
        }
        Ok(TranscriptionResult {
            full_text: self
                .segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            segments: self.segments.clone(),
            language: Some("en".to_string()),
            duration_secs: self.segments.last().map(|s| s.end_secs),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail)
    }

    fn model_name(&self) -> &str {
        "mock-asr"
    }
}
