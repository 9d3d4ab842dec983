//! OCR backend trait and implementations for keyframe text recognition.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use lectern_core::{defaults, Error, Result};

/// Backend for recognizing text in a single image.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Recognize text fragments in an encoded image (JPEG/PNG), in reading order.
    async fn recognize(&self, image_data: &[u8]) -> Result<Vec<String>>;

    /// Check if the OCR engine is available.
    async fn health_check(&self) -> Result<bool>;

    /// Get the engine or model name being used.
    fn model_name(&self) -> &str;
}

/// Split raw recognized text into trimmed, non-empty lines.
pub fn split_fragments(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// TESSERACT
// =============================================================================

/// Local OCR through the `tesseract` command line tool.
///
/// The image is streamed on stdin and text is read from stdout.
pub struct TesseractOcr {
    binary: String,
    language: String,
    timeout_secs: u64,
}

impl TesseractOcr {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: language.into(),
            timeout_secs: defaults::OCR_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables (`TESSERACT_LANG`, default `eng`).
    pub fn from_env() -> Self {
        let language =
            std::env::var(defaults::ENV_TESSERACT_LANG).unwrap_or_else(|_| "eng".to_string());
        Self::new(language)
    }

    /// Use a different tesseract executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    #[instrument(skip(self, image_data), fields(subsystem = "inference", component = "tesseract", op = "recognize", bytes = image_data.len()))]
    async fn recognize(&self, image_data: &[u8]) -> Result<Vec<String>> {
        let start = Instant::now();
        let mut child = tokio::process::Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Recognition(format!("Failed to spawn {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image_data)
                .await
                .map_err(|e| Error::Recognition(format!("Failed to write image: {}", e)))?;
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| Error::Recognition(format!("tesseract timed out after {}s", self.timeout_secs)))?
        .map_err(|e| Error::Recognition(format!("tesseract failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Recognition(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let fragments = split_fragments(&String::from_utf8_lossy(&output.stdout));
        debug!(
            result_count = fragments.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "OCR complete"
        );
        Ok(fragments)
    }

    async fn health_check(&self) -> Result<bool> {
        match tokio::process::Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => Ok(status.success()),
            Err(e) => {
                warn!(error = %e, "tesseract not available");
                Ok(false)
            }
        }
    }

    fn model_name(&self) -> &str {
        "tesseract"
    }
}

// =============================================================================
// OLLAMA VISION
// =============================================================================

const VISION_OCR_PROMPT: &str = "Transcribe every piece of text visible in this lecture slide. \
Output one line of text per visual line, in reading order. Output only the text, \
no commentary. If there is no text, output nothing.";

/// Remote OCR through an Ollama vision model.
pub struct OllamaVisionOcr {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaVisionOcr {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            timeout_secs: defaults::OCR_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables.
    /// Returns None if OLLAMA_VISION_MODEL is set to an empty string.
    pub fn from_env() -> Option<Self> {
        let model = std::env::var(defaults::ENV_OLLAMA_VISION_MODEL)
            .unwrap_or_else(|_| defaults::OCR_VISION_MODEL.to_string());
        if model.is_empty() {
            return None;
        }
        let base_url = std::env::var(defaults::ENV_OLLAMA_BASE)
            .unwrap_or_else(|_| defaults::OLLAMA_URL.to_string());
        Some(Self::new(base_url, model))
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>, // base64 encoded
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl OcrBackend for OllamaVisionOcr {
    #[instrument(skip(self, image_data), fields(subsystem = "inference", component = "ollama_vision", op = "recognize", model = %self.model))]
    async fn recognize(&self, image_data: &[u8]) -> Result<Vec<String>> {
        use base64::Engine;
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(image_data);

        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: VISION_OCR_PROMPT.to_string(),
            images: vec![image_b64],
            stream: false,
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Recognition(format!("Vision OCR request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "Vision API returned {}: {}",
                status, body
            )));
        }

        let result: OllamaGenerateResponse = response.json().await.map_err(|e| {
            Error::Recognition(format!("Failed to parse vision response: {}", e))
        })?;

        Ok(split_fragments(&crate::json::strip_thinking(&result.response)))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
