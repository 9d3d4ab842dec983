//! Ollama backend: `/api/embed` for embeddings, `/api/chat` for generation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use lectern_core::{defaults, EmbeddingBackend, Error, GenerationBackend, Result, Vector};

pub const DEFAULT_OLLAMA_URL: &str = defaults::OLLAMA_URL;
pub const DEFAULT_EMBED_MODEL: &str = defaults::EMBED_MODEL;
pub const DEFAULT_GEN_MODEL: &str = defaults::GEN_MODEL;
pub const DEFAULT_DIMENSION: usize = defaults::EMBED_DIMENSION;

/// Embedding calls slower than this are logged at WARN.
const SLOW_EMBED_MS: u128 = 5_000;

/// Ollama inference backend.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    embed_model: String,
    gen_model: String,
    dimension: usize,
    embed_timeout_secs: u64,
    gen_timeout_secs: u64,
}

impl OllamaBackend {
    pub fn new() -> Self {
        Self::with_config(
            DEFAULT_OLLAMA_URL.to_string(),
            DEFAULT_EMBED_MODEL.to_string(),
            DEFAULT_GEN_MODEL.to_string(),
            DEFAULT_DIMENSION,
        )
    }

    pub fn with_config(
        base_url: String,
        embed_model: String,
        gen_model: String,
        dimension: usize,
    ) -> Self {
        debug!(
            subsystem = "inference",
            component = "ollama",
            base_url = %base_url,
            embed_model = %embed_model,
            gen_model = %gen_model,
            "Ollama backend configured"
        );
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            embed_model,
            gen_model,
            dimension,
            embed_timeout_secs: defaults::EMBED_TIMEOUT_SECS,
            gen_timeout_secs: defaults::GEN_TIMEOUT_SECS,
        }
    }

    /// Read `OLLAMA_BASE`, `OLLAMA_EMBED_MODEL`, `OLLAMA_GEN_MODEL` and
    /// `OLLAMA_EMBED_DIM` over the defaults.
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };
        let dimension = std::env::var(defaults::ENV_OLLAMA_EMBED_DIM)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DIMENSION);
        Self::with_config(
            var(defaults::ENV_OLLAMA_BASE, DEFAULT_OLLAMA_URL),
            var(defaults::ENV_OLLAMA_EMBED_MODEL, DEFAULT_EMBED_MODEL),
            var(defaults::ENV_OLLAMA_GEN_MODEL, DEFAULT_GEN_MODEL),
            dimension,
        )
    }

    /// Whole-lecture summaries on small GPUs can exceed the default.
    pub fn with_gen_timeout_secs(mut self, secs: u64) -> Self {
        self.gen_timeout_secs = secs;
        self
    }

    /// True when `/api/tags` answers with a success status.
    pub async fn health_check(&self) -> Result<bool> {
        let reachable = match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(subsystem = "inference", component = "ollama", error = %e, "Ollama unreachable");
                false
            }
        };
        Ok(reachable)
    }

    /// POST `body` to `endpoint` with `timeout_secs`; `wrap` picks the
    /// error variant. Non-2xx bodies are returned verbatim in the error.
    async fn post<B, R>(
        &self,
        endpoint: &str,
        body: &B,
        timeout_secs: u64,
        wrap: fn(String) -> Error,
    ) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .timeout(Duration::from_secs(timeout_secs))
            .json(body)
            .send()
            .await
            .map_err(|e| wrap(format!("{} request failed: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(wrap(format!("Ollama {} returned {}: {}", endpoint, status, text)));
        }
        response
            .json()
            .await
            .map_err(|e| wrap(format!("{} reply not understood: {}", endpoint, e)))
    }

    /// `/api/chat` keeps reasoning out of the returned content for thinking
    /// models; JSON mode also disables thinking outright.
    async fn chat(&self, system: &str, prompt: &str, json: bool) -> Result<String> {
        let start = Instant::now();
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage::new("system", system));
        }
        messages.push(ChatMessage::new("user", prompt));

        let request = ChatRequest {
            model: &self.gen_model,
            messages,
            stream: false,
            format: json.then_some("json"),
            think: json.then_some(false),
        };
        let reply: ChatResponse = self
            .post("/api/chat", &request, self.gen_timeout_secs, Error::Inference)
            .await?;

        let elapsed = start.elapsed().as_millis();
        if elapsed > defaults::SLOW_OPERATION_MS {
            warn!(
                duration_ms = elapsed as u64,
                prompt_len = prompt.len(),
                slow = true,
                "Slow generation"
            );
        }
        Ok(reply.message.content)
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vector>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "ollama", op = "embed_texts", model = %self.embed_model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let request = EmbedRequest {
            model: &self.embed_model,
            input: texts,
        };
        let reply: EmbedResponse = self
            .post("/api/embed", &request, self.embed_timeout_secs, Error::Embedding)
            .await?;

        if reply.embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                reply.embeddings.len(),
                texts.len()
            )));
        }
        let elapsed = start.elapsed().as_millis();
        if elapsed > SLOW_EMBED_MS {
            warn!(
                duration_ms = elapsed as u64,
                input_count = texts.len(),
                slow = true,
                "Slow embedding"
            );
        }
        Ok(reply.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.chat("", prompt, false).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "ollama", op = "generate", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, false).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "ollama", op = "generate_json", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, true).await
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}
