use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use lectern_core::{defaults, EmbeddingBackend, Error, GenerationBackend, Result, Vector};

use super::types::*;

/// Hosted endpoint used when `OPENAI_BASE_URL` is unset.
pub const DEFAULT_OPENAI_URL: &str = "https://api.siliconflow.cn/v1";

pub const DEFAULT_EMBED_MODEL: &str = "BAAI/bge-m3";

pub const DEFAULT_GEN_MODEL: &str = "deepseek-ai/DeepSeek-V3";

/// bge-m3 output size.
pub const DEFAULT_DIMENSION: usize = 1024;

pub const DEFAULT_TIMEOUT_SECS: u64 = defaults::GEN_TIMEOUT_SECS;

/// Sampling temperature for summaries; JSON replies use a lower one.
const PROSE_TEMPERATURE: f32 = 0.7;
const JSON_TEMPERATURE: f32 = 0.1;

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub base_url: String,
    /// Sent as a bearer token when present; local servers usually need none.
    pub api_key: Option<String>,
    pub embed_model: String,
    pub gen_model: String,
    pub embed_dimension: usize,
    pub timeout_seconds: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            embed_dimension: DEFAULT_DIMENSION,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl OpenAIConfig {
    /// Defaults overridden by `OPENAI_BASE_URL`, `OPENAI_API_KEY`,
    /// `OPENAI_EMBED_MODEL`, `OPENAI_GEN_MODEL` and `OPENAI_EMBED_DIM`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(defaults::ENV_OPENAI_BASE_URL) {
            config.base_url = url;
        }
        config.api_key = std::env::var(defaults::ENV_OPENAI_API_KEY)
            .ok()
            .filter(|k| !k.is_empty());
        if let Ok(model) = std::env::var(defaults::ENV_OPENAI_EMBED_MODEL) {
            config.embed_model = model;
        }
        if let Ok(model) = std::env::var(defaults::ENV_OPENAI_GEN_MODEL) {
            config.gen_model = model;
        }
        if let Some(dim) = std::env::var(defaults::ENV_OPENAI_EMBED_DIM)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.embed_dimension = dim;
        }
        config
    }
}

/// Embeddings and chat completions over the OpenAI wire format.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        debug!(
            subsystem = "inference",
            component = "openai",
            base_url = %config.base_url,
            embed_model = %config.embed_model,
            gen_model = %config.gen_model,
            "OpenAI-compatible backend configured"
        );
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// POST `body` to `endpoint` and decode the reply. Non-2xx replies carry
    /// the provider's error message; `wrap` picks the error variant.
    async fn post<B, R>(&self, endpoint: &str, body: &B, wrap: fn(String) -> Error) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| wrap(format!("{} request failed: {}", endpoint, e)))?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<OpenAIErrorResponse>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| "no error body".to_string());
            return Err(wrap(format!("{} returned {}: {}", endpoint, status, message)));
        }

        let elapsed = start.elapsed().as_millis();
        if elapsed > defaults::SLOW_OPERATION_MS {
            warn!(
                subsystem = "inference",
                component = "openai",
                endpoint,
                duration_ms = elapsed as u64,
                slow = true,
                "Slow OpenAI-compatible call"
            );
        }
        response
            .json()
            .await
            .map_err(|e| wrap(format!("{} reply not understood: {}", endpoint, e)))
    }

    async fn chat(&self, system: &str, prompt: &str, json_mode: bool) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage::new("system", system));
        }
        messages.push(ChatMessage::new("user", prompt));

        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages,
            temperature: Some(if json_mode {
                JSON_TEMPERATURE
            } else {
                PROSE_TEMPERATURE
            }),
            response_format: json_mode.then(ResponseFormat::json_object),
            stream: false,
        };
        let reply: ChatCompletionResponse = self
            .post("/chat/completions", &request, Error::Inference)
            .await?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Inference("chat reply has no choices".to_string()))
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "openai", op = "embed_texts", model = %self.config.embed_model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: texts.to_vec(),
            encoding_format: Some("float".to_string()),
        };
        let reply: EmbeddingResponse = self.post("/embeddings", &request, Error::Embedding).await?;

        // Providers may answer out of order.
        let mut data = reply.data;
        data.sort_by_key(|d| d.index);
        if data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.chat("", prompt, false).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "openai", op = "generate", model = %self.config.gen_model, prompt_len = prompt.len()))]
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, false).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "openai", op = "generate_json", model = %self.config.gen_model, prompt_len = prompt.len()))]
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, true).await
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}
