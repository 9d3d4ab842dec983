//! Speech recognition: a Whisper-compatible HTTP client and a loader for
//! subtitle files that stand in for recognition.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use lectern_core::{defaults, Error, Result};

/// Recognised speech between two instants of the recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionResult {
    pub full_text: String,
    /// Ordered by `start_secs`.
    pub segments: Vec<TranscriptionSegment>,
    /// ISO 639-1, when the recogniser reports one.
    pub language: Option<String>,
    pub duration_secs: Option<f64>,
}

#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Recognise speech in an encoded audio clip. `language` is a hint; the
    /// backend detects it when `None`.
    async fn transcribe(
        &self,
        audio_data: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionResult>;

    async fn health_check(&self) -> Result<bool>;

    fn model_name(&self) -> &str;
}

/// Client for `/v1/audio/transcriptions` as served by faster-whisper and
/// similar OpenAI-compatible servers.
pub struct WhisperBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl WhisperBackend {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
            timeout_secs: defaults::TRANSCRIPTION_TIMEOUT_SECS,
        }
    }

    /// `None` unless `WHISPER_BASE_URL` names a server.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var(defaults::ENV_WHISPER_BASE_URL)
            .ok()
            .filter(|url| !url.is_empty())?;
        let model = std::env::var(defaults::ENV_WHISPER_MODEL)
            .unwrap_or_else(|_| defaults::WHISPER_MODEL.to_string());
        Some(Self::new(base_url, model))
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn form(&self, audio_data: &[u8], mime_type: &str, language: Option<&str>) -> Result<Form> {
        let file = Part::bytes(audio_data.to_vec())
            .file_name(format!("audio.{}", audio_extension(mime_type)))
            .mime_str(mime_type)
            .map_err(|e| Error::Internal(format!("invalid audio MIME type {}: {}", mime_type, e)))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        Ok(match language {
            Some(lang) => form.text("language", lang.to_string()),
            None => form,
        })
    }
}

fn audio_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        _ => "wav",
    }
}

/// `verbose_json` reply.
#[derive(Deserialize)]
struct VerboseTranscript {
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
    language: Option<String>,
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl From<VerboseTranscript> for TranscriptionResult {
    fn from(reply: VerboseTranscript) -> Self {
        Self {
            full_text: reply.text,
            segments: reply
                .segments
                .into_iter()
                .map(|s| TranscriptionSegment {
                    start_secs: s.start,
                    end_secs: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
            language: reply.language,
            duration_secs: reply.duration,
        }
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    #[instrument(skip(self, audio_data), fields(subsystem = "inference", component = "whisper", op = "transcribe", model = %self.model, bytes = audio_data.len()))]
    async fn transcribe(
        &self,
        audio_data: &[u8],
        mime_type: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .multipart(self.form(audio_data, mime_type, language)?)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Recognition(format!("whisper request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!("whisper returned {}: {}", status, body)));
        }
        let reply: VerboseTranscript = response
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("whisper reply not understood: {}", e)))?;
        let result = TranscriptionResult::from(reply);

        let elapsed = start.elapsed().as_millis();
        debug!(
            result_count = result.segments.len(),
            duration_ms = elapsed as u64,
            "Transcription complete"
        );
        // Long lectures legitimately take minutes.
        if elapsed > defaults::SLOW_OPERATION_MS * 10 {
            warn!(duration_ms = elapsed as u64, slow = true, "Slow transcription");
        }
        Ok(result)
    }

    async fn health_check(&self) -> Result<bool> {
        let ok = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false);
        Ok(ok)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// SUBTITLE FILES
// =============================================================================

/// Pre-made subtitles stored next to a video as `<video>.json`.
///
/// Format: `{"body": [{"from": 1.2, "to": 3.4, "content": "..."}]}`.
/// When present they replace audio transcription for that video.
pub struct SubtitleTranscriber;

#[derive(Deserialize)]
struct SubtitleFile {
    #[serde(default)]
    body: Vec<SubtitleCue>,
}

#[derive(Deserialize)]
struct SubtitleCue {
    from: f64,
    to: f64,
    #[serde(default)]
    content: String,
}

impl SubtitleTranscriber {
    /// Path of the subtitle file for `video`, if one exists.
    pub fn find_for(video: &Path) -> Option<PathBuf> {
        let candidate = video.with_extension("json");
        candidate.is_file().then_some(candidate)
    }

    /// Load a subtitle file as a transcription.
    pub async fn load(path: &Path) -> Result<TranscriptionResult> {
        let raw = tokio::fs::read_to_string(path).await?;
        let file: SubtitleFile = serde_json::from_str(&raw)?;

        let segments: Vec<TranscriptionSegment> = file
            .body
            .into_iter()
            .filter(|cue| !cue.content.trim().is_empty())
            .map(|cue| TranscriptionSegment {
                start_secs: cue.from,
                end_secs: cue.to,
                text: cue.content.trim().to_string(),
            })
            .collect();

        info!(
            subsystem = "inference",
            component = "subtitles",
            path = %path.display(),
            result_count = segments.len(),
            "Loaded subtitle file"
        );

        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let duration_secs = segments.last().map(|s| s.end_secs);

        Ok(TranscriptionResult {
            full_text,
            segments,
            language: None,
            duration_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_transcription_segment_serialization() {
        let segment = TranscriptionSegment {
            start_secs: 0.0,
            end_secs: 5.5,
            text: "Hello world".to_string(),
        };

        let json = serde_json::to_value(&segment).unwrap();
        assert_eq!(json["start_secs"], 0.0);
        assert_eq!(json["end_secs"], 5.5);
        assert_eq!(json["text"], "Hello world");
    }

    #[test]
    fn test_whisper_from_env_requires_base_url() {
        std::env::remove_var(defaults::ENV_WHISPER_BASE_URL);
        assert!(WhisperBackend::from_env().is_none());
    }

    #[tokio::test]
    async fn test_whisper_parses_verbose_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "Welcome. Today: eigenvalues.",
                "language": "en",
                "duration": 12.0,
                "segments": [
                    {"start": 0.0, "end": 2.0, "text": " Welcome."},
                    {"start": 2.5, "end": 6.0, "text": " Today: eigenvalues. "}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = WhisperBackend::new(server.uri(), "whisper-test".to_string());
        let result = backend.transcribe(b"RIFF", "audio/wav", None).await.unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].text, "Today: eigenvalues.");
        assert_eq!(result.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_whisper_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = WhisperBackend::new(server.uri(), "whisper-test".to_string());
        let err = backend.transcribe(b"RIFF", "audio/wav", Some("en")).await.unwrap_err();
        assert!(matches!(err, Error::Recognition(_)));
    }

    #[tokio::test]
    async fn test_subtitle_file_found_and_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("lecture.mp4");
        std::fs::write(&video, b"").unwrap();
        assert!(SubtitleTranscriber::find_for(&video).is_none());

        let subs = dir.path().join("lecture.json");
        std::fs::write(
            &subs,
            r#"{"body":[{"from":1.0,"to":2.0,"content":"hello","sid":1},
                        {"from":2.0,"to":3.0,"content":"  "},
                        {"from":3.0,"to":4.5,"content":"world"}]}"#,
        )
        .unwrap();

        let found = SubtitleTranscriber::find_for(&video).unwrap();
        let result = SubtitleTranscriber::load(&found).await.unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.full_text, "hello world");
        assert_eq!(result.duration_secs, Some(4.5));
    }

    #[tokio::test]
    async fn test_subtitle_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let subs = dir.path().join("bad.json");
        std::fs::write(&subs, "not json").unwrap();
        let err = SubtitleTranscriber::load(&subs).await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
