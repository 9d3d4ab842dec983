//! ASR stage: transcribe once, then attach speech to keyframes by time.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use lectern_core::{Error, Keyframe, Result};
use lectern_inference::{
    SubtitleTranscriber, TranscriptionBackend, TranscriptionResult, TranscriptionSegment,
};

use crate::logger::TaskLogger;
use crate::media::MediaToolkit;

/// Separator between consecutive segment texts on one keyframe.
const SEGMENT_SEPARATOR: &str = "  ";

/// Attach each segment to the last keyframe whose timestamp is at or before
/// the segment start, or to the first keyframe when none is.
///
/// `keyframes` must be in timestamp order. Existing ASR text is replaced.
pub fn align_segments(keyframes: &mut [Keyframe], segments: &[TranscriptionSegment]) {
    for kf in keyframes.iter_mut() {
        kf.asr_text.clear();
    }
    if keyframes.is_empty() {
        return;
    }

    let mut ordered: Vec<&TranscriptionSegment> = segments.iter().collect();
    ordered.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

    let mut target = 0;
    for segment in ordered {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        while target + 1 < keyframes.len()
            && keyframes[target + 1].timestamp_secs <= segment.start_secs
        {
            target += 1;
        }
        let slot = &mut keyframes[target].asr_text;
        if !slot.is_empty() {
            slot.push_str(SEGMENT_SEPARATOR);
        }
        slot.push_str(text);
    }
}

pub struct AsrStage {
    transcriber: Option<Arc<dyn TranscriptionBackend>>,
    toolkit: Arc<dyn MediaToolkit>,
}

impl AsrStage {
    pub fn new(
        transcriber: Option<Arc<dyn TranscriptionBackend>>,
        toolkit: Arc<dyn MediaToolkit>,
    ) -> Self {
        Self {
            transcriber,
            toolkit,
        }
    }

    /// Fill the ASR text of every keyframe from `video`.
    ///
    /// A subtitle file next to the video takes precedence over audio
    /// transcription. On failure every keyframe is left with empty ASR text
    /// and an error record is written; the error is returned for the caller
    /// to report, never to abort the task.
    pub async fn run(&self, keyframes: &mut [Keyframe], video: &Path, log: &TaskLogger) -> Result<()> {
        let start = Instant::now();
        match self.transcribe(video, log).await {
            Ok(result) => {
                align_segments(keyframes, &result.segments);
                let covered = keyframes.iter().filter(|k| !k.asr_text.is_empty()).count();
                info!(
                    subsystem = "jobs",
                    component = "asr",
                    segments = result.segments.len(),
                    keyframe_count = keyframes.len(),
                    covered,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "ASR stage finished"
                );
                Ok(())
            }
            Err(e) => {
                for kf in keyframes.iter_mut() {
                    kf.asr_text.clear();
                }
                log.error(format!("asr: speech recognition failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn transcribe(&self, video: &Path, log: &TaskLogger) -> Result<TranscriptionResult> {
        if let Some(subtitles) = SubtitleTranscriber::find_for(video) {
            log.info(format!("asr: using subtitle file {}", subtitles.display()))
                .await;
            return SubtitleTranscriber::load(&subtitles).await;
        }

        let transcriber = self.transcriber.as_ref().ok_or_else(|| {
            Error::Config("no speech recognition backend configured".to_string())
        })?;

        let scratch = tempfile::tempdir()?;
        let audio = scratch.path().join("audio.wav");
        self.toolkit.extract_audio(video, &audio).await?;
        let data = tokio::fs::read(&audio).await?;
        debug!(
            subsystem = "jobs",
            component = "asr",
            model = transcriber.model_name(),
            bytes = data.len(),
            "Transcribing extracted audio"
        );
        transcriber.transcribe(&data, "audio/wav", None).await
    }
}
