//! Keyframe extraction: I-frames deduplicated by perceptual hash.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use lectern_core::{defaults, Keyframe, Result};

use crate::media::{FrameHash, MediaToolkit};

/// Single forward pass over an ordered sequence that remembers only the most
/// recently kept item.
///
/// The first item is always kept. A later item is kept when its distance from
/// the most recently kept item is strictly greater than `threshold`.
pub struct DistinctFilter<T, F> {
    threshold: u32,
    distance: F,
    last_kept: Option<T>,
}

impl<T, F> DistinctFilter<T, F>
where
    F: Fn(&T, &T) -> u32,
{
    pub fn new(threshold: u32, distance: F) -> Self {
        Self {
            threshold,
            distance,
            last_kept: None,
        }
    }

    /// Offer the next item; true when it is kept.
    pub fn admit(&mut self, item: T) -> bool {
        let keep = match &self.last_kept {
            None => true,
            Some(last) => (self.distance)(last, &item) > self.threshold,
        };
        if keep {
            self.last_kept = Some(item);
        }
        keep
    }
}

/// Result of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractedKeyframes {
    pub fps: f64,
    pub frame_count: u64,
    pub keyframes: Vec<Keyframe>,
}

/// Extracts and deduplicates the I-frames of a video.
pub struct KeyframeExtractor {
    toolkit: Arc<dyn MediaToolkit>,
    threshold: u32,
}

impl KeyframeExtractor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self {
            toolkit,
            threshold: defaults::KEYFRAME_SIMILARITY_THRESHOLD,
        }
    }

    /// Minimum Hamming distance from the last kept frame for a frame to be kept.
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Extract keyframes of `video` into `out_dir` as `keyframe_NNNN.jpg`.
    ///
    /// Previous `keyframe_*.jpg` files in `out_dir` are removed once the first
    /// new keyframe is kept; a run that keeps nothing leaves them in place.
    /// Frames that cannot be hashed are skipped.
    pub async fn extract(&self, video: &Path, out_dir: &Path) -> Result<ExtractedKeyframes> {
        let start = Instant::now();
        let info = self.toolkit.probe(video).await?;

        let scratch = tempfile::tempdir()?;
        let frames = self.toolkit.extract_iframes(video, scratch.path()).await?;
        let candidates = frames.len();

        let mut filter = DistinctFilter::new(self.threshold, |a: &FrameHash, b: &FrameHash| {
            a.distance(b)
        });
        let mut keyframes = Vec::new();
        for frame in frames {
            let hash = match self.toolkit.hash_frame(&frame.path).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "keyframes",
                        frame_number = frame.frame_number,
                        error = %e,
                        "Skipping unreadable frame"
                    );
                    continue;
                }
            };
            if !filter.admit(hash) {
                continue;
            }
            if keyframes.is_empty() {
                tokio::fs::create_dir_all(out_dir).await?;
                clear_keyframe_images(out_dir).await?;
            }
            let seq = keyframes.len() as u32 + 1;
            let file_name = format!("keyframe_{:04}.jpg", seq);
            tokio::fs::copy(&frame.path, out_dir.join(&file_name)).await?;
            keyframes.push(Keyframe::new(seq, frame.frame_number, info.fps, file_name));
        }

        debug!(
            subsystem = "jobs",
            component = "keyframes",
            candidates,
            kept = keyframes.len(),
            threshold = self.threshold,
            "Deduplicated I-frames"
        );
        info!(
            subsystem = "jobs",
            component = "keyframes",
            path = %video.display(),
            keyframe_count = keyframes.len(),
            fps = info.fps,
            duration_ms = start.elapsed().as_millis() as u64,
            "Keyframes extracted"
        );

        Ok(ExtractedKeyframes {
            fps: info.fps,
            frame_count: info.frame_count,
            keyframes,
        })
    }
}

async fn clear_keyframe_images(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let stale = name
            .to_str()
            .map(|n| n.starts_with("keyframe_") && n.ends_with(".jpg"))
            .unwrap_or(false);
        if stale {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}
