//! Media toolkit: probing, I-frame extraction, perceptual hashing, audio.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use img_hash::{HashAlg, HasherConfig};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use lectern_core::{defaults, Error, Result};

/// Timing facts about a video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub frame_count: u64,
    pub duration_secs: f64,
}

/// An extracted frame image and its frame number in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub frame_number: u64,
    pub path: PathBuf,
}

/// Perceptual hash of a frame image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHash(Vec<u8>);

impl FrameHash {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hamming distance in bits. Bytes present in only one hash count as
    /// fully different.
    pub fn distance(&self, other: &FrameHash) -> u32 {
        let common: u32 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        let extra = self.0.len().abs_diff(other.0.len()) as u32 * 8;
        common + extra
    }
}

/// External media operations used by the keyframe and ASR stages.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, video: &Path) -> Result<VideoInfo>;

    /// Write every I-frame of `video` into `out_dir`, ordered by frame number.
    async fn extract_iframes(&self, video: &Path, out_dir: &Path) -> Result<Vec<RawFrame>>;

    async fn hash_frame(&self, frame: &Path) -> Result<FrameHash>;

    /// Extract mono 16 kHz PCM WAV audio to `out`.
    async fn extract_audio(&self, video: &Path, out: &Path) -> Result<()>;

    async fn health_check(&self) -> Result<bool>;
}

/// [`MediaToolkit`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: String,
    ffprobe: String,
    timeout_secs: u64,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            timeout_secs: defaults::MEDIA_CMD_TIMEOUT_SECS,
        }
    }
}

impl FfmpegToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Run a command to completion under a timeout and return its stdout.
async fn run_cmd(cmd: &mut Command, timeout_secs: u64) -> Result<Vec<u8>> {
    let output = tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| Error::Media(format!("External command timed out after {}s", timeout_secs)))?
        .map_err(|e| Error::Media(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.trim().lines().collect();
        let tail = lines[lines.len().saturating_sub(5)..].join("\n");
        return Err(Error::Media(format!(
            "Command failed ({}): {}",
            output.status, tail
        )));
    }

    Ok(output.stdout)
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((n, d)) => (n.trim().parse::<f64>().ok()?, d.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    (den > 0.0 && num > 0.0).then(|| num / den)
}

/// Interpret `ffprobe -of json` output for the first video stream.
pub(crate) fn parse_probe_output(raw: &[u8]) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_slice(raw)
        .map_err(|e| Error::Media(format!("Unreadable ffprobe output: {}", e)))?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| Error::Media("No video stream found".to_string()))?;

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);
    let duration_secs = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let frame_count = [&stream.nb_frames, &stream.nb_read_packets]
        .into_iter()
        .flatten()
        .find_map(|n| n.trim().parse::<u64>().ok())
        .unwrap_or_else(|| (duration_secs * fps).round() as u64);

    Ok(VideoInfo {
        fps,
        frame_count,
        duration_secs,
    })
}

/// Frame number encoded in an extracted file name such as `frame_1250.jpg`.
pub(crate) fn parse_frame_number(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("frame_")?
        .strip_suffix(".jpg")?
        .parse()
        .ok()
}

fn hash_image_file(path: &Path) -> Result<FrameHash> {
    let decoded = image::open(path)
        .map_err(|e| Error::Media(format!("Failed to load frame {}: {}", path.display(), e)))?;

    // img_hash links its own image version; hand it raw RGBA pixels.
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    use img_hash::image::{ImageBuffer, Rgba};
    let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width, height, rgba.into_raw())
            .ok_or_else(|| Error::Media("Failed to convert image buffer".to_string()))?;
    let img = img_hash::image::DynamicImage::ImageRgba8(buffer);

    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher();
    Ok(FrameHash::from_bytes(hasher.hash_image(&img).as_bytes()))
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, video: &Path) -> Result<VideoInfo> {
        let stdout = run_cmd(
            Command::new(&self.ffprobe)
                .args(["-v", "error", "-select_streams", "v:0"])
                .args([
                    "-show_entries",
                    "stream=r_frame_rate,avg_frame_rate,nb_frames",
                ])
                .args(["-show_entries", "format=duration"])
                .args(["-of", "json"])
                .arg(video),
            self.timeout_secs,
        )
        .await?;
        let info = parse_probe_output(&stdout)?;
        debug!(
            subsystem = "media",
            component = "ffprobe",
            path = %video.display(),
            fps = info.fps,
            frame_count = info.frame_count,
            "Probed video"
        );
        Ok(info)
    }

    async fn extract_iframes(&self, video: &Path, out_dir: &Path) -> Result<Vec<RawFrame>> {
        let start = Instant::now();
        tokio::fs::create_dir_all(out_dir).await?;

        // -frame_pts names each file after the frame's presentation index.
        run_cmd(
            Command::new(&self.ffmpeg)
                .args(["-hide_banner", "-loglevel", "error", "-i"])
                .arg(video)
                .args(["-vf", "select='eq(pict_type\\,I)'"])
                .args(["-vsync", "vfr", "-frame_pts", "1"])
                .args(["-q:v", &defaults::KEYFRAME_JPEG_QUALITY.to_string()])
                .arg("-y")
                .arg(out_dir.join("frame_%d.jpg")),
            self.timeout_secs,
        )
        .await?;

        let mut frames = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(frame_number) = name.to_str().and_then(parse_frame_number) {
                frames.push(RawFrame {
                    frame_number,
                    path: entry.path(),
                });
            }
        }
        frames.sort_by_key(|f| f.frame_number);

        info!(
            subsystem = "media",
            component = "ffmpeg",
            op = "extract_iframes",
            path = %video.display(),
            result_count = frames.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Extracted I-frames"
        );
        Ok(frames)
    }

    async fn hash_frame(&self, frame: &Path) -> Result<FrameHash> {
        let path = frame.to_path_buf();
        tokio::task::spawn_blocking(move || hash_image_file(&path))
            .await
            .map_err(|e| Error::Internal(format!("Hash task failed: {}", e)))?
    }

    async fn extract_audio(&self, video: &Path, out: &Path) -> Result<()> {
        run_cmd(
            Command::new(&self.ffmpeg)
                .args(["-hide_banner", "-loglevel", "error", "-i"])
                .arg(video)
                .arg("-vn")
                .args(["-acodec", "pcm_s16le"])
                .args(["-ar", &defaults::AUDIO_SAMPLE_RATE.to_string()])
                .args(["-ac", "1"])
                .arg("-y")
                .arg(out),
            self.timeout_secs,
        )
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let ok = match Command::new(binary).arg("-version").output().await {
                Ok(output) => output.status.success(),
                Err(_) => false,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
