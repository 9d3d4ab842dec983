//! Data model shared by every pipeline stage.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// STAGES
// =============================================================================

/// One step of the video pipeline.
///
/// The declaration order is the execution order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Keyframes,
    Ocr,
    Asr,
    Vector,
    Summary,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Keyframes,
        Stage::Ocr,
        Stage::Asr,
        Stage::Vector,
        Stage::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Keyframes => "keyframes",
            Stage::Ocr => "ocr",
            Stage::Asr => "asr",
            Stage::Vector => "vector",
            Stage::Summary => "summary",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyframes" => Ok(Stage::Keyframes),
            "ocr" => Ok(Stage::Ocr),
            "asr" => Ok(Stage::Asr),
            "vector" => Ok(Stage::Vector),
            "summary" => Ok(Stage::Summary),
            other => Err(Error::InvalidInput(format!("unknown stage: {}", other))),
        }
    }
}

/// Set of requested stages. Iteration always yields execution order,
/// regardless of insertion order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct StageSet(u8);

impl StageSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b1_1111)
    }

    pub fn with(mut self, stage: Stage) -> Self {
        self.insert(stage);
        self
    }

    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    /// True when a stage that consumes keyframes is requested.
    pub fn needs_keyframes(&self) -> bool {
        [Stage::Ocr, Stage::Asr, Stage::Vector, Stage::Summary]
            .iter()
            .any(|s| self.contains(*s))
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut set = StageSet::empty();
        for stage in iter {
            set.insert(stage);
        }
        set
    }
}

impl From<Vec<Stage>> for StageSet {
    fn from(stages: Vec<Stage>) -> Self {
        stages.into_iter().collect()
    }
}

impl From<StageSet> for Vec<Stage> {
    fn from(set: StageSet) -> Self {
        set.iter().collect()
    }
}

impl FromStr for StageSet {
    type Err = Error;

    /// Parse a comma-separated list such as `"summary,keyframes"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Stage::from_str)
            .collect()
    }
}

// =============================================================================
// TASKS
// =============================================================================

/// Lifecycle status of a pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown task status: {}", other))),
        }
    }
}

/// One submission to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTask {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub stages: StageSet,
    pub status: TaskStatus,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
    pub error: Option<String>,
    /// Preview runs never write stage outputs.
    pub preview: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineTask {
    pub fn new(subject_id: Uuid, stages: StageSet, preview: bool) -> Self {
        Self {
            id: crate::new_v7(),
            subject_id,
            stages,
            status: TaskStatus::Pending,
            progress: 0.0,
            error: None,
            preview,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Severity of a task log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Append-only log line attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogRecord {
    pub task_id: Uuid,
    pub subject_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// KEYFRAMES
// =============================================================================

/// A deduplicated I-frame and the text recognized on and around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// 1-based position among kept frames.
    pub seq: u32,
    /// Frame number in the source video.
    pub frame_number: u64,
    pub timestamp_secs: f64,
    /// `MM:SS.cc`
    pub timestamp_formatted: String,
    #[serde(default)]
    pub ocr_lines: Vec<String>,
    #[serde(default)]
    pub asr_text: String,
    /// Image file name, relative to the subject's keyframe directory.
    pub file_name: String,
}

impl Keyframe {
    pub fn new(seq: u32, frame_number: u64, fps: f64, file_name: impl Into<String>) -> Self {
        let timestamp_secs = if fps > 0.0 {
            frame_number as f64 / fps
        } else {
            0.0
        };
        Self {
            seq,
            frame_number,
            timestamp_secs,
            timestamp_formatted: format_timestamp(timestamp_secs),
            ocr_lines: Vec::new(),
            asr_text: String::new(),
            file_name: file_name.into(),
        }
    }

    /// OCR lines joined by a single space.
    pub fn ocr_text(&self) -> String {
        self.ocr_lines.join(" ")
    }

    pub fn has_text(&self) -> bool {
        self.ocr_lines.iter().any(|l| !l.trim().is_empty()) || !self.asr_text.trim().is_empty()
    }
}

/// All keyframes of one subject plus the source timing they were derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyframeSet {
    pub subject_id: Uuid,
    pub fps: f64,
    pub frame_count: u64,
    pub keyframes: Vec<Keyframe>,
}

/// A contiguous run of keyframes summarized together.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    pub start_secs: f64,
    pub end_secs: f64,
    pub keyframes: &'a [Keyframe],
}

impl Section<'_> {
    pub fn duration(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// Display title for the 1-based section `number`.
    pub fn title(&self, number: usize) -> String {
        format!(
            "Section {} ({} - {})",
            number,
            format_clock(self.start_secs),
            format_clock(self.end_secs)
        )
    }
}

/// Format seconds as `MM:SS.cc`, truncating to whole centiseconds.
pub fn format_timestamp(secs: f64) -> String {
    let cs = (secs.max(0.0) * 100.0).floor() as u64;
    format!("{:02}:{:02}.{:02}", cs / 6000, (cs / 100) % 60, cs % 100)
}

/// Format seconds as `MM:SS`, truncating.
pub fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0).floor() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

// =============================================================================
// SUMMARIES
// =============================================================================

/// Cached LLM summary for one section, addressed by a hash of its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummaryCacheEntry {
    pub cache_key: String,
    pub subject_id: Uuid,
    pub section_start: f64,
    pub section_end: f64,
    pub keyframe_count: usize,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl SectionSummaryCacheEntry {
    /// True when the entry is younger than `ttl` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.created_at) < ttl
    }
}

/// Summary of one section inside a [`VideoSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub title: String,
    pub content: String,
    pub start_secs: f64,
    pub end_secs: f64,
    pub keyframe_count: usize,
}

/// Whole-video summary, keywords, and per-section summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub subject_id: Uuid,
    pub summary: String,
    pub keywords: Vec<String>,
    pub sections: Vec<SectionSummary>,
    pub generated_at: DateTime<Utc>,
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Pointer to a persisted per-subject vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexHandle {
    pub subject_id: Uuid,
    pub storage_location: PathBuf,
    pub embedding_model: String,
    pub vector_count: usize,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// SUBJECTS
// =============================================================================

/// What the pipeline needs to know about a video; owned by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source_path: PathBuf,
}
