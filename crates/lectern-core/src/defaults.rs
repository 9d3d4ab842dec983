//! Centralized default constants for the lectern pipeline.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Runtime overrides come from the environment variables named in
//! the `ENV_*` constants; see each crate's `from_env()` constructors.

// =============================================================================
// KEYFRAME EXTRACTION
// =============================================================================

/// Minimum perceptual-hash Hamming distance for a frame to count as new content.
pub const KEYFRAME_SIMILARITY_THRESHOLD: u32 = 10;

/// JPEG quality passed to ffmpeg (`-q:v`, 2 is near lossless).
pub const KEYFRAME_JPEG_QUALITY: u8 = 2;

/// Timeout for any single ffmpeg/ffprobe invocation.
pub const MEDIA_CMD_TIMEOUT_SECS: u64 = 600;

/// Sample rate of the mono WAV handed to speech recognition.
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

// =============================================================================
// SECTIONING
// =============================================================================

/// Gap between consecutive keyframes that forces a section break.
pub const SECTION_GAP_SECS: f64 = 45.0;

/// Sections shorter than this are merged into their predecessor.
pub const SECTION_MIN_DURATION_SECS: f64 = 40.0;

/// Hard upper bound on a section's duration.
pub const SECTION_MAX_DURATION_SECS: f64 = 300.0;

/// Sections with fewer keyframes are merged into their predecessor.
pub const SECTION_MIN_KEYFRAMES: usize = 2;

/// Hard upper bound on keyframes per section.
pub const SECTION_MAX_KEYFRAMES: usize = 15;

/// Word-overlap ratio below which two slides count as different topics.
pub const SECTION_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Desired number of sections per video.
pub const SECTION_MAX_COUNT: usize = 6;

// =============================================================================
// SUMMARY CACHE
// =============================================================================

/// Retention window for section summary cache entries.
pub const SUMMARY_CACHE_TTL_DAYS: i64 = 30;

/// Characters kept when a section summary response is not valid JSON.
pub const SUMMARY_FALLBACK_CHARS: usize = 100;

/// Upper bound on keywords kept from the whole-video summary.
pub const SUMMARY_MAX_KEYWORDS: usize = 10;

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Maximum documents per embedding request.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Number of merged multi-subject indices kept in memory.
pub const MERGE_CACHE_CAPACITY: usize = 32;

/// Default number of hits returned by index search.
pub const SEARCH_TOP_K: usize = 5;

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Number of pipeline workers.
pub const POOL_WORKERS: usize = 2;

/// Capacity of the orchestrator event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Finished task snapshots the orchestrator keeps for lookups; the oldest
/// are evicted first.
pub const FINISHED_TASK_RETENTION: usize = 512;

/// Weight of completed stages in reported progress; the remainder is
/// granted on successful completion.
pub const STAGE_PROGRESS_WEIGHT: f64 = 0.8;

// =============================================================================
// DATABASE
// =============================================================================

/// Connections per pipeline worker: stage writes plus the task log.
pub const DB_CONNECTIONS_PER_WORKER: u32 = 2;

/// Connections kept for the CLI and the task notifier.
pub const DB_RESERVED_CONNECTIONS: u32 = 2;

/// Seconds to wait for a free connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Seconds before an idle connection is closed.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default embedding model name.
pub const EMBED_MODEL: &str = "bge-m3";

/// Default embedding vector dimension for bge-m3.
pub const EMBED_DIMENSION: usize = 1024;

/// Default generation model name.
pub const GEN_MODEL: &str = "qwen2.5:7b";

/// Default vision model used for OCR.
pub const OCR_VISION_MODEL: &str = "qwen2.5vl:7b";

/// Embedding request timeout.
pub const EMBED_TIMEOUT_SECS: u64 = 60;

/// Generation request timeout.
pub const GEN_TIMEOUT_SECS: u64 = 180;

/// OCR request timeout.
pub const OCR_TIMEOUT_SECS: u64 = 60;

/// Transcription request timeout (whole lecture audio).
pub const TRANSCRIPTION_TIMEOUT_SECS: u64 = 1800;

/// Default Whisper model name.
pub const WHISPER_MODEL: &str = "Systran/faster-distil-whisper-large-v3";

/// Operations slower than this are logged at WARN.
pub const SLOW_OPERATION_MS: u128 = 30_000;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

pub const ENV_OLLAMA_BASE: &str = "OLLAMA_BASE";
pub const ENV_OLLAMA_EMBED_MODEL: &str = "OLLAMA_EMBED_MODEL";
pub const ENV_OLLAMA_GEN_MODEL: &str = "OLLAMA_GEN_MODEL";
pub const ENV_OLLAMA_EMBED_DIM: &str = "OLLAMA_EMBED_DIM";
pub const ENV_OLLAMA_VISION_MODEL: &str = "OLLAMA_VISION_MODEL";
pub const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_EMBED_MODEL: &str = "OPENAI_EMBED_MODEL";
pub const ENV_OPENAI_GEN_MODEL: &str = "OPENAI_GEN_MODEL";
pub const ENV_OPENAI_EMBED_DIM: &str = "OPENAI_EMBED_DIM";
pub const ENV_WHISPER_BASE_URL: &str = "WHISPER_BASE_URL";
pub const ENV_WHISPER_MODEL: &str = "WHISPER_MODEL";
pub const ENV_TESSERACT_LANG: &str = "TESSERACT_LANG";
pub const ENV_POOL_WORKERS: &str = "LECTERN_POOL_WORKERS";
pub const ENV_FINISHED_TASK_RETENTION: &str = "LECTERN_FINISHED_TASK_RETENTION";
pub const ENV_DB_MAX_CONNECTIONS: &str = "LECTERN_DB_MAX_CONNECTIONS";
pub const ENV_DB_ACQUIRE_TIMEOUT: &str = "LECTERN_DB_ACQUIRE_TIMEOUT";
pub const ENV_KEYFRAME_DIR: &str = "LECTERN_KEYFRAME_DIR";
pub const ENV_INDEX_DIR: &str = "LECTERN_INDEX_DIR";
pub const ENV_CACHE_DIR: &str = "LECTERN_CACHE_DIR";
pub const ENV_SIMILARITY_THRESHOLD: &str = "LECTERN_SIMILARITY_THRESHOLD";

/// Default keyframe image root.
pub const KEYFRAME_DIR: &str = "data/keyframes";

/// Default vector index root.
pub const INDEX_DIR: &str = "data/vector_indices";

/// Default summary cache root for the filesystem cache store.
pub const CACHE_DIR: &str = "data/section_cache";
