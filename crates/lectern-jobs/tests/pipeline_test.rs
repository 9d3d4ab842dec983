//! End-to-end runs of the video pipeline against in-memory stores, a fake
//! media toolkit, and mock inference backends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lectern_db::{MemoryStore, MemorySummaryCache};
use lectern_inference::mock::{MockInferenceBackend, MockOcrBackend, MockTranscriptionBackend};
use lectern_inference::TranscriptionBackend;
use lectern_jobs::{
    Error, FrameHash, KeyframeSet, LogLevel, MediaToolkit, PipelineConfig, PipelineServices,
    PipelineStore, RawFrame, Result, Stage, StageSet, SubjectInfo, TaskContext, TaskOutcome,
    TaskRunner, VideoInfo, VideoPipeline,
};
use lectern_search::{document_text, IndexMerger, IndexStore};

const FPS: f64 = 10.0;
const HASH_A: [u8; 8] = [0x00; 8];
const HASH_B: [u8; 8] = [0xFF; 8];

/// One I-frame the fake decoder "finds": frame number, the text drawn on the
/// slide (written as the image bytes), and its perceptual hash.
#[derive(Clone)]
struct FakeFrame {
    frame_number: u64,
    text: &'static str,
    hash: [u8; 8],
}

fn frame(frame_number: u64, text: &'static str, hash: [u8; 8]) -> FakeFrame {
    FakeFrame {
        frame_number,
        text,
        hash,
    }
}

/// Media toolkit that writes slide text as frame images.
struct FakeMedia {
    frames: Vec<FakeFrame>,
    extract_calls: AtomicUsize,
    cancel_on_extract: Mutex<Option<CancellationToken>>,
}

impl FakeMedia {
    fn new(frames: Vec<FakeFrame>) -> Self {
        Self {
            frames,
            extract_calls: AtomicUsize::new(0),
            cancel_on_extract: Mutex::new(None),
        }
    }

    fn lecture() -> Self {
        Self::new(vec![
            frame(0, "Fourier series\nperiodic signals", HASH_A),
            frame(300, "Fourier series\nperiodic signals", HASH_A),
            frame(600, "Laplace transform\nregion of convergence", HASH_B),
            frame(900, "Z transform\ndiscrete time", HASH_A),
        ])
    }

    /// Cancel `token` while extracting I-frames.
    fn cancelling(self, token: CancellationToken) -> Self {
        *self.cancel_on_extract.lock().unwrap() = Some(token);
        self
    }
}

#[async_trait]
impl MediaToolkit for FakeMedia {
    async fn probe(&self, _video: &Path) -> Result<VideoInfo> {
        Ok(VideoInfo {
            fps: FPS,
            frame_count: 1200,
            duration_secs: 120.0,
        })
    }

    async fn extract_iframes(&self, _video: &Path, out_dir: &Path) -> Result<Vec<RawFrame>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_extract.lock().unwrap().as_ref() {
            token.cancel();
        }
        let mut raw = Vec::new();
        for f in &self.frames {
            let path = out_dir.join(format!("frame_{}.jpg", f.frame_number));
            tokio::fs::write(&path, f.text).await?;
            raw.push(RawFrame {
                frame_number: f.frame_number,
                path,
            });
        }
        Ok(raw)
    }

    async fn hash_frame(&self, frame: &Path) -> Result<FrameHash> {
        let text = tokio::fs::read_to_string(frame).await?;
        self.frames
            .iter()
            .find(|f| f.text == text)
            .map(|f| FrameHash::from_bytes(f.hash.to_vec()))
            .ok_or_else(|| Error::Media(format!("unknown frame {}", frame.display())))
    }

    async fn extract_audio(&self, _video: &Path, out: &Path) -> Result<()> {
        tokio::fs::write(out, b"RIFF....WAVEfmt ").await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

const VIDEO_REPLY: &str = r#"{"summary": "Transforms for signals and systems.", "keywords": ["Fourier series", "Laplace transform", "Z transform"]}"#;
const SECTION_REPLY: &str = r#"{"section_summary": "part of the lecture"}"#;

/// Everything a test needs to inspect after a run.
struct Harness {
    _dir: tempfile::TempDir,
    video: PathBuf,
    store: Arc<MemoryStore>,
    cache: Arc<MemorySummaryCache>,
    media: Arc<FakeMedia>,
    inference: Arc<MockInferenceBackend>,
    indices: IndexStore,
    config: PipelineConfig,
    transcriber: Option<Arc<dyn TranscriptionBackend>>,
}

impl Harness {
    fn new() -> Self {
        Self::with(MemoryStore::new(), FakeMedia::lecture())
    }

    fn with(store: MemoryStore, media: FakeMedia) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("lecture.mp4");
        std::fs::write(&video, b"not really a video").unwrap();
        let config = PipelineConfig::default().with_keyframe_root(dir.path().join("keyframes"));
        let indices = IndexStore::new(dir.path().join("indices"));
        Self {
            _dir: dir,
            video,
            store: Arc::new(store),
            cache: Arc::new(MemorySummaryCache::new()),
            media: Arc::new(media),
            inference: Arc::new(
                MockInferenceBackend::new()
                    .with_dimension(32)
                    .with_response_mapping("extract its keywords", VIDEO_REPLY)
                    .with_fixed_response(SECTION_REPLY),
            ),
            indices,
            config,
            transcriber: Some(Arc::new(MockTranscriptionBackend::new().with_triples(&[
                (0.0, 10.0, "today we cover fourier"),
                (65.0, 80.0, "laplace comes next"),
                (95.0, 100.0, "and finally the z transform"),
            ]))),
        }
    }

    fn with_transcriber(mut self, transcriber: Option<Arc<dyn TranscriptionBackend>>) -> Self {
        self.transcriber = transcriber;
        self
    }

    async fn register(&self, title: &str) -> Uuid {
        self.register_path(title, self.video.clone()).await
    }

    async fn register_path(&self, title: &str, source_path: PathBuf) -> Uuid {
        let subject_id = Uuid::new_v4();
        self.store
            .register_subject(SubjectInfo {
                subject_id,
                title: title.to_string(),
                description: "Signals and systems, week 3".to_string(),
                source_path,
            })
            .await;
        subject_id
    }

    fn pipeline(&self) -> VideoPipeline {
        let services = PipelineServices {
            store: self.store.clone(),
            catalog: self.store.clone(),
            media: self.media.clone(),
            ocr: Arc::new(MockOcrBackend::new()),
            transcriber: self.transcriber.clone(),
            embedder: self.inference.clone(),
            generator: self.inference.clone(),
            summary_cache: self.cache.clone(),
            indices: self.indices.clone(),
        };
        VideoPipeline::new(services, self.config.clone())
    }
}

fn context(subject_id: Uuid, stages: StageSet, preview: bool) -> TaskContext {
    TaskContext::new(
        Uuid::new_v4(),
        subject_id,
        stages,
        preview,
        CancellationToken::new(),
    )
}

async fn log_messages(store: &MemoryStore, task_id: Uuid) -> Vec<(LogLevel, String)> {
    store
        .logs_for(task_id)
        .await
        .into_iter()
        .map(|r| (r.level, r.message))
        .collect()
}

#[tokio::test]
async fn test_full_run_persists_every_stage() {
    let h = Harness::new();
    let subject_id = h.register("Signals 3").await;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let ctx = context(subject_id, StageSet::all(), false)
        .with_progress_callback(move |p| sink.lock().unwrap().push(p));
    let task_id = ctx.task_id;

    let outcome = h.pipeline().run(ctx).await;
    assert_eq!(outcome, TaskOutcome::Completed);

    // The duplicate slide at frame 300 is dropped.
    let set = h.store.load_keyframes(subject_id).await.unwrap().unwrap();
    assert_eq!(set.fps, FPS);
    let frames: Vec<u64> = set.keyframes.iter().map(|k| k.frame_number).collect();
    assert_eq!(frames, vec![0, 600, 900]);
    let image_dir = h.config.keyframe_dir(subject_id);
    for name in ["keyframe_0001.jpg", "keyframe_0002.jpg", "keyframe_0003.jpg"] {
        assert!(image_dir.join(name).is_file(), "missing {name}");
    }

    // OCR read the slide text; ASR went to the keyframe on screen at the time.
    assert_eq!(
        set.keyframes[1].ocr_lines,
        vec!["Laplace transform", "region of convergence"]
    );
    assert_eq!(set.keyframes[0].asr_text, "today we cover fourier");
    assert_eq!(set.keyframes[1].asr_text, "laplace comes next");
    assert_eq!(set.keyframes[2].asr_text, "and finally the z transform");

    // Vector index written and recorded.
    let handle = h.store.vector_index(subject_id).await.unwrap().unwrap();
    assert_eq!(handle.vector_count, 3);
    assert_eq!(handle.storage_location, h.indices.location_for(subject_id));
    assert!(handle.storage_location.is_file());
    assert_eq!(h.indices.load(subject_id).await.unwrap().len(), 3);

    // Summary and its section cache.
    let summary = h.store.summary(subject_id).await.unwrap();
    assert_eq!(summary.summary, "Transforms for signals and systems.");
    assert_eq!(summary.keywords.len(), 3);
    assert!(!summary.sections.is_empty());
    let covered: usize = summary.sections.iter().map(|s| s.keyframe_count).sum();
    assert_eq!(covered, 3);
    assert!(summary
        .sections
        .iter()
        .all(|s| s.content == "part of the lecture"));
    assert_eq!(h.cache.put_count(), summary.sections.len());

    // Progress grows per stage and ends at 1.0.
    let progress = progress.lock().unwrap().clone();
    assert_eq!(progress.len(), 6);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!((progress[4] - 0.8).abs() < 1e-9);
    assert_eq!(progress[5], 1.0);

    let logs = log_messages(&h.store, task_id).await;
    assert!(logs.iter().all(|(level, _)| *level != LogLevel::Error));
    assert_eq!(logs.last().unwrap().1, "task completed");
}

#[tokio::test]
async fn test_rerun_reuses_cached_section_summaries() {
    let h = Harness::new();
    let subject_id = h.register("Signals 3").await;
    let stages: StageSet = "summary,keyframes".parse().unwrap();

    assert_eq!(
        h.pipeline().run(context(subject_id, stages, false)).await,
        TaskOutcome::Completed
    );
    let calls_after_first = h.inference.generate_call_count();
    let puts_after_first = h.cache.put_count();

    assert_eq!(
        h.pipeline().run(context(subject_id, stages, false)).await,
        TaskOutcome::Completed
    );
    // Only the whole-video summary is generated again.
    assert_eq!(h.inference.generate_call_count(), calls_after_first + 1);
    assert_eq!(h.cache.put_count(), puts_after_first);
}

#[tokio::test]
async fn test_partial_run_loads_stored_keyframes() {
    let h = Harness::new();
    let subject_id = h.register("Signals 3").await;

    let first = StageSet::empty().with(Stage::Keyframes).with(Stage::Ocr);
    assert_eq!(
        h.pipeline().run(context(subject_id, first, false)).await,
        TaskOutcome::Completed
    );
    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 1);

    let ctx = context(subject_id, StageSet::empty().with(Stage::Vector), false);
    let task_id = ctx.task_id;
    assert_eq!(h.pipeline().run(ctx).await, TaskOutcome::Completed);

    // No second extraction; the stored OCR text was embedded.
    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 1);
    let handle = h.store.vector_index(subject_id).await.unwrap().unwrap();
    assert_eq!(handle.vector_count, 3);
    let logs = log_messages(&h.store, task_id).await;
    assert!(logs
        .iter()
        .any(|(_, m)| m == "loaded 3 keyframes from storage"));
}

#[tokio::test]
async fn test_summary_only_rerun_uses_stored_keyframes_and_cache() {
    let h = Harness::new();
    let subject_id = h.register("Signals 3").await;

    assert_eq!(
        h.pipeline()
            .run(context(subject_id, StageSet::all(), false))
            .await,
        TaskOutcome::Completed
    );
    let first = h.store.summary(subject_id).await.unwrap();
    let calls_after_full = h.inference.generate_call_count();
    let puts_after_full = h.cache.put_count();
    let summary_writes = h.store.summary_write_count();

    let ctx = context(subject_id, StageSet::empty().with(Stage::Summary), false);
    let task_id = ctx.task_id;
    assert_eq!(h.pipeline().run(ctx).await, TaskOutcome::Completed);

    // Nothing re-extracted; sections rebuilt from the stored keyframes.
    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 1);
    let second = h.store.summary(subject_id).await.unwrap();
    assert_eq!(h.store.summary_write_count(), summary_writes + 1);
    assert_eq!(second.summary, "Transforms for signals and systems.");
    assert_eq!(second.sections.len(), first.sections.len());
    let covered: usize = second.sections.iter().map(|s| s.keyframe_count).sum();
    assert_eq!(covered, 3);

    // Every section came from the cache: one model call for the whole video.
    assert_eq!(h.inference.generate_call_count(), calls_after_full + 1);
    assert_eq!(h.cache.put_count(), puts_after_full);

    let logs = log_messages(&h.store, task_id).await;
    assert!(logs
        .iter()
        .any(|(_, m)| m == "loaded 3 keyframes from storage"));
    let cached = logs
        .iter()
        .filter(|(_, m)| m.starts_with("summary: using cached section summary"))
        .count();
    assert_eq!(cached, second.sections.len());
    assert!(!logs
        .iter()
        .any(|(_, m)| m.starts_with("summary: generating section summary")));
}

#[tokio::test]
async fn test_dependent_stage_without_keyframes_fails() {
    let h = Harness::new();
    let subject_id = h.register("Signals 3").await;

    let ctx = context(subject_id, StageSet::empty().with(Stage::Ocr), false);
    let task_id = ctx.task_id;
    match h.pipeline().run(ctx).await {
        TaskOutcome::Failed(message) => assert!(
            message.contains("no keyframes available for stage ocr"),
            "unexpected error: {message}"
        ),
        other => panic!("expected failure, got {other:?}"),
    }
    let logs = log_messages(&h.store, task_id).await;
    assert!(logs
        .iter()
        .any(|(level, m)| *level == LogLevel::Error && m.starts_with("task failed:")));
}

#[tokio::test]
async fn test_preview_writes_nothing_but_logs() {
    let h = Harness::new();
    let subject_id = h.register("Signals 3").await;

    let ctx = context(subject_id, StageSet::all(), true);
    let task_id = ctx.task_id;
    assert_eq!(h.pipeline().run(ctx).await, TaskOutcome::Completed);

    assert_eq!(h.store.artifact_write_count(), 0);
    assert!(h.store.load_keyframes(subject_id).await.unwrap().is_none());
    assert!(h.store.summary(subject_id).await.is_none());
    assert_eq!(h.cache.put_count(), 0);
    assert!(!h.indices.location_for(subject_id).exists());
    assert!(!h.config.keyframe_dir(subject_id).exists());

    // The summary was still generated, just not stored.
    assert!(h.inference.generate_call_count() >= 2);
    let logs = log_messages(&h.store, task_id).await;
    assert!(logs.iter().any(|(_, m)| m.starts_with("preview \"Signals 3\"")));
    assert_eq!(logs.last().unwrap().1, "task completed");
}

#[tokio::test]
async fn test_missing_video_fails_before_any_stage() {
    let h = Harness::new();
    let subject_id = h
        .register_path("Lost", PathBuf::from("/nonexistent/lecture.mp4"))
        .await;

    let ctx = context(subject_id, StageSet::all(), false);
    match h.pipeline().run(ctx).await {
        TaskOutcome::Failed(message) => assert!(message.contains("video file not found")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.artifact_write_count(), 0);
}

#[tokio::test]
async fn test_unknown_subject_fails() {
    let h = Harness::new();
    let ctx = context(Uuid::new_v4(), StageSet::all(), false);
    match h.pipeline().run(ctx).await {
        TaskOutcome::Failed(message) => assert!(message.contains("Not found")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_keyframe_write_failure_is_fatal() {
    let h = Harness::with(
        MemoryStore::new().with_keyframe_write_failure(),
        FakeMedia::lecture(),
    );
    let subject_id = h.register("Signals 3").await;

    match h.pipeline().run(context(subject_id, StageSet::all(), false)).await {
        TaskOutcome::Failed(message) => {
            assert!(message.contains("failed to save keyframes after keyframes"))
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.store.vector_index(subject_id).await.unwrap().is_none());
    assert!(h.store.summary(subject_id).await.is_none());
}

#[tokio::test]
async fn test_asr_failure_degrades_to_empty_text() {
    let h = Harness::new().with_transcriber(Some(Arc::new(
        MockTranscriptionBackend::new().with_failure(),
    )));
    let subject_id = h.register("Signals 3").await;
    let stages: StageSet = "keyframes,ocr,asr".parse().unwrap();

    let ctx = context(subject_id, stages, false);
    let task_id = ctx.task_id;
    assert_eq!(h.pipeline().run(ctx).await, TaskOutcome::Completed);

    let set = h.store.load_keyframes(subject_id).await.unwrap().unwrap();
    assert!(set.keyframes.iter().all(|k| k.asr_text.is_empty()));
    assert!(set.keyframes.iter().all(|k| !k.ocr_lines.is_empty()));
    let logs = log_messages(&h.store, task_id).await;
    assert!(logs.iter().any(|(level, m)| *level == LogLevel::Error
        && m.contains("speech recognition failed")));
}

#[tokio::test]
async fn test_subtitle_file_replaces_transcription() {
    let h = Harness::new().with_transcriber(None);
    std::fs::write(
        h.video.with_extension("json"),
        r#"{"body":[{"from":1.0,"to":4.0,"content":"welcome back"},
                    {"from":92.0,"to":96.0,"content":"now the z transform"}]}"#,
    )
    .unwrap();
    let subject_id = h.register("Signals 3").await;

    let stages: StageSet = "keyframes,asr".parse().unwrap();
    assert_eq!(
        h.pipeline().run(context(subject_id, stages, false)).await,
        TaskOutcome::Completed
    );

    let set = h.store.load_keyframes(subject_id).await.unwrap().unwrap();
    assert_eq!(set.keyframes[0].asr_text, "welcome back");
    assert_eq!(set.keyframes[1].asr_text, "");
    assert_eq!(set.keyframes[2].asr_text, "now the z transform");
}

#[tokio::test]
async fn test_cancellation_between_stages() {
    let token = CancellationToken::new();
    let h = Harness::with(
        MemoryStore::new(),
        FakeMedia::lecture().cancelling(token.clone()),
    );
    let subject_id = h.register("Signals 3").await;

    let ctx = TaskContext::new(Uuid::new_v4(), subject_id, StageSet::all(), false, token);
    let task_id = ctx.task_id;
    assert_eq!(h.pipeline().run(ctx).await, TaskOutcome::Cancelled);

    // The stage in flight finished and was saved; nothing after it ran.
    assert_eq!(h.store.keyframe_write_count(), 1);
    assert!(h.store.vector_index(subject_id).await.unwrap().is_none());
    let logs = log_messages(&h.store, task_id).await;
    assert!(logs.iter().any(|(level, m)| *level == LogLevel::Warning
        && m == "cancellation requested before stage ocr"));
}

#[tokio::test]
async fn test_cross_subject_search_after_rebuild() {
    let h = Harness::new();
    let merger = Arc::new(IndexMerger::new(h.store.clone()));
    let first = h.register("Signals 3").await;
    let second = h.register("Signals 3, repeat").await;

    let stages: StageSet = "keyframes,ocr,asr,vector".parse().unwrap();
    for subject_id in [first, second] {
        let pipeline = h.pipeline().with_merger(merger.clone());
        assert_eq!(
            pipeline.run(context(subject_id, stages, false)).await,
            TaskOutcome::Completed
        );
    }

    let merged = merger.merge(&[second, first]).await.unwrap();
    assert_eq!(merged.len(), 6);
    assert_eq!(merger.cached_len().await, 1);

    let set: KeyframeSet = h.store.load_keyframes(second).await.unwrap().unwrap();
    let query = document_text(&set.keyframes[1]);
    let hits = merger
        .search_text(h.inference.as_ref(), &[first, second], &query, 2)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|hit| hit.metadata.keyframe_seq == 2));
    assert!((hits[0].score - 1.0).abs() < 1e-5);

    // Rebuilding one subject drops the merged view that contains it.
    let pipeline = h.pipeline().with_merger(merger.clone());
    let vector_only = StageSet::empty().with(Stage::Vector);
    assert_eq!(
        pipeline.run(context(first, vector_only, false)).await,
        TaskOutcome::Completed
    );
    assert_eq!(merger.cached_len().await, 0);
}
