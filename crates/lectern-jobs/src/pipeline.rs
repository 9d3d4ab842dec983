//! The video pipeline runner: selected stages in fixed order for one subject.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use lectern_core::{
    defaults, EmbeddingBackend, Error, GenerationBackend, KeyframeSet, PipelineStore, Result,
    Stage, SubjectCatalog, SubjectInfo, SummaryCacheStore, VectorIndexHandle,
};
use lectern_inference::{OcrBackend, TranscriptionBackend};
use lectern_search::{IndexBuilder, IndexMerger, IndexStore};

use crate::handler::{TaskContext, TaskOutcome, TaskRunner};
use crate::logger::TaskLogger;
use crate::media::MediaToolkit;
use crate::stages::{AsrStage, KeyframeExtractor, OcrStage, SectionConfig, SectionSummarizer};

/// Runtime settings for [`VideoPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of per-subject keyframe image directories.
    pub keyframe_root: PathBuf,
    /// Perceptual-hash distance a frame must exceed to be kept.
    pub similarity_threshold: u32,
    pub sections: SectionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keyframe_root: PathBuf::from(defaults::KEYFRAME_DIR),
            similarity_threshold: defaults::KEYFRAME_SIMILARITY_THRESHOLD,
            sections: SectionConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LECTERN_KEYFRAME_DIR` | `data/keyframes` | Keyframe image root |
    /// | `LECTERN_SIMILARITY_THRESHOLD` | `10` | Keyframe dedup distance |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(defaults::ENV_KEYFRAME_DIR) {
            config.keyframe_root = PathBuf::from(dir);
        }
        if let Some(threshold) = std::env::var(defaults::ENV_SIMILARITY_THRESHOLD)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.similarity_threshold = threshold;
        }
        config
    }

    pub fn with_keyframe_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.keyframe_root = root.into();
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: u32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_sections(mut self, sections: SectionConfig) -> Self {
        self.sections = sections;
        self
    }

    /// Keyframe image directory of one subject.
    pub fn keyframe_dir(&self, subject_id: Uuid) -> PathBuf {
        self.keyframe_root.join(format!("video_{}", subject_id))
    }
}

/// Everything the pipeline talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub store: Arc<dyn PipelineStore>,
    pub catalog: Arc<dyn SubjectCatalog>,
    pub media: Arc<dyn MediaToolkit>,
    pub ocr: Arc<dyn OcrBackend>,
    /// `None` leaves speech recognition to subtitle files only.
    pub transcriber: Option<Arc<dyn TranscriptionBackend>>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub generator: Arc<dyn GenerationBackend>,
    pub summary_cache: Arc<dyn SummaryCacheStore>,
    pub indices: IndexStore,
}

/// How a stage run ended when no fatal error occurred.
enum RunEnd {
    Completed,
    Cancelled,
}

/// [`TaskRunner`] for lecture videos.
pub struct VideoPipeline {
    services: PipelineServices,
    config: PipelineConfig,
    merger: Option<Arc<IndexMerger>>,
}

impl VideoPipeline {
    pub fn new(services: PipelineServices, config: PipelineConfig) -> Self {
        Self {
            services,
            config,
            merger: None,
        }
    }

    /// Invalidate this merger's cached views whenever a subject index is rebuilt.
    pub fn with_merger(mut self, merger: Arc<IndexMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn run_stages(&self, ctx: &TaskContext, log: &TaskLogger) -> Result<RunEnd> {
        let subject = self
            .services
            .catalog
            .describe(ctx.subject_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject {}", ctx.subject_id)))?;

        if !tokio::fs::try_exists(&subject.source_path).await.unwrap_or(false) {
            return Err(Error::InvalidInput(format!(
                "video file not found: {}",
                subject.source_path.display()
            )));
        }

        let mode = if ctx.preview { "preview" } else { "processing" };
        log.info(format!(
            "{} \"{}\" (stages: {})",
            mode, subject.title, ctx.stages
        ))
        .await;

        // Preview keyframes live only as long as the run.
        let preview_dir = if ctx.preview && ctx.stages.contains(Stage::Keyframes) {
            Some(tempfile::tempdir()?)
        } else {
            None
        };
        let image_dir = match &preview_dir {
            Some(dir) => dir.path().to_path_buf(),
            None => self.config.keyframe_dir(subject.subject_id),
        };

        let total = ctx.stages.len().max(1) as f64;
        let mut completed = 0usize;
        let mut set = KeyframeSet {
            subject_id: subject.subject_id,
            fps: 0.0,
            frame_count: 0,
            keyframes: Vec::new(),
        };

        // Dependent stages without extraction work on the stored set.
        if ctx.stages.needs_keyframes() && !ctx.stages.contains(Stage::Keyframes) {
            if let Some(stored) = self.services.store.load_keyframes(subject.subject_id).await? {
                log.info(format!(
                    "loaded {} keyframes from storage",
                    stored.keyframes.len()
                ))
                .await;
                set = stored;
            }
        }

        for stage in ctx.stages.iter() {
            if ctx.is_cancelled() {
                log.warning(format!("cancellation requested before stage {}", stage))
                    .await;
                return Ok(RunEnd::Cancelled);
            }

            if stage != Stage::Keyframes && set.keyframes.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "no keyframes available for stage {}",
                    stage
                )));
            }

            let start = Instant::now();
            log.info(format!("stage {}: start", stage)).await;
            match stage {
                Stage::Keyframes => {
                    self.keyframes_stage(&subject, &image_dir, &mut set, log).await;
                    if !ctx.preview && !set.keyframes.is_empty() {
                        self.persist_keyframes(&set, stage).await?;
                    }
                }
                Stage::Ocr => {
                    OcrStage::new(self.services.ocr.clone())
                        .run(&mut set.keyframes, &image_dir, log)
                        .await;
                    if !ctx.preview {
                        self.persist_keyframes(&set, stage).await?;
                    }
                }
                Stage::Asr => {
                    // Failures are logged by the stage and leave empty ASR text.
                    let _ = AsrStage::new(
                        self.services.transcriber.clone(),
                        self.services.media.clone(),
                    )
                    .run(&mut set.keyframes, &subject.source_path, log)
                    .await;
                    if !ctx.preview {
                        self.persist_keyframes(&set, stage).await?;
                    }
                }
                Stage::Vector => self.vector_stage(&set, ctx.preview, log).await,
                Stage::Summary => self.summary_stage(&subject, &set, ctx.preview, log).await,
            }

            completed += 1;
            log.info(format!(
                "stage {}: done in {} ms",
                stage,
                start.elapsed().as_millis()
            ))
            .await;
            ctx.report_progress(completed as f64 / total * defaults::STAGE_PROGRESS_WEIGHT);
        }

        Ok(RunEnd::Completed)
    }

    async fn keyframes_stage(
        &self,
        subject: &SubjectInfo,
        out_dir: &Path,
        set: &mut KeyframeSet,
        log: &TaskLogger,
    ) {
        let extractor = KeyframeExtractor::new(self.services.media.clone())
            .with_threshold(self.config.similarity_threshold);
        match extractor.extract(&subject.source_path, out_dir).await {
            Ok(extracted) => {
                log.info(format!(
                    "extracted {} keyframes (fps {:.2}, {} frames)",
                    extracted.keyframes.len(),
                    extracted.fps,
                    extracted.frame_count
                ))
                .await;
                set.fps = extracted.fps;
                set.frame_count = extracted.frame_count;
                set.keyframes = extracted.keyframes;
            }
            Err(e) => {
                log.error(format!("keyframe extraction failed: {}", e)).await;
                set.keyframes.clear();
            }
        }
    }

    async fn persist_keyframes(&self, set: &KeyframeSet, stage: Stage) -> Result<()> {
        self.services
            .store
            .replace_keyframes(set)
            .await
            .map_err(|e| Error::Internal(format!("failed to save keyframes after {}: {}", stage, e)))
    }

    async fn vector_stage(&self, set: &KeyframeSet, preview: bool, log: &TaskLogger) {
        let built = match IndexBuilder::new(self.services.embedder.clone())
            .build(set.subject_id, &set.keyframes)
            .await
        {
            Ok(built) => built,
            Err(e) => {
                log.warning(format!("vector index not built: {}", e)).await;
                return;
            }
        };
        if built.failed_batches > 0 {
            log.warning(format!(
                "{} embedding batches failed and were skipped",
                built.failed_batches
            ))
            .await;
        }
        log.info(format!(
            "vector index built with {} documents ({} keyframes without text)",
            built.index.len(),
            built.skipped_empty
        ))
        .await;

        if preview {
            return;
        }

        let location = match self.services.indices.save(set.subject_id, &built.index).await {
            Ok(location) => location,
            Err(e) => {
                log.error(format!("failed to write vector index: {}", e)).await;
                return;
            }
        };
        let handle = VectorIndexHandle {
            subject_id: set.subject_id,
            storage_location: location,
            embedding_model: built.index.embedding_model.clone(),
            vector_count: built.index.len(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.services.store.upsert_vector_index(&handle).await {
            log.error(format!("failed to record vector index: {}", e)).await;
            return;
        }
        if let Some(merger) = &self.merger {
            merger.invalidate(set.subject_id).await;
        }
    }

    async fn summary_stage(
        &self,
        subject: &SubjectInfo,
        set: &KeyframeSet,
        preview: bool,
        log: &TaskLogger,
    ) {
        let summarizer = SectionSummarizer::new(
            self.services.generator.clone(),
            self.services.summary_cache.clone(),
        )
        .with_section_config(self.config.sections.clone());

        let summary = match summarizer.summarize(subject, &set.keyframes, preview, log).await {
            Ok(summary) => summary,
            Err(e) => {
                log.warning(format!("video summary generation failed: {}", e))
                    .await;
                return;
            }
        };

        if preview {
            log.info(format!(
                "preview: summary with {} keywords and {} sections not saved",
                summary.keywords.len(),
                summary.sections.len()
            ))
            .await;
            return;
        }
        match self.services.store.upsert_summary(&summary).await {
            Ok(()) => {
                log.info(format!(
                    "video summary saved: {} keywords, {} sections",
                    summary.keywords.len(),
                    summary.sections.len()
                ))
                .await
            }
            Err(e) => log.error(format!("failed to save video summary: {}", e)).await,
        }
    }
}

#[async_trait]
impl TaskRunner for VideoPipeline {
    async fn run(&self, ctx: TaskContext) -> TaskOutcome {
        if ctx.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        let log = TaskLogger::new(self.services.store.clone(), ctx.task_id, ctx.subject_id);
        let start = Instant::now();

        match self.run_stages(&ctx, &log).await {
            Ok(RunEnd::Completed) => {
                ctx.report_progress(1.0);
                log.info("task completed").await;
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    task_id = %ctx.task_id,
                    subject_id = %ctx.subject_id,
                    stages = %ctx.stages,
                    preview = ctx.preview,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Pipeline finished"
                );
                TaskOutcome::Completed
            }
            Ok(RunEnd::Cancelled) => TaskOutcome::Cancelled,
            Err(e) => {
                log.error(format!("task failed: {}", e)).await;
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    task_id = %ctx.task_id,
                    error = %e,
                    "Pipeline failed"
                );
                TaskOutcome::Failed(e.to_string())
            }
        }
    }
}
