//! lectern: run the lecture-video pipeline and query its indices.
//!
//! Environment variables:
//!   DATABASE_URL - PostgreSQL connection string (required)
//!   LOG_FORMAT   - "json" or "text" (default: "text")
//!   LOG_FILE     - path to log file (optional, enables daily-rotated file logging)
//!   RUST_LOG     - standard env filter (default: "lectern=info,lectern_jobs=info")

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use lectern_db::{Database, FilesystemSummaryCache};
use lectern_inference::{
    OcrBackend, OllamaBackend, OllamaVisionOcr, TesseractOcr, TranscriptionBackend,
    WhisperBackend,
};
use lectern_jobs::{
    defaults, EmbeddingBackend, FfmpegToolkit, GenerationBackend, MediaToolkit, Orchestrator,
    OrchestratorConfig, OrchestratorEvent, PipelineConfig, PipelineServices, StageSet,
    StoreTaskNotifier, SubjectInfo, SummaryCacheStore, TaskStatus, VideoPipeline,
};
use lectern_search::{IndexMerger, IndexStore};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(author, version, about = "Lecture-video knowledge pipeline")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pipeline stages for one video
    Process {
        /// Subject (video) id
        subject_id: Uuid,

        /// Comma-separated stages (keyframes,ocr,asr,vector,summary)
        #[arg(short, long, default_value = "keyframes,ocr,asr,vector,summary")]
        stages: StageSet,

        /// Run without persisting any stage output
        #[arg(long)]
        preview: bool,

        /// Register or update the subject with this video file first
        #[arg(long)]
        video: Option<PathBuf>,

        /// Title used when registering with --video
        #[arg(long, requires = "video")]
        title: Option<String>,

        /// Cache section summaries on disk instead of in the database
        #[arg(long)]
        file_cache: bool,
    },

    /// Search the merged indices of one or more videos
    Search {
        /// Query text
        #[arg(short, long)]
        query: String,

        /// Subject ids to search
        #[arg(required = true, num_args = 1..)]
        subjects: Vec<Uuid>,

        /// Number of hits
        #[arg(short, default_value_t = defaults::SEARCH_TOP_K)]
        k: usize,
    },

    /// Check the database, media tools, and inference backends
    Health,
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lectern=info,lectern_jobs=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("lectern.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    }
}

async fn connect() -> anyhow::Result<Database> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let db = Database::connect(&url)
        .await
        .context("failed to connect to database")?;
    #[cfg(feature = "migrations")]
    db.migrate().await.context("failed to run migrations")?;
    Ok(db)
}

/// Embedding and generation backend: an OpenAI-compatible endpoint when
/// configured and compiled in, otherwise Ollama.
fn language_backends() -> anyhow::Result<(Arc<dyn EmbeddingBackend>, Arc<dyn GenerationBackend>)> {
    #[cfg(feature = "openai")]
    if std::env::var(defaults::ENV_OPENAI_BASE_URL).is_ok() {
        let backend = Arc::new(lectern_inference::OpenAIBackend::from_env()?);
        let embedder: Arc<dyn EmbeddingBackend> = backend.clone();
        let generator: Arc<dyn GenerationBackend> = backend;
        return Ok((embedder, generator));
    }
    let backend = Arc::new(OllamaBackend::from_env());
    let embedder: Arc<dyn EmbeddingBackend> = backend.clone();
    let generator: Arc<dyn GenerationBackend> = backend;
    Ok((embedder, generator))
}

fn ocr_backend() -> Arc<dyn OcrBackend> {
    match OllamaVisionOcr::from_env() {
        Some(vision) => Arc::new(vision),
        None => Arc::new(TesseractOcr::from_env()),
    }
}

async fn process(
    subject_id: Uuid,
    stages: StageSet,
    preview: bool,
    video: Option<PathBuf>,
    title: Option<String>,
    file_cache: bool,
) -> anyhow::Result<ExitCode> {
    let db = connect().await?;

    if let Some(path) = video {
        let title = title.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| subject_id.to_string())
        });
        db.pipeline
            .register_subject(&SubjectInfo {
                subject_id,
                title,
                description: String::new(),
                source_path: path,
            })
            .await?;
    }

    let store = Arc::new(db.pipeline.clone());
    let (embedder, generator) = language_backends()?;
    let summary_cache: Arc<dyn SummaryCacheStore> = if file_cache {
        Arc::new(FilesystemSummaryCache::from_env())
    } else {
        Arc::new(db.summary_cache.clone())
    };
    let services = PipelineServices {
        store: store.clone(),
        catalog: store.clone(),
        media: Arc::new(FfmpegToolkit::new()),
        ocr: ocr_backend(),
        transcriber: WhisperBackend::from_env().map(|w| Arc::new(w) as Arc<dyn TranscriptionBackend>),
        embedder,
        generator,
        summary_cache,
        indices: IndexStore::from_env(),
    };
    let pipeline = VideoPipeline::new(services, PipelineConfig::from_env());

    let orchestrator = Orchestrator::builder(Arc::new(pipeline))
        .with_config(OrchestratorConfig::from_env())
        .with_notifier(Arc::new(StoreTaskNotifier::new(store.clone())))
        .start();

    let mut events = orchestrator.events();
    let (task_id, cancel) = orchestrator.submit(subject_id, stages, preview).await?;
    info!(task_id = %task_id, subject_id = %subject_id, stages = %stages, preview, "Submitted");
    println!("task {} submitted ({})", task_id, stages);

    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("cancelling task {}...", task_id);
                cancel.cancel();
            }
            event = events.recv() => match event {
                Ok(OrchestratorEvent::TaskProgress { task_id: id, progress }) if id == task_id => {
                    println!("progress {:>3.0}%", progress * 100.0);
                }
                Ok(OrchestratorEvent::TaskFinished { task_id: id, status, error }) if id == task_id => {
                    match error {
                        Some(message) => println!("task {}: {}", status.as_str(), message),
                        None => println!("task {}", status.as_str()),
                    }
                    break status;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break TaskStatus::Failed,
            }
        }
    };

    orchestrator.shutdown().await;
    Ok(if status == TaskStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn search(query: String, subjects: Vec<Uuid>, k: usize) -> anyhow::Result<ExitCode> {
    let db = connect().await?;
    let (embedder, _) = language_backends()?;
    let merger = IndexMerger::new(Arc::new(db.pipeline.clone()));

    let hits = merger
        .search_text(embedder.as_ref(), &subjects, &query, k)
        .await?;
    if hits.is_empty() {
        println!("no results");
    }
    for hit in hits {
        println!(
            "{:.3}  {}  {}  #{}",
            hit.score,
            hit.metadata.subject_id,
            hit.metadata.timestamp_formatted,
            hit.metadata.keyframe_seq
        );
        for line in hit.text.lines() {
            println!("       {}", line);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn health() -> anyhow::Result<ExitCode> {
    let mut healthy = true;
    let mut report = |name: &str, ok: bool| {
        println!("{:<12} {}", name, if ok { "ok" } else { "unavailable" });
        healthy &= ok;
    };

    let db_ok = match connect().await {
        Ok(db) => db.health_check().await.unwrap_or(false),
        Err(_) => false,
    };
    report("database", db_ok);
    report(
        "ffmpeg",
        FfmpegToolkit::new().health_check().await.unwrap_or(false),
    );
    report("ocr", ocr_backend().health_check().await.unwrap_or(false));
    report(
        "ollama",
        OllamaBackend::from_env().health_check().await.unwrap_or(false),
    );
    if let Some(whisper) = WhisperBackend::from_env() {
        report("whisper", whisper.health_check().await.unwrap_or(false));
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            subject_id,
            stages,
            preview,
            video,
            title,
            file_cache,
        } => process(subject_id, stages, preview, video, title, file_cache).await,
        Commands::Search {
            query,
            subjects,
            k,
        } => search(query, subjects, k).await,
        Commands::Health => health().await,
    }
}
