//! PostgreSQL store tests.
//!
//! Need a reachable database (`DATABASE_URL`), so they are ignored by default:
//! `cargo test -p lectern-db --features migrations -- --ignored`.
#![cfg(feature = "migrations")]

use chrono::{Duration, Utc};
use uuid::Uuid;

use lectern_db::test_fixtures::{subject, test_database_url};
use lectern_db::{
    Database, Keyframe, KeyframeSet, LogLevel, PipelineStore, PipelineTask, SectionSummaryCacheEntry,
    Stage, StageSet, SubjectCatalog, SummaryCacheStore, TaskLogRecord, TaskStatus,
    VectorIndexHandle,
};

async fn connect() -> Database {
    let _ = dotenvy::dotenv();
    let db = Database::connect(&test_database_url())
        .await
        .expect("test database reachable");
    db.migrate().await.expect("migrations apply");
    db
}

#[tokio::test]
#[ignore]
async fn test_task_round_trip() {
    let db = connect().await;
    let mut task = PipelineTask::new(
        Uuid::new_v4(),
        StageSet::empty().with(Stage::Ocr).with(Stage::Summary),
        false,
    );
    db.pipeline.save_task(&task).await.unwrap();

    task.status = TaskStatus::Failed;
    task.progress = 0.4;
    task.error = Some("source video missing".to_string());
    task.finished_at = Some(Utc::now());
    db.pipeline.save_task(&task).await.unwrap();

    let loaded = db.pipeline.task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Failed);
    assert_eq!(loaded.stages, task.stages);
    assert_eq!(loaded.error.as_deref(), Some("source video missing"));
}

#[tokio::test]
#[ignore]
async fn test_keyframes_replaced_not_appended() {
    let db = connect().await;
    let subject_id = Uuid::new_v4();
    let mut first = Keyframe::new(1, 0, 30.0, "keyframe_0001.jpg");
    first.ocr_lines = vec!["Eigenvalues".to_string(), "Ax = λx".to_string()];
    let set = KeyframeSet {
        subject_id,
        fps: 30.0,
        frame_count: 900,
        keyframes: vec![first, Keyframe::new(2, 300, 30.0, "keyframe_0002.jpg")],
    };
    db.pipeline.replace_keyframes(&set).await.unwrap();

    let smaller = KeyframeSet {
        keyframes: vec![Keyframe::new(1, 0, 30.0, "keyframe_0001.jpg")],
        ..set.clone()
    };
    db.pipeline.replace_keyframes(&smaller).await.unwrap();

    let loaded = db.pipeline.load_keyframes(subject_id).await.unwrap().unwrap();
    assert_eq!(loaded.keyframes.len(), 1);
    assert_eq!(loaded.fps, 30.0);
    assert!(loaded.keyframes[0].ocr_lines.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_vector_index_handle_upsert() {
    let db = connect().await;
    let subject_id = Uuid::new_v4();
    let mut handle = VectorIndexHandle {
        subject_id,
        storage_location: format!("/data/vector_indices/video_{}/index.json", subject_id).into(),
        embedding_model: "bge-m3".to_string(),
        vector_count: 12,
        created_at: Utc::now(),
    };
    db.pipeline.upsert_vector_index(&handle).await.unwrap();
    handle.vector_count = 20;
    db.pipeline.upsert_vector_index(&handle).await.unwrap();

    let loaded = db.pipeline.vector_index(subject_id).await.unwrap().unwrap();
    assert_eq!(loaded.vector_count, 20);
}

#[tokio::test]
#[ignore]
async fn test_logs_and_catalog() {
    let db = connect().await;
    let info = subject("Signals and Systems 3", "/videos/ss3.mp4");
    db.pipeline.register_subject(&info).await.unwrap();
    assert_eq!(
        db.pipeline.describe(info.subject_id).await.unwrap(),
        Some(info.clone())
    );

    let task_id = Uuid::new_v4();
    for (level, message) in [(LogLevel::Info, "started"), (LogLevel::Error, "ocr failed")] {
        db.pipeline
            .append_log(TaskLogRecord {
                task_id,
                subject_id: info.subject_id,
                level,
                message: message.to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
    }
    let logs = db.pipeline.logs_for_task(task_id).await.unwrap();
    assert_eq!(
        logs,
        vec![
            ("info".to_string(), "started".to_string()),
            ("error".to_string(), "ocr failed".to_string())
        ]
    );
}

#[tokio::test]
#[ignore]
async fn test_summary_cache_table() {
    let db = connect().await;
    let key = format!("{:x}", Uuid::new_v4().as_u128());
    let entry = SectionSummaryCacheEntry {
        cache_key: key.clone(),
        subject_id: Uuid::new_v4(),
        section_start: 0.0,
        section_end: 95.5,
        keyframe_count: 4,
        summary: "Introduces the Laplace transform".to_string(),
        created_at: Utc::now() - Duration::days(31),
    };
    db.summary_cache.put(&entry).await.unwrap();
    let loaded = db.summary_cache.get(&key).await.unwrap().unwrap();
    assert_eq!(loaded.summary, entry.summary);
    assert_eq!(loaded.keyframe_count, 4);
    assert!(db.health_check().await.unwrap());
}
