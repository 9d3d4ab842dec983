//! PostgreSQL implementation of the persistence/log port.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use lectern_core::{
    Error, Keyframe, KeyframeSet, PipelineStore, PipelineTask, Result, SectionSummary,
    SubjectCatalog, SubjectInfo, TaskLogRecord, TaskStatus, VectorIndexHandle, VideoSummary,
};

/// PostgreSQL implementation of [`PipelineStore`] and [`SubjectCatalog`].
#[derive(Clone)]
pub struct PgPipelineStore {
    pool: Pool<Postgres>,
}

impl PgPipelineStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert or update a subject row.
    pub async fn register_subject(&self, info: &SubjectInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subject (id, title, description, source_path)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                description = EXCLUDED.description,
                source_path = EXCLUDED.source_path
            "#,
        )
        .bind(info.subject_id)
        .bind(&info.title)
        .bind(&info.description)
        .bind(info.source_path.to_string_lossy().as_ref())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Load a persisted task.
    pub async fn task(&self, id: Uuid) -> Result<Option<PipelineTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, stages, status, progress, error_message, preview,
                   created_at, started_at, finished_at
            FROM pipeline_task
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_task_row).transpose()
    }

    /// Log records of a task, oldest first.
    pub async fn logs_for_task(&self, task_id: Uuid) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT level, message FROM task_log WHERE task_id = $1 ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("level"), row.get("message")))
            .collect())
    }

    fn parse_task_row(row: sqlx::postgres::PgRow) -> Result<PipelineTask> {
        let stages: Vec<String> = row.get("stages");
        let status: String = row.get("status");
        Ok(PipelineTask {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            stages: stages.join(",").parse()?,
            status: status.parse::<TaskStatus>()?,
            progress: row.get("progress"),
            error: row.get("error_message"),
            preview: row.get("preview"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
        })
    }

    fn parse_keyframe_row(row: sqlx::postgres::PgRow) -> Keyframe {
        let seq: i32 = row.get("seq");
        let frame_number: i64 = row.get("frame_number");
        let ocr_lines: Json<Vec<String>> = row.get("ocr_lines");
        Keyframe {
            seq: seq as u32,
            frame_number: frame_number as u64,
            timestamp_secs: row.get("timestamp_secs"),
            timestamp_formatted: row.get("timestamp_formatted"),
            ocr_lines: ocr_lines.0,
            asr_text: row.get("asr_text"),
            file_name: row.get("file_name"),
        }
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn append_log(&self, record: TaskLogRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_log (task_id, subject_id, level, message, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.task_id)
        .bind(record.subject_id)
        .bind(record.level.as_str())
        .bind(&record.message)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn save_task(&self, task: &PipelineTask) -> Result<()> {
        let stages: Vec<String> = task.stages.iter().map(|s| s.as_str().to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO pipeline_task
                (id, subject_id, stages, status, progress, error_message, preview,
                 created_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                error_message = EXCLUDED.error_message,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(task.id)
        .bind(task.subject_id)
        .bind(&stages)
        .bind(task.status.as_str())
        .bind(task.progress)
        .bind(&task.error)
        .bind(task.preview)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn replace_keyframes(&self, set: &KeyframeSet) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            r#"
            INSERT INTO keyframe_set (subject_id, fps, frame_count, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subject_id) DO UPDATE
            SET fps = EXCLUDED.fps,
                frame_count = EXCLUDED.frame_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(set.subject_id)
        .bind(set.fps)
        .bind(set.frame_count as i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("DELETE FROM keyframe WHERE subject_id = $1")
            .bind(set.subject_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for kf in &set.keyframes {
            sqlx::query(
                r#"
                INSERT INTO keyframe
                    (subject_id, seq, frame_number, timestamp_secs, timestamp_formatted,
                     ocr_lines, asr_text, file_name)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(set.subject_id)
            .bind(kf.seq as i32)
            .bind(kf.frame_number as i64)
            .bind(kf.timestamp_secs)
            .bind(&kf.timestamp_formatted)
            .bind(Json(&kf.ocr_lines))
            .bind(&kf.asr_text)
            .bind(&kf.file_name)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        debug!(
            subsystem = "database",
            component = "pipeline_store",
            subject_id = %set.subject_id,
            keyframe_count = set.keyframes.len(),
            "Keyframes replaced"
        );
        Ok(())
    }

    async fn load_keyframes(&self, subject_id: Uuid) -> Result<Option<KeyframeSet>> {
        let header = sqlx::query("SELECT fps, frame_count FROM keyframe_set WHERE subject_id = $1")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        let Some(header) = header else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT seq, frame_number, timestamp_secs, timestamp_formatted,
                   ocr_lines, asr_text, file_name
            FROM keyframe
            WHERE subject_id = $1
            ORDER BY seq
            "#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let frame_count: i64 = header.get("frame_count");
        Ok(Some(KeyframeSet {
            subject_id,
            fps: header.get("fps"),
            frame_count: frame_count as u64,
            keyframes: rows.into_iter().map(Self::parse_keyframe_row).collect(),
        }))
    }

    async fn upsert_vector_index(&self, handle: &VectorIndexHandle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vector_index (subject_id, storage_location, embedding_model, vector_count, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (subject_id) DO UPDATE
            SET storage_location = EXCLUDED.storage_location,
                embedding_model = EXCLUDED.embedding_model,
                vector_count = EXCLUDED.vector_count,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(handle.subject_id)
        .bind(handle.storage_location.to_string_lossy().as_ref())
        .bind(&handle.embedding_model)
        .bind(handle.vector_count as i32)
        .bind(handle.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn vector_index(&self, subject_id: Uuid) -> Result<Option<VectorIndexHandle>> {
        let row = sqlx::query(
            r#"
            SELECT storage_location, embedding_model, vector_count, created_at
            FROM vector_index
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let location: String = row.get("storage_location");
            let vector_count: i32 = row.get("vector_count");
            VectorIndexHandle {
                subject_id,
                storage_location: PathBuf::from(location),
                embedding_model: row.get("embedding_model"),
                vector_count: vector_count as usize,
                created_at: row.get("created_at"),
            }
        }))
    }

    async fn upsert_summary(&self, summary: &VideoSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO video_summary (subject_id, summary, keywords, sections, generated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (subject_id) DO UPDATE
            SET summary = EXCLUDED.summary,
                keywords = EXCLUDED.keywords,
                sections = EXCLUDED.sections,
                generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(summary.subject_id)
        .bind(&summary.summary)
        .bind(Json(&summary.keywords))
        .bind(Json::<&Vec<SectionSummary>>(&summary.sections))
        .bind(summary.generated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl SubjectCatalog for PgPipelineStore {
    async fn describe(&self, subject_id: Uuid) -> Result<Option<SubjectInfo>> {
        let row = sqlx::query("SELECT title, description, source_path FROM subject WHERE id = $1")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let source_path: String = row.get("source_path");
            SubjectInfo {
                subject_id,
                title: row.get("title"),
                description: row.get("description"),
                source_path: PathBuf::from(source_path),
            }
        }))
    }
}
