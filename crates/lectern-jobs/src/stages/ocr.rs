//! OCR stage: recognize on-screen text for every keyframe.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use lectern_core::Keyframe;
use lectern_inference::OcrBackend;

use crate::logger::TaskLogger;

pub struct OcrStage {
    backend: Arc<dyn OcrBackend>,
}

impl OcrStage {
    pub fn new(backend: Arc<dyn OcrBackend>) -> Self {
        Self { backend }
    }

    /// Replace the OCR lines of each keyframe, reading images from `image_dir`.
    ///
    /// A frame that cannot be read or recognized gets empty OCR and an error
    /// record; the remaining frames are still processed. Returns the number
    /// of frames that failed.
    pub async fn run(&self, keyframes: &mut [Keyframe], image_dir: &Path, log: &TaskLogger) -> usize {
        let start = Instant::now();
        let mut failed = 0;

        for kf in keyframes.iter_mut() {
            kf.ocr_lines.clear();
            let path = image_dir.join(&kf.file_name);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    failed += 1;
                    log.error(format!(
                        "ocr: cannot read keyframe {} ({}): {}",
                        kf.seq,
                        path.display(),
                        e
                    ))
                    .await;
                    continue;
                }
            };
            match self.backend.recognize(&bytes).await {
                Ok(lines) => kf.ocr_lines = lines,
                Err(e) => {
                    failed += 1;
                    log.error(format!("ocr: keyframe {} failed: {}", kf.seq, e))
                        .await;
                }
            }
        }

        info!(
            subsystem = "jobs",
            component = "ocr",
            model = self.backend.model_name(),
            keyframe_count = keyframes.len(),
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "OCR stage finished"
        );
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::LogLevel;
    use lectern_db::MemoryStore;
    use lectern_inference::mock::MockOcrBackend;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_failed_frames_get_empty_ocr() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keyframe_0001.jpg"), "Fourier Series\n  a_n, b_n ").unwrap();
        std::fs::write(dir.path().join("keyframe_0002.jpg"), "CORRUPT").unwrap();
        // keyframe_0003.jpg is missing on disk.

        let mut keyframes: Vec<Keyframe> = (1..=3)
            .map(|i| {
                let mut kf = Keyframe::new(i, i as u64 * 25, 25.0, format!("keyframe_{:04}.jpg", i));
                kf.ocr_lines = vec!["stale".to_string()];
                kf
            })
            .collect();

        let store = Arc::new(MemoryStore::new());
        let task_id = Uuid::new_v4();
        let log = TaskLogger::new(store.clone(), task_id, Uuid::new_v4());
        let stage = OcrStage::new(Arc::new(MockOcrBackend::new()));

        let failed = stage.run(&mut keyframes, dir.path(), &log).await;

        assert_eq!(failed, 2);
        assert_eq!(keyframes[0].ocr_lines, vec!["Fourier Series", "a_n, b_n"]);
        assert!(keyframes[1].ocr_lines.is_empty());
        assert!(keyframes[2].ocr_lines.is_empty());

        let errors: Vec<_> = store
            .logs_for(task_id)
            .await
            .into_iter()
            .filter(|r| r.level == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 2);
    }
}
