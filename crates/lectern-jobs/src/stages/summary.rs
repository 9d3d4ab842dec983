//! Section and whole-video summaries with a content-addressed section cache.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use lectern_core::{
    defaults, format_clock, Error, GenerationBackend, Keyframe, Result, Section,
    SectionSummary, SectionSummaryCacheEntry, SubjectInfo, SummaryCacheStore, VideoSummary,
};
use lectern_inference::parse_json_lenient;

use crate::logger::TaskLogger;
use crate::stages::sections::{group_keyframes_into_sections, SectionConfig};

const SECTION_SYSTEM_PROMPT: &str = r#"You are an assistant that analyses recorded lectures.
Given the screen text and narration of one part of a lecture, write a short summary
(about 100 words) of the main content and concepts covered in that part.

Reply with JSON only, in exactly this shape:
{"section_summary": "..."}"#;

const VIDEO_SYSTEM_PROMPT: &str = r#"You are an assistant that analyses recorded lectures.
Given the screen text and narration of a lecture, do two things:
1. Write a 200-300 word summary of the lecture's content, key concepts and learning goals.
2. Extract 5-10 specific keyword tags for the topics and concepts taught. Avoid generic tags.

Reply with JSON only, in exactly this shape:
{"summary": "...", "keywords": ["...", "..."]}"#;

#[derive(Debug, Deserialize)]
struct SectionReply {
    #[serde(default)]
    section_summary: String,
}

#[derive(Debug, Deserialize)]
struct VideoReply {
    summary: String,
    keywords: Vec<String>,
}

/// Cache key of a section: SHA-256 over subject, time span, and the text of
/// every keyframe that has any.
pub fn section_cache_key(subject_id: uuid::Uuid, section: &Section<'_>) -> String {
    let texts: Vec<String> = section
        .keyframes
        .iter()
        .filter(|kf| kf.has_text())
        .map(|kf| format!("{} {}", kf.ocr_text(), kf.asr_text))
        .collect();
    let material = format!(
        "{}_{}_{}_{}",
        subject_id,
        section.start_secs,
        section.end_secs,
        texts.join("|")
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

/// First `max_chars` characters of `text` followed by an ellipsis.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut out: String = text.trim().chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Prompt body listing each keyframe's timestamp, screen text, and narration.
fn describe_keyframes(lines: &mut Vec<String>, keyframes: &[Keyframe]) {
    for kf in keyframes {
        let ocr = kf.ocr_text();
        let ocr = ocr.trim();
        let asr = kf.asr_text.trim();
        if ocr.is_empty() && asr.is_empty() {
            continue;
        }
        let mut line = format!("At {}:", kf.timestamp_formatted);
        if !ocr.is_empty() {
            line.push_str(&format!(" Screen text: {}.", ocr));
        }
        if !asr.is_empty() {
            line.push_str(&format!(" Narration: {}.", asr));
        }
        lines.push(line);
    }
}

fn subject_header(subject: &SubjectInfo) -> Vec<String> {
    let mut lines = vec![format!("Lecture title: {}", subject.title)];
    if !subject.description.trim().is_empty() {
        lines.push(format!("Lecture description: {}", subject.description.trim()));
    }
    lines
}

/// Produces [`VideoSummary`] records.
pub struct SectionSummarizer {
    generator: Arc<dyn GenerationBackend>,
    cache: Arc<dyn SummaryCacheStore>,
    ttl: chrono::Duration,
    sections: SectionConfig,
}

impl SectionSummarizer {
    pub fn new(generator: Arc<dyn GenerationBackend>, cache: Arc<dyn SummaryCacheStore>) -> Self {
        Self {
            generator,
            cache,
            ttl: chrono::Duration::days(defaults::SUMMARY_CACHE_TTL_DAYS),
            sections: SectionConfig::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_section_config(mut self, config: SectionConfig) -> Self {
        self.sections = config;
        self
    }

    /// Summarize one section, serving fresh cache entries verbatim.
    ///
    /// Model and cache failures degrade to a fallback text or an empty
    /// summary; they never fail the caller. With `preview` set the cache is
    /// read but never written.
    pub async fn summarize_section(
        &self,
        subject: &SubjectInfo,
        section: &Section<'_>,
        preview: bool,
        log: &TaskLogger,
    ) -> String {
        let cache_key = section_cache_key(subject.subject_id, section);
        let span = format!(
            "{}-{}",
            format_clock(section.start_secs),
            format_clock(section.end_secs)
        );

        match self.cache.get(&cache_key).await {
            Ok(Some(entry)) if entry.is_fresh(Utc::now(), self.ttl) => {
                debug!(
                    subsystem = "jobs",
                    component = "summary",
                    cache_key = %cache_key,
                    "Section summary cache hit"
                );
                log.info(format!("summary: using cached section summary [{}]", span))
                    .await;
                return entry.summary;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "summary",
                    cache_key = %cache_key,
                    error = %e,
                    "Section summary cache read failed, regenerating"
                );
            }
        }

        log.info(format!("summary: generating section summary [{}]", span))
            .await;

        let mut lines = subject_header(subject);
        lines.push(format!("Section time: {}", span.replace('-', " - ")));
        describe_keyframes(&mut lines, section.keyframes);
        let prompt = format!(
            "Summarize this part of the lecture:\n\n{}",
            lines.join("\n")
        );

        let raw = match self
            .generator
            .generate_json_with_system(SECTION_SYSTEM_PROMPT, &prompt)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                log.error(format!("summary: section [{}] generation failed: {}", span, e))
                    .await;
                return String::new();
            }
        };

        let summary = match parse_json_lenient::<SectionReply>(&raw) {
            Ok(reply) => reply.section_summary.trim().to_string(),
            Err(e) => {
                log.warning(format!(
                    "summary: section [{}] reply was not valid JSON ({}), keeping raw text",
                    span, e
                ))
                .await;
                return truncate_chars(&raw, defaults::SUMMARY_FALLBACK_CHARS);
            }
        };

        if !preview {
            let entry = SectionSummaryCacheEntry {
                cache_key,
                subject_id: subject.subject_id,
                section_start: section.start_secs,
                section_end: section.end_secs,
                keyframe_count: section.keyframes.len(),
                summary: summary.clone(),
                created_at: Utc::now(),
            };
            if let Err(e) = self.cache.put(&entry).await {
                warn!(
                    subsystem = "jobs",
                    component = "summary",
                    cache_key = %entry.cache_key,
                    error = %e,
                    "Failed to store section summary"
                );
            }
        }
        summary
    }

    /// Whole-video summary and keywords from one model call.
    pub async fn summarize_whole(
        &self,
        subject: &SubjectInfo,
        keyframes: &[Keyframe],
    ) -> Result<(String, Vec<String>)> {
        let mut lines = subject_header(subject);
        describe_keyframes(&mut lines, keyframes);
        let prompt = format!(
            "Summarize this lecture and extract its keywords:\n\n{}",
            lines.join("\n")
        );

        let raw = self
            .generator
            .generate_json_with_system(VIDEO_SYSTEM_PROMPT, &prompt)
            .await?;
        let reply: VideoReply = parse_json_lenient(&raw)?;

        let summary = reply.summary.trim().to_string();
        if summary.is_empty() {
            return Err(Error::Inference("model returned an empty summary".to_string()));
        }
        let mut keywords: Vec<String> = Vec::new();
        for keyword in reply.keywords {
            let keyword = keyword.trim().to_string();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        keywords.truncate(defaults::SUMMARY_MAX_KEYWORDS);
        Ok((summary, keywords))
    }

    /// Build the full summary: whole-video text and keywords, then one
    /// summary per section.
    ///
    /// Fails only when the whole-video summary cannot be produced; section
    /// failures degrade per section.
    pub async fn summarize(
        &self,
        subject: &SubjectInfo,
        keyframes: &[Keyframe],
        preview: bool,
        log: &TaskLogger,
    ) -> Result<VideoSummary> {
        let start = Instant::now();
        let (summary, keywords) = self.summarize_whole(subject, keyframes).await?;

        let sections = group_keyframes_into_sections(keyframes, &self.sections);
        log.info(format!("summary: video split into {} sections", sections.len()))
            .await;

        let mut summaries = Vec::with_capacity(sections.len());
        for (i, section) in sections.iter().enumerate() {
            let content = self.summarize_section(subject, section, preview, log).await;
            summaries.push(SectionSummary {
                title: section.title(i + 1),
                content,
                start_secs: section.start_secs,
                end_secs: section.end_secs,
                keyframe_count: section.keyframes.len(),
            });
        }

        info!(
            subsystem = "jobs",
            component = "summary",
            subject_id = %subject.subject_id,
            sections = summaries.len(),
            keywords = keywords.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Video summary generated"
        );

        Ok(VideoSummary {
            subject_id: subject.subject_id,
            summary,
            keywords,
            sections: summaries,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_db::{MemoryStore, MemorySummaryCache};
    use lectern_inference::mock::MockInferenceBackend;
    use uuid::Uuid;

    fn subject() -> SubjectInfo {
        SubjectInfo {
            subject_id: Uuid::new_v4(),
            title: "Signals and Systems".to_string(),
            description: String::new(),
            source_path: "lecture.mp4".into(),
        }
    }

    fn keyframes() -> Vec<Keyframe> {
        (0..4)
            .map(|i| {
                let mut kf = Keyframe::new(i + 1, i as u64 * 1500, 25.0, format!("keyframe_{:04}.jpg", i + 1));
                kf.ocr_lines = vec!["Laplace transform".to_string()];
                kf.asr_text = format!("region of convergence {}", i);
                kf
            })
            .collect()
    }

    fn logger() -> TaskLogger {
        TaskLogger::new(Arc::new(MemoryStore::new()), Uuid::new_v4(), Uuid::new_v4())
    }

    fn section(kfs: &[Keyframe]) -> Section<'_> {
        Section {
            start_secs: kfs[0].timestamp_secs,
            end_secs: kfs[kfs.len() - 1].timestamp_secs,
            keyframes: kfs,
        }
    }

    #[test]
    fn test_cache_key_is_content_addressed() {
        let id = Uuid::new_v4();
        let kfs = keyframes();
        let key = section_cache_key(id, &section(&kfs));
        assert_eq!(key.len(), 64);
        assert_eq!(key, section_cache_key(id, &section(&kfs)));

        let mut edited = kfs.clone();
        edited[2].asr_text.push_str(" again");
        assert_ne!(key, section_cache_key(id, &section(&edited)));
        assert_ne!(key, section_cache_key(Uuid::new_v4(), &section(&kfs)));
    }

    #[test]
    fn test_cache_key_ignores_textless_keyframes() {
        let id = Uuid::new_v4();
        let kfs = keyframes();
        let mut with_blank = kfs.clone();
        with_blank[1].ocr_lines.clear();
        with_blank[1].asr_text.clear();
        let mut without = kfs.clone();
        without[1].ocr_lines = vec!["other".to_string()];
        assert_ne!(
            section_cache_key(id, &section(&with_blank)),
            section_cache_key(id, &section(&without))
        );
        // Same span, only non-empty texts contribute.
        let expected = {
            let texts: Vec<String> = [0usize, 2, 3]
                .iter()
                .map(|&i| format!("{} {}", kfs[i].ocr_text(), kfs[i].asr_text))
                .collect();
            let material = format!("{}_{}_{}_{}", id, 0.0f64, 180.0f64, texts.join("|"));
            hex::encode(Sha256::digest(material.as_bytes()))
        };
        assert_eq!(section_cache_key(id, &section(&with_blank)), expected);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("  ab ", 100), "ab...");
    }

    #[tokio::test]
    async fn test_section_summary_is_cached_once() {
        let generator = Arc::new(
            MockInferenceBackend::new()
                .with_fixed_response(r#"{"section_summary": "Laplace basics."}"#),
        );
        let cache = Arc::new(MemorySummaryCache::new());
        let summarizer = SectionSummarizer::new(generator.clone(), cache.clone());
        let subject = subject();
        let kfs = keyframes();
        let log = logger();

        let first = summarizer
            .summarize_section(&subject, &section(&kfs), false, &log)
            .await;
        let second = summarizer
            .summarize_section(&subject, &section(&kfs), false, &log)
            .await;

        assert_eq!(first, "Laplace basics.");
        assert_eq!(second, first);
        assert_eq!(generator.generate_call_count(), 1);
        assert_eq!(cache.put_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_regenerated() {
        let generator = Arc::new(
            MockInferenceBackend::new().with_fixed_response(r#"{"section_summary": "fresh"}"#),
        );
        let cache = Arc::new(MemorySummaryCache::new());
        let subject = subject();
        let kfs = keyframes();
        let sec = section(&kfs);
        cache
            .seed(SectionSummaryCacheEntry {
                cache_key: section_cache_key(subject.subject_id, &sec),
                subject_id: subject.subject_id,
                section_start: sec.start_secs,
                section_end: sec.end_secs,
                keyframe_count: 4,
                summary: "stale".to_string(),
                created_at: Utc::now() - chrono::Duration::days(31),
            })
            .await;

        let summarizer = SectionSummarizer::new(generator.clone(), cache.clone());
        let summary = summarizer.summarize_section(&subject, &sec, false, &logger()).await;
        assert_eq!(summary, "fresh");
        assert_eq!(generator.generate_call_count(), 1);
    }

    #[tokio::test]
    async fn test_preview_reads_but_never_writes_cache() {
        let generator = Arc::new(
            MockInferenceBackend::new().with_fixed_response(r#"{"section_summary": "p"}"#),
        );
        let cache = Arc::new(MemorySummaryCache::new());
        let summarizer = SectionSummarizer::new(generator.clone(), cache.clone());
        let subject = subject();
        let kfs = keyframes();

        summarizer
            .summarize_section(&subject, &section(&kfs), true, &logger())
            .await;
        assert_eq!(cache.put_count(), 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_without_caching() {
        let prose = "This section introduces the Laplace transform and explains how the region of convergence determines invertibility of signals.";
        let generator = Arc::new(MockInferenceBackend::new().with_fixed_response(prose));
        let cache = Arc::new(MemorySummaryCache::new());
        let summarizer = SectionSummarizer::new(generator, cache.clone());
        let kfs = keyframes();

        let summary = summarizer
            .summarize_section(&subject(), &section(&kfs), false, &logger())
            .await;
        assert_eq!(summary.chars().count(), 103);
        assert!(summary.ends_with("..."));
        assert_eq!(cache.put_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_yields_empty_section_summary() {
        let generator = Arc::new(MockInferenceBackend::new().with_generate_failure());
        let summarizer =
            SectionSummarizer::new(generator, Arc::new(MemorySummaryCache::new()));
        let kfs = keyframes();
        let summary = summarizer
            .summarize_section(&subject(), &section(&kfs), false, &logger())
            .await;
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_builds_titled_sections() {
        let generator = Arc::new(
            MockInferenceBackend::new()
                .with_response_mapping(
                    "extract its keywords",
                    r#"```json
{"summary": "An introduction to the Laplace transform.", "keywords": ["Laplace transform", " ROC ", "Laplace transform", ""]}
```"#,
                )
                .with_fixed_response(r#"{"section_summary": "part"}"#),
        );
        let summarizer = SectionSummarizer::new(generator, Arc::new(MemorySummaryCache::new()));
        let subject = subject();
        let kfs = keyframes();

        let summary = summarizer
            .summarize(&subject, &kfs, false, &logger())
            .await
            .unwrap();

        assert_eq!(summary.subject_id, subject.subject_id);
        assert_eq!(summary.summary, "An introduction to the Laplace transform.");
        assert_eq!(summary.keywords, vec!["Laplace transform", "ROC"]);
        assert_eq!(summary.sections.len(), 1);
        assert_eq!(summary.sections[0].title, "Section 1 (00:00 - 03:00)");
        assert_eq!(summary.sections[0].content, "part");
        assert_eq!(summary.sections[0].keyframe_count, 4);
    }

    #[tokio::test]
    async fn test_whole_summary_missing_fields_is_error() {
        let generator = Arc::new(
            MockInferenceBackend::new().with_fixed_response(r#"{"summary": "no keywords"}"#),
        );
        let summarizer = SectionSummarizer::new(generator, Arc::new(MemorySummaryCache::new()));
        let err = summarizer
            .summarize(&subject(), &keyframes(), false, &logger())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
