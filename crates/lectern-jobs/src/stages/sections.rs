//! Grouping of keyframes into contiguous sections for summarization.
//!
//! The walk compares each keyframe with the last keyframe of the section
//! being built and decides whether to start a new section. Split rules, in
//! order:
//!
//! 1. the gap from the previous keyframe exceeds `gap_secs`
//! 2. the section would exceed `max_duration_secs`, or otherwise is past 80%
//!    of the target duration and the content changed
//! 3. the section already holds `max_keyframes`
//! 4. the content changed and the section already meets both minimums
//! 5. the section is more than 1.5x the fair share of the remaining keyframes
//!
//! A split is vetoed while the section is shorter than `min_duration_secs`.
//! Once `max_sections - 1` sections are closed, the rest forms the last one.
//! A final pass folds undersized sections into their predecessor.

use std::collections::HashSet;

use tracing::debug;

use lectern_core::{defaults, Keyframe, Section};

/// Similarity reported when neither keyframe has OCR text.
const SIMILARITY_BOTH_EMPTY: f64 = 0.6;

/// Similarity reported when exactly one keyframe has OCR text.
const SIMILARITY_ONE_EMPTY: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct SectionConfig {
    pub gap_secs: f64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub min_keyframes: usize,
    pub max_keyframes: usize,
    pub similarity_threshold: f64,
    pub max_sections: usize,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            gap_secs: defaults::SECTION_GAP_SECS,
            min_duration_secs: defaults::SECTION_MIN_DURATION_SECS,
            max_duration_secs: defaults::SECTION_MAX_DURATION_SECS,
            min_keyframes: defaults::SECTION_MIN_KEYFRAMES,
            max_keyframes: defaults::SECTION_MAX_KEYFRAMES,
            similarity_threshold: defaults::SECTION_SIMILARITY_THRESHOLD,
            max_sections: defaults::SECTION_MAX_COUNT,
        }
    }
}

impl SectionConfig {
    pub fn with_max_sections(mut self, max_sections: usize) -> Self {
        self.max_sections = max_sections;
        self
    }
}

/// Jaccard similarity of the lower-cased OCR words of two keyframes.
pub fn content_similarity(a: &Keyframe, b: &Keyframe) -> f64 {
    let text_a = a.ocr_text().to_lowercase();
    let text_b = b.ocr_text().to_lowercase();
    let words_a: HashSet<&str> = text_a.split_whitespace().collect();
    let words_b: HashSet<&str> = text_b.split_whitespace().collect();

    match (words_a.is_empty(), words_b.is_empty()) {
        (true, true) => SIMILARITY_BOTH_EMPTY,
        (true, false) | (false, true) => SIMILARITY_ONE_EMPTY,
        (false, false) => {
            let intersection = words_a.intersection(&words_b).count();
            let union = words_a.union(&words_b).count();
            intersection as f64 / union as f64
        }
    }
}

/// Half-open keyframe index range plus its time span.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    start_secs: f64,
    end_secs: f64,
}

impl Span {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn duration(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Split timestamp-ordered `keyframes` into sections.
///
/// Every keyframe lands in exactly one section and sections are returned in
/// time order. An empty input yields no sections.
pub fn group_keyframes_into_sections<'a>(
    keyframes: &'a [Keyframe],
    config: &SectionConfig,
) -> Vec<Section<'a>> {
    let Some(first) = keyframes.first() else {
        return Vec::new();
    };
    let n = keyframes.len();
    let max_sections = config.max_sections.max(1);
    if max_sections == 1 {
        return vec![Section {
            start_secs: first.timestamp_secs,
            end_secs: keyframes[n - 1].timestamp_secs,
            keyframes,
        }];
    }
    let total = keyframes[n - 1].timestamp_secs - first.timestamp_secs;
    let target = total / max_sections as f64;

    let mut spans: Vec<Span> = Vec::new();
    let mut current = Span {
        start: 0,
        end: 1,
        start_secs: first.timestamp_secs,
        end_secs: first.timestamp_secs,
    };
    let mut closed_early = false;

    for i in 1..n {
        let kf = &keyframes[i];
        let last = &keyframes[i - 1];
        let similarity = content_similarity(last, kf);
        let duration = kf.timestamp_secs - current.start_secs;
        let count = current.len();

        let mut split = kf.timestamp_secs - last.timestamp_secs > config.gap_secs;
        if duration > config.max_duration_secs {
            split = true;
        } else if duration > target * 0.8 && similarity < config.similarity_threshold {
            split = true;
        }
        if count >= config.max_keyframes {
            split = true;
        }
        if similarity < config.similarity_threshold
            && count >= config.min_keyframes
            && duration >= config.min_duration_secs
        {
            split = true;
        }
        let remaining_keyframes = (n - i) as f64;
        let remaining_sections = max_sections as i64 - spans.len() as i64 - 1;
        if remaining_sections > 0
            && count as f64 > remaining_keyframes / remaining_sections as f64 * 1.5
        {
            split = true;
        }
        if split && duration < config.min_duration_secs {
            split = false;
        }

        if !split {
            current.end = i + 1;
            current.end_secs = kf.timestamp_secs;
            continue;
        }

        current.end_secs = last.timestamp_secs;
        spans.push(current);
        if spans.len() >= max_sections - 1 {
            spans.push(Span {
                start: i,
                end: n,
                start_secs: kf.timestamp_secs,
                end_secs: keyframes[n - 1].timestamp_secs,
            });
            closed_early = true;
            break;
        }
        current = Span {
            start: i,
            end: i + 1,
            start_secs: kf.timestamp_secs,
            end_secs: kf.timestamp_secs,
        };
    }
    if !closed_early {
        spans.push(current);
    }

    let before_merge = spans.len();
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        let undersized =
            span.duration() < config.min_duration_secs || span.len() < config.min_keyframes;
        match merged.last_mut() {
            Some(prev) if undersized => {
                prev.end = span.end;
                prev.end_secs = span.end_secs;
            }
            _ => merged.push(span),
        }
    }

    debug!(
        subsystem = "jobs",
        component = "sections",
        keyframe_count = n,
        before_merge,
        sections = merged.len(),
        "Grouped keyframes into sections"
    );

    merged
        .into_iter()
        .map(|span| Section {
            start_secs: span.start_secs,
            end_secs: span.end_secs,
            keyframes: &keyframes[span.start..span.end],
        })
        .collect()
}
