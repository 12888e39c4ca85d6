//! Content-quality filter between reranking and synthesis
//!
//! Every candidate must fall within the configured length bounds. Text
//! candidates must also clear a heuristic quality score; image and table
//! content is a generated description and is only length-checked.

use prism_common::config::FilterConfig;
use prism_common::models::{Candidate, Modality};
use std::borrow::Cow;

const PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '，', '。', '！', '？', '；', '：', '“', '”', '‘', '’', '（',
    '）', '【', '】',
];

pub struct SmartFilter {
    config: FilterConfig,
}

impl SmartFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Keep admissible candidates in their ranked order
    pub fn filter(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        if !self.config.enabled {
            return candidates;
        }
        let before = candidates.len();
        let kept: Vec<Candidate> = candidates.into_iter().filter(|c| self.admits(c)).collect();
        if kept.len() < before {
            tracing::debug!(dropped = before - kept.len(), kept = kept.len(), "Low-quality candidates filtered");
        }
        kept
    }

    fn admits(&self, candidate: &Candidate) -> bool {
        let chunk = &candidate.chunk;
        let content = match chunk.modality {
            Modality::Text => Cow::Borrowed(chunk.content.as_str()),
            Modality::Image | Modality::Table => Cow::Owned(chunk.text_representation()),
        };
        let length = content.trim().chars().count();
        if length < self.config.min_content_length || length > self.config.max_content_length {
            return false;
        }
        chunk.modality != Modality::Text || quality_score(&content) > self.config.quality_threshold
    }
}

/// Heuristic in [0, 1] from length, line structure, punctuation density and
/// mixed digits and letters
pub fn quality_score(content: &str) -> f32 {
    let chars = content.chars().count();
    if chars == 0 {
        return 0.0;
    }

    let mut score = 0.2 * (chars as f32 / 1000.0).min(1.0);
    if content.contains('\n') {
        score += 0.1;
    }
    let punctuation = content.chars().filter(|c| PUNCTUATION.contains(c)).count();
    score += (punctuation as f32 / chars as f32 * 10.0).min(0.3);
    let digits = content.chars().any(|c| c.is_ascii_digit());
    let letters = content.chars().any(char::is_alphabetic);
    if digits && letters {
        score += 0.1;
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_common::models::{Chunk, RecallLayer, StructuralMetadata};
    use std::sync::Arc;

    fn candidate(id: &str, modality: Modality, content: &str) -> Candidate {
        let chunk = Chunk::new(id, modality, content, vec![]).with_metadata(StructuralMetadata {
            captions: vec!["Figure 1: Revenue".into()],
            ..Default::default()
        });
        Candidate::new(Arc::new(chunk), RecallLayer::VectorSimilarity, modality, 0.9)
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(Candidate::id).collect()
    }

    #[test]
    fn test_quality_score_rewards_structure() {
        assert_eq!(quality_score(""), 0.0);
        assert!(quality_score("revenue revenue revenue") < 0.3);
        assert!(quality_score("Company X revenue was $10B in 2023.") > 0.3);
        assert!(quality_score("营收增长，利润达到20亿。\n成本下降。") > 0.3);
        assert!(quality_score(&"a. 1".repeat(500)) <= 1.0);
    }

    #[test]
    fn test_short_and_low_quality_text_dropped() {
        let filter = SmartFilter::new(FilterConfig::default());
        let kept = filter.filter(vec![
            candidate("good", Modality::Text, "Company X revenue was $10B in 2023."),
            candidate("short", Modality::Text, "ok."),
            candidate("flat", Modality::Text, "revenue revenue revenue revenue"),
        ]);
        assert_eq!(ids(&kept), vec!["good"]);
    }

    #[test]
    fn test_generated_descriptions_only_length_checked() {
        let filter = SmartFilter::new(FilterConfig::default());
        let kept = filter.filter(vec![
            candidate("chart", Modality::Image, "Bar chart of quarterly net profit"),
            candidate("table", Modality::Table, "Cloud 6B"),
        ]);
        assert_eq!(ids(&kept), vec!["chart", "table"]);
    }

    #[test]
    fn test_overlong_content_dropped() {
        let config = FilterConfig {
            max_content_length: 40,
            ..Default::default()
        };
        let long = "Revenue grew 12% in 2023, driven by cloud services and devices.";
        let kept = SmartFilter::new(config).filter(vec![candidate("long", Modality::Text, long)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_disabled_filter_keeps_everything() {
        let config = FilterConfig {
            enabled: false,
            ..Default::default()
        };
        let kept = SmartFilter::new(config).filter(vec![candidate("short", Modality::Text, "ok")]);
        assert_eq!(ids(&kept), vec!["short"]);
    }
}
