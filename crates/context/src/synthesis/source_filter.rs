//! Source attribution
//!
//! Decides which context entries the generated answer actually relies on.

use super::ContextEntry;
use prism_common::config::SynthesisConfig;
use prism_common::models::SourceRef;
use prism_common::text::{overlap_coefficient, token_set, truncate_chars};
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const OVERLAP_WEIGHT: f32 = 0.7;
const RERANK_WEIGHT: f32 = 0.3;
const EXCERPT_CHARS: usize = 200;

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("citation pattern is valid"))
}

pub struct SourceFilter {
    not_found_phrases: Vec<String>,
    relevance_threshold: f32,
    min_sources: usize,
    max_sources: usize,
}

impl SourceFilter {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            not_found_phrases: config.not_found_phrases.iter().map(|p| p.to_lowercase()).collect(),
            relevance_threshold: config.relevance_threshold,
            min_sources: config.min_sources,
            max_sources: config.max_sources,
        }
    }

    /// True when the answer says nothing relevant was found
    pub fn is_negative(&self, answer: &str) -> bool {
        let answer = answer.to_lowercase();
        self.not_found_phrases
            .iter()
            .any(|phrase| !phrase.is_empty() && answer.contains(phrase.as_str()))
    }

    /// Context markers cited as `[n]` or `[n, m]`, in order of first citation
    pub fn citations(answer: &str, entry_count: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        citation_pattern()
            .captures_iter(answer)
            .filter_map(|caps| caps.get(1))
            .flat_map(|group| {
                group
                    .as_str()
                    .split(',')
                    .filter_map(|n| n.trim().parse::<usize>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|marker| (1..=entry_count).contains(marker))
            .filter(|marker| seen.insert(*marker))
            .collect()
    }

    /// Keep the entries supported by the answer
    pub fn filter(&self, answer: &str, entries: &[ContextEntry]) -> Vec<SourceRef> {
        if entries.is_empty() || self.is_negative(answer) {
            return Vec::new();
        }

        let answer_tokens = token_set(answer);
        let cited = Self::citations(answer, entries.len());

        let mut scored: Vec<(Relevance, &ContextEntry)> = entries
            .iter()
            .map(|entry| (self.relevance(&answer_tokens, entry), entry))
            .collect();

        let mut kept: Vec<SourceRef> = cited
            .iter()
            .filter_map(|marker| scored.iter().find(|(_, e)| e.marker == *marker))
            .map(|(relevance, entry)| source_ref(entry, relevance.score, true))
            .collect();

        scored.retain(|(_, entry)| !cited.contains(&entry.marker));
        scored.sort_by(|(a, ea), (b, eb)| b.score.total_cmp(&a.score).then_with(|| ea.marker.cmp(&eb.marker)));

        // The rerank share alone never clears the threshold: an uncited
        // entry must share terms with the answer
        let (supported, unsupported): (Vec<_>, Vec<_>) = scored
            .into_iter()
            .partition(|(r, _)| r.overlap > 0.0 && r.score >= self.relevance_threshold);
        kept.extend(supported.into_iter().map(|(r, entry)| source_ref(entry, r.score, false)));

        // A positive answer always keeps its best supporting sources
        let shortfall = self.min_sources.saturating_sub(kept.len());
        kept.extend(
            unsupported
                .into_iter()
                .take(shortfall)
                .map(|(r, entry)| source_ref(entry, r.score, false)),
        );

        kept.truncate(self.max_sources);
        kept
    }

    fn relevance(&self, answer_tokens: &HashSet<String>, entry: &ContextEntry) -> Relevance {
        let entry_tokens = token_set(&entry.excerpt);
        let overlap = overlap_coefficient(answer_tokens, &entry_tokens);
        let rerank = entry.candidate.effective_score().clamp(0.0, 1.0);
        Relevance {
            overlap,
            score: OVERLAP_WEIGHT * overlap + RERANK_WEIGHT * rerank,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Relevance {
    overlap: f32,
    score: f32,
}

fn source_ref(entry: &ContextEntry, relevance: f32, cited: bool) -> SourceRef {
    let chunk = &entry.candidate.chunk;
    let meta = &chunk.metadata;
    SourceRef {
        chunk_id: chunk.id.clone(),
        modality: chunk.modality,
        document_name: meta.document_name.clone(),
        page_number: meta.page_number,
        title: meta.title.clone().or_else(|| meta.captions.first().cloned()),
        excerpt: truncate_chars(&entry.excerpt, EXCERPT_CHARS),
        marker: entry.marker,
        cited,
        relevance,
    }
}
