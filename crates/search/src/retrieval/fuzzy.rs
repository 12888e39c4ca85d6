//! Fuzzy match layer
//!
//! Catches typos and abbreviations ("revnue", "rev") that exact token
//! overlap misses. Numeric tokens are never fuzzed: "4" must not match
//! "41".

use super::{Layer, LayerContext, LayerState, RecallRequest};
use async_trait::async_trait;
use prism_common::errors::Result;
use prism_common::models::{Candidate, RecallLayer};
use prism_common::text::{contains_cjk, token_set};
use std::collections::HashSet;
use strsim::normalized_damerau_levenshtein;

/// Similarity credited when one term contains the other
const SUBSTRING_SIMILARITY: f32 = 0.85;

const MIN_TERM_CHARS: usize = 3;

pub struct FuzzyLayer;

fn is_fuzzable(term: &str) -> bool {
    term.chars().count() >= MIN_TERM_CHARS
        && !term.chars().all(|c| c.is_ascii_digit() || c == '.')
        && !contains_cjk(term)
}

pub(crate) fn term_similarity(query_term: &str, field_term: &str) -> f32 {
    let mut similarity = normalized_damerau_levenshtein(query_term, field_term) as f32;
    if field_term.contains(query_term) || query_term.contains(field_term) {
        similarity = similarity.max(SUBSTRING_SIMILARITY);
    }
    similarity
}

/// Mean best-match similarity over the fuzzable query terms that clear
/// `threshold`
fn fuzzy_score(query_terms: &[&String], field_terms: &HashSet<String>, threshold: f32) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let matched: f32 = query_terms
        .iter()
        .filter_map(|q| {
            field_terms
                .iter()
                .map(|f| term_similarity(q, f))
                .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))
                .filter(|best| *best >= threshold)
        })
        .sum();
    matched / query_terms.len() as f32
}

#[async_trait]
impl Layer for FuzzyLayer {
    fn kind(&self) -> RecallLayer {
        RecallLayer::Fuzzy
    }

    async fn recall(
        &self,
        ctx: &LayerContext,
        request: &RecallRequest,
        _state: &LayerState,
    ) -> Result<Vec<Candidate>> {
        let query_terms: Vec<&String> = request.tokens.iter().filter(|t| is_fuzzable(t)).collect();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let threshold = ctx.config.fuzzy_threshold;
        let chunks = ctx.store.scan(ctx.modality).await?;

        Ok(chunks
            .into_iter()
            .filter_map(|chunk| {
                let field_terms: HashSet<String> = ctx
                    .profile
                    .fields(&chunk)
                    .iter()
                    .flat_map(|(_, text)| token_set(text))
                    .filter(|t| is_fuzzable(t))
                    .collect();
                let score = fuzzy_score(&query_terms, &field_terms, threshold);
                (score > 0.0).then(|| Candidate::new(chunk, self.kind(), ctx.modality, score))
            })
            .collect())
    }
}
