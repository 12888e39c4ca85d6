//! Weighted-field keyword layer
//!
//! Scores token overlap between the query and each searchable field of a
//! chunk. Each field contributes `weight * overlap`, so a title match is
//! worth more than the same match in the body when the profile says so.

use super::{Layer, LayerContext, LayerState, RecallRequest};
use async_trait::async_trait;
use prism_common::errors::Result;
use prism_common::models::{Candidate, Chunk, RecallLayer};
use prism_common::text::{overlap_ratio, token_set};
use std::collections::HashSet;

pub struct KeywordLayer;

impl KeywordLayer {
    pub(crate) fn score(ctx: &LayerContext, query: &HashSet<String>, chunk: &Chunk) -> f32 {
        ctx.profile
            .fields(chunk)
            .iter()
            .map(|(weight, text)| weight * overlap_ratio(query, &token_set(text)))
            .sum()
    }
}

#[async_trait]
impl Layer for KeywordLayer {
    fn kind(&self) -> RecallLayer {
        RecallLayer::Keyword
    }

    async fn recall(
        &self,
        ctx: &LayerContext,
        request: &RecallRequest,
        _state: &LayerState,
    ) -> Result<Vec<Candidate>> {
        if request.tokens.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = ctx.store.scan(ctx.modality).await?;
        Ok(chunks
            .into_iter()
            .filter_map(|chunk| {
                let score = Self::score(ctx, &request.tokens, &chunk);
                (score > 0.0).then(|| Candidate::new(chunk, self.kind(), ctx.modality, score))
            })
            .collect())
    }
}
