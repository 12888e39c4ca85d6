//! Hybrid score layer
//!
//! Linear combination of the vector and keyword layers for chunks that
//! both of them recalled.

use super::{Layer, LayerContext, LayerState, RecallRequest};
use async_trait::async_trait;
use prism_common::errors::Result;
use prism_common::models::{Candidate, RecallLayer};
use std::collections::HashMap;

pub struct HybridLayer;

#[async_trait]
impl Layer for HybridLayer {
    fn kind(&self) -> RecallLayer {
        RecallLayer::Hybrid
    }

    async fn recall(
        &self,
        ctx: &LayerContext,
        _request: &RecallRequest,
        state: &LayerState,
    ) -> Result<Vec<Candidate>> {
        let keyword: HashMap<&str, f32> = state
            .output(RecallLayer::Keyword)
            .iter()
            .map(|c| (c.id(), c.recall_score))
            .collect();

        let vector_weight = ctx.config.hybrid_vector_weight;
        let keyword_weight = ctx.config.hybrid_keyword_weight;

        Ok(state
            .output(RecallLayer::VectorSimilarity)
            .iter()
            .filter_map(|v| {
                let kw = keyword.get(v.id())?;
                let score = vector_weight * v.recall_score + keyword_weight * kw;
                Some(Candidate::new(v.chunk.clone(), self.kind(), ctx.modality, score))
            })
            .collect())
    }
}
