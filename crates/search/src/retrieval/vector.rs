//! Vector similarity layer with adaptive pool sizing
//!
//! The store post-filters its k nearest neighbours, so a similarity floor
//! over unevenly distributed content can leave a small pool nearly empty.
//! The layer widens `k` geometrically while the pool comes back full but
//! under-filled, up to `vector_pool_max`, then retries once with the
//! relaxed similarity floor if nothing survived.

use super::{Layer, LayerContext, LayerState, RecallRequest};
use async_trait::async_trait;
use prism_common::errors::Result;
use prism_common::models::{Candidate, RecallLayer};
use prism_common::store::{SearchFilter, SearchHits};

pub struct VectorLayer;

impl VectorLayer {
    /// Search with a widening pool until `target` hits survive the filter
    pub(crate) async fn widening_search(
        ctx: &LayerContext,
        embedding: &[f32],
        filter: &SearchFilter,
        target: usize,
    ) -> Result<SearchHits> {
        let config = &ctx.config;
        let pool_max = config.vector_pool_max.max(config.vector_pool);
        let mut pool = config.vector_pool.max(1);

        loop {
            let hits = ctx.store.search(ctx.modality, embedding, filter, pool).await?;
            let exhausted = hits.scanned < pool;
            if hits.hits.len() >= target || exhausted || pool >= pool_max {
                return Ok(hits);
            }

            let next = (pool * config.pool_growth.max(2)).min(pool_max);
            tracing::debug!(
                modality = %ctx.modality,
                hits = hits.hits.len(),
                pool,
                next_pool = next,
                "Vector pool under-filled, widening"
            );
            pool = next;
        }
    }
}

#[async_trait]
impl Layer for VectorLayer {
    fn kind(&self) -> RecallLayer {
        RecallLayer::VectorSimilarity
    }

    async fn recall(
        &self,
        ctx: &LayerContext,
        request: &RecallRequest,
        _state: &LayerState,
    ) -> Result<Vec<Candidate>> {
        let config = &ctx.config;
        let target = config.max_per_layer;

        let filter = SearchFilter::default().with_min_similarity(config.min_similarity);
        let mut hits = Self::widening_search(ctx, &request.embedding, &filter, target).await?;

        if hits.hits.is_empty() && config.fallback_similarity < config.min_similarity {
            tracing::debug!(
                modality = %ctx.modality,
                min_similarity = config.min_similarity,
                fallback_similarity = config.fallback_similarity,
                "No vector hits, relaxing similarity floor"
            );
            let relaxed = SearchFilter::default().with_min_similarity(config.fallback_similarity);
            hits = Self::widening_search(ctx, &request.embedding, &relaxed, target).await?;
        }

        Ok(hits
            .hits
            .into_iter()
            .map(|hit| Candidate::new(hit.chunk, self.kind(), ctx.modality, hit.similarity))
            .collect())
    }
}
