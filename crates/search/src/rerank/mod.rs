//! Reranking service
//!
//! Re-scores fused candidates against the query using each chunk's
//! textual representation (descriptions for images and tables, never raw
//! content). The final score blends a relevance model with a rule-based
//! lexical score. If the model fails, the input is returned unchanged with
//! fusion scores copied into `rerank_score` and the outcome flagged as
//! degraded.

mod model;

pub use model::{rule_score, HttpRelevanceModel, LexicalRelevanceModel, RelevanceModel};

use lru::LruCache;
use parking_lot::Mutex;
use prism_common::config::RerankConfig;
use prism_common::errors::{AppError, Result};
use prism_common::metrics::{record_cache, record_rerank};
use prism_common::models::Candidate;
use prism_common::text::token_set;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

/// Result of one rerank call
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<Candidate>,

    /// Set when the relevance model failed and scores were passed through
    pub degraded: Option<String>,

    /// Relevance scores served from the cache
    pub cache_hits: usize,
}

pub struct RerankingService {
    config: RerankConfig,
    model: Arc<dyn RelevanceModel>,
    cache: Option<Mutex<LruCache<String, f32>>>,
}

impl RerankingService {
    pub fn new(config: RerankConfig, model: Arc<dyn RelevanceModel>) -> Self {
        let cache = NonZeroUsize::new(config.cache_capacity)
            .filter(|_| config.cache_enabled)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self { config, model, cache }
    }

    /// Use the HTTP model when an endpoint is configured, the lexical model otherwise
    pub fn from_config(config: RerankConfig) -> Result<Self> {
        let model: Arc<dyn RelevanceModel> = if config.endpoint.is_some() {
            Arc::new(HttpRelevanceModel::new(&config)?)
        } else {
            Arc::new(LexicalRelevanceModel)
        };
        Ok(Self::new(config, model))
    }

    fn cache_key(&self, query: &str, chunk_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.model_name().as_bytes());
        hasher.update([0u8]);
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Rerank candidates; never fails
    pub async fn rerank(&self, query: &str, candidates: Vec<Candidate>) -> RerankOutcome {
        let start = Instant::now();
        if !self.config.enabled || candidates.is_empty() {
            return passthrough(candidates, None);
        }

        match self.score_all(query, &candidates).await {
            Ok((scores, cache_hits)) => {
                let mut reranked: Vec<Candidate> = candidates
                    .into_iter()
                    .zip(scores)
                    .map(|(mut candidate, score)| {
                        candidate.rerank_score = Some(score);
                        candidate
                    })
                    .collect();
                reranked.sort_by(|a, b| {
                    b.effective_score()
                        .total_cmp(&a.effective_score())
                        .then_with(|| b.normalized_score.total_cmp(&a.normalized_score))
                        .then_with(|| a.id().cmp(b.id()))
                });

                record_rerank(start.elapsed().as_secs_f64(), false);
                tracing::debug!(
                    candidates = reranked.len(),
                    cache_hits,
                    model = self.model.model_name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Rerank completed"
                );
                RerankOutcome {
                    candidates: reranked,
                    degraded: None,
                    cache_hits,
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    model = self.model.model_name(),
                    candidates = candidates.len(),
                    "Relevance model failed, passing fusion scores through"
                );
                record_rerank(start.elapsed().as_secs_f64(), true);
                passthrough(candidates, Some(err.to_string()))
            }
        }
    }

    /// Blended scores for the first `max_candidates` candidates
    async fn score_all(&self, query: &str, candidates: &[Candidate]) -> Result<(Vec<f32>, usize)> {
        let scored = &candidates[..candidates.len().min(self.config.max_candidates.max(1))];
        let documents: Vec<String> = scored.iter().map(|c| c.chunk.text_representation()).collect();

        let mut model_scores: Vec<Option<f32>> = vec![None; scored.len()];
        let keys: Vec<String> = scored.iter().map(|c| self.cache_key(query, c.id())).collect();
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            for (slot, key) in model_scores.iter_mut().zip(&keys) {
                *slot = cache.get(key).copied();
                record_cache(slot.is_some(), "rerank");
            }
        }
        let cache_hits = model_scores.iter().filter(|s| s.is_some()).count();

        let missing: Vec<usize> = (0..scored.len()).filter(|&i| model_scores[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| documents[i].clone()).collect();
            let fresh = self.model.score(query, &batch).await?;
            if fresh.len() != batch.len() {
                return Err(AppError::Reranker {
                    message: format!("expected {} scores, got {}", batch.len(), fresh.len()),
                });
            }

            let mut cache = self.cache.as_ref().map(|c| c.lock());
            for (&i, score) in missing.iter().zip(fresh) {
                model_scores[i] = Some(score);
                if let Some(cache) = cache.as_mut() {
                    cache.put(keys[i].clone(), score);
                }
            }
        }

        let query_tokens = token_set(query);
        let query_lower = query.trim().to_lowercase();
        let blended = model_scores
            .into_iter()
            .zip(&documents)
            .map(|(model_score, doc)| {
                let rule = rule_score(&query_tokens, &query_lower, doc);
                self.config.model_weight * model_score.unwrap_or(0.0) + self.config.rule_weight * rule
            })
            .collect();

        Ok((blended, cache_hits))
    }
}

/// Copy fusion scores into `rerank_score`, keeping order and length
fn passthrough(mut candidates: Vec<Candidate>, degraded: Option<String>) -> RerankOutcome {
    for candidate in &mut candidates {
        candidate.rerank_score = Some(candidate.normalized_score);
    }
    RerankOutcome {
        candidates,
        degraded,
        cache_hits: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prism_common::models::{Chunk, Modality, RecallLayer, StructuralMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UnreachableModel;

    #[async_trait]
    impl RelevanceModel for UnreachableModel {
        async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
            Err(AppError::Reranker {
                message: "connection refused".into(),
            })
        }

        fn model_name(&self) -> &str {
            "unreachable"
        }
    }

    /// Lexical scores, counting documents sent to the model
    #[derive(Default)]
    struct CountingModel {
        scored: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceModel for CountingModel {
        async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
            self.scored.fetch_add(documents.len(), Ordering::SeqCst);
            LexicalRelevanceModel.score(query, documents).await
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn candidate(id: &str, content: &str, normalized: f32) -> Candidate {
        let chunk = Arc::new(Chunk::new(id, Modality::Text, content, vec![]));
        let mut candidate = Candidate::new(chunk, RecallLayer::VectorSimilarity, Modality::Text, normalized);
        candidate.normalized_score = normalized;
        candidate
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            candidate("weather", "Sunny with light wind", 0.9),
            candidate("revenue", "Company X revenue was $10B in 2023", 0.4),
            candidate("office", "Company X opened an office", 0.2),
        ]
    }

    #[tokio::test]
    async fn test_unreachable_model_passes_input_through() {
        let service = RerankingService::new(RerankConfig::default(), Arc::new(UnreachableModel));
        let input = candidates();
        let outcome = service.rerank("Company X revenue", input.clone()).await;

        assert!(outcome.degraded.is_some());
        assert_eq!(outcome.candidates.len(), input.len());
        for (before, after) in input.iter().zip(&outcome.candidates) {
            assert_eq!(before.id(), after.id());
            assert_eq!(after.rerank_score, Some(before.normalized_score));
        }
    }

    #[tokio::test]
    async fn test_degraded_path_ignores_candidate_cap() {
        let config = RerankConfig {
            max_candidates: 1,
            ..Default::default()
        };
        let service = RerankingService::new(config, Arc::new(UnreachableModel));
        let outcome = service.rerank("q", candidates()).await;
        assert_eq!(outcome.candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_relevance_reorders_candidates() {
        let service = RerankingService::new(RerankConfig::default(), Arc::new(LexicalRelevanceModel));
        let outcome = service.rerank("Company X revenue", candidates()).await;

        assert!(outcome.degraded.is_none());
        assert_eq!(outcome.candidates[0].id(), "revenue");
        assert_eq!(outcome.candidates.last().unwrap().id(), "weather");
        assert!(outcome.candidates.iter().all(|c| c.rerank_score.is_some()));
    }

    #[tokio::test]
    async fn test_cap_drops_tail_candidates() {
        let config = RerankConfig {
            max_candidates: 2,
            ..Default::default()
        };
        let service = RerankingService::new(config, Arc::new(LexicalRelevanceModel));
        let outcome = service.rerank("Company X revenue", candidates()).await;
        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.candidates.iter().all(|c| c.id() != "office"));
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_queries() {
        let model = Arc::new(CountingModel::default());
        let service = RerankingService::new(RerankConfig::default(), model.clone());

        let first = service.rerank("Company X revenue", candidates()).await;
        let second = service.rerank("Company X revenue", candidates()).await;

        assert_eq!(first.cache_hits, 0);
        assert_eq!(second.cache_hits, 3);
        assert_eq!(model.scored.load(Ordering::SeqCst), 3);
        let a: Vec<Option<f32>> = first.candidates.iter().map(|c| c.rerank_score).collect();
        let b: Vec<Option<f32>> = second.candidates.iter().map(|c| c.rerank_score).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_disabled_service_copies_fusion_scores() {
        let config = RerankConfig {
            enabled: false,
            ..Default::default()
        };
        let service = RerankingService::new(config, Arc::new(UnreachableModel));
        let outcome = service.rerank("q", candidates()).await;
        assert!(outcome.degraded.is_none());
        assert_eq!(outcome.candidates[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_image_scored_on_description() {
        let chunk = Chunk::new("fig4", Modality::Image, "Bar chart of net profit", vec![])
            .with_metadata(StructuralMetadata {
                captions: vec!["Figure 4: Net Profit Overview".into()],
                ..Default::default()
            });
        let mut image = Candidate::new(Arc::new(chunk), RecallLayer::StructuralExact, Modality::Image, 10.0);
        image.normalized_score = 1.0;

        let service = RerankingService::new(RerankConfig::default(), Arc::new(LexicalRelevanceModel));
        let outcome = service.rerank("net profit overview", vec![image]).await;
        assert!(outcome.candidates[0].rerank_score.unwrap() > 0.5);
    }
}
