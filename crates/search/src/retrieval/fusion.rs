//! Score fusion and deduplication across engines
//!
//! Raw recall scores are not comparable between layers or engines (a
//! structural hit scores 10.0, a cosine similarity sits in [-1, 1]), so
//! each incoming batch is normalized on its own before the lists are
//! merged. Duplicates keep the higher-priority layer and the max of both
//! scores, which makes fusion idempotent under repeated input.

use prism_common::config::{FusionConfig, Normalization};
use prism_common::models::Candidate;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Fusion & deduplication stage
#[derive(Debug, Clone)]
pub struct Fusion {
    config: FusionConfig,
}

impl Default for Fusion {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

impl Fusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Normalize each list independently, merge, deduplicate by chunk id,
    /// order by normalized score and truncate to the ceiling
    pub fn fuse(&self, candidate_lists: Vec<Vec<Candidate>>) -> Vec<Candidate> {
        let mut merged: HashMap<String, Candidate> = HashMap::new();

        for mut list in candidate_lists {
            self.normalize(&mut list);
            for candidate in list {
                match merged.get_mut(candidate.id()) {
                    Some(existing) => merge_duplicate(existing, candidate),
                    None => {
                        merged.insert(candidate.id().to_string(), candidate);
                    }
                }
            }
        }

        let mut fused: Vec<Candidate> = merged.into_values().collect();
        fused.sort_by(compare_fused);
        fused.truncate(self.config.ceiling);

        for (rank, candidate) in fused.iter_mut().enumerate() {
            candidate.final_rank = Some(rank + 1);
        }
        fused
    }

    fn normalize(&self, batch: &mut [Candidate]) {
        if batch.is_empty() {
            return;
        }
        match self.config.normalization {
            Normalization::MinMax => {
                let (min, max) = batch.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
                    (lo.min(c.recall_score), hi.max(c.recall_score))
                });
                let range = max - min;
                for candidate in batch.iter_mut() {
                    candidate.normalized_score = if range > f32::EPSILON {
                        (candidate.recall_score - min) / range
                    } else {
                        1.0
                    };
                }
            }
            Normalization::ZScore => {
                let n = batch.len() as f32;
                let mean = batch.iter().map(|c| c.recall_score).sum::<f32>() / n;
                let variance = batch
                    .iter()
                    .map(|c| (c.recall_score - mean).powi(2))
                    .sum::<f32>()
                    / n;
                let std_dev = variance.sqrt();
                for candidate in batch.iter_mut() {
                    candidate.normalized_score = if std_dev > f32::EPSILON {
                        // Logistic squash keeps the result in (0, 1)
                        let z = (candidate.recall_score - mean) / std_dev;
                        1.0 / (1.0 + (-z).exp())
                    } else {
                        1.0
                    };
                }
            }
        }
    }
}

fn merge_duplicate(existing: &mut Candidate, incoming: Candidate) {
    let recall_score = existing.recall_score.max(incoming.recall_score);
    let normalized_score = existing.normalized_score.max(incoming.normalized_score);
    if incoming.recall_layer.priority() > existing.recall_layer.priority() {
        *existing = incoming;
    }
    existing.recall_score = recall_score;
    existing.normalized_score = normalized_score;
}

fn compare_fused(a: &Candidate, b: &Candidate) -> Ordering {
    b.normalized_score
        .total_cmp(&a.normalized_score)
        .then_with(|| b.recall_layer.priority().cmp(&a.recall_layer.priority()))
        .then_with(|| a.id().cmp(b.id()))
}
