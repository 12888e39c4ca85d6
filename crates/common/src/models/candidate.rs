//! Per-query scored wrapper around a chunk

use super::chunk::{Chunk, Modality};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Recall strategy that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallLayer {
    StructuralExact,
    VectorSimilarity,
    Keyword,
    Hybrid,
    Fuzzy,
    QueryExpansion,
}

impl RecallLayer {
    /// Execution order within an engine
    pub const ORDERED: [RecallLayer; 6] = [
        RecallLayer::StructuralExact,
        RecallLayer::VectorSimilarity,
        RecallLayer::Keyword,
        RecallLayer::Hybrid,
        RecallLayer::Fuzzy,
        RecallLayer::QueryExpansion,
    ];

    /// Higher wins when the same chunk is recalled by two layers
    pub fn priority(&self) -> u8 {
        match self {
            RecallLayer::StructuralExact => 6,
            RecallLayer::VectorSimilarity => 5,
            RecallLayer::Keyword => 4,
            RecallLayer::Hybrid => 3,
            RecallLayer::Fuzzy => 2,
            RecallLayer::QueryExpansion => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecallLayer::StructuralExact => "structural_exact",
            RecallLayer::VectorSimilarity => "vector_similarity",
            RecallLayer::Keyword => "keyword",
            RecallLayer::Hybrid => "hybrid",
            RecallLayer::Fuzzy => "fuzzy",
            RecallLayer::QueryExpansion => "query_expansion",
        }
    }
}

impl fmt::Display for RecallLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate produced by a recall layer and enriched by fusion and reranking
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Arc<Chunk>,

    /// Layer that produced the candidate
    pub recall_layer: RecallLayer,

    /// Engine that produced the candidate
    pub source: Modality,

    /// Raw, layer-specific score
    pub recall_score: f32,

    /// Score on a common [0, 1] scale, set by fusion
    pub normalized_score: f32,

    /// Set by the reranking service
    pub rerank_score: Option<f32>,

    /// 1-based rank, set by fusion
    pub final_rank: Option<usize>,
}

impl Candidate {
    pub fn new(chunk: Arc<Chunk>, recall_layer: RecallLayer, source: Modality, recall_score: f32) -> Self {
        Self {
            chunk,
            recall_layer,
            source,
            recall_score,
            normalized_score: 0.0,
            rerank_score: None,
            final_rank: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    /// Best available score: rerank score when set, fusion score otherwise
    pub fn effective_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.normalized_score)
    }
}
