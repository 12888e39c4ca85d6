//! Content store abstraction
//!
//! Read-only access to ingested chunks, partitioned by modality. The store
//! never widens a search on its own: when a filtered similarity search
//! under-returns, the caller asks again with a larger `k`.

mod memory;

pub use memory::InMemoryStore;

use crate::errors::Result;
use crate::models::{Chunk, Modality};
use crate::reference::StructuralRef;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Post-filter applied to the `k` nearest neighbours
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Only chunks from this source document
    pub document_name: Option<String>,

    /// Drop neighbours below this cosine similarity
    pub min_similarity: Option<f32>,

    /// Chunk ids already recalled
    pub exclude_ids: HashSet<String>,
}

impl SearchFilter {
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    pub fn matches(&self, chunk: &Chunk, similarity: f32) -> bool {
        if let Some(min) = self.min_similarity {
            if similarity < min {
                return false;
            }
        }
        if let Some(doc) = &self.document_name {
            if &chunk.metadata.document_name != doc {
                return false;
            }
        }
        !self.exclude_ids.contains(&chunk.id)
    }
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    /// Filtered neighbours, most similar first
    pub hits: Vec<ScoredChunk>,

    /// Neighbours examined before filtering; less than `k` means the
    /// partition is exhausted
    pub scanned: usize,
}

/// Trait for read-only chunk access
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// k-nearest-neighbour search within one modality, post-filtered
    async fn search(
        &self,
        modality: Modality,
        embedding: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<SearchHits>;

    /// Chunk whose title or caption carries exactly this identifier
    async fn get_by_structural_id(
        &self,
        modality: Modality,
        reference: &StructuralRef,
    ) -> Result<Option<Arc<Chunk>>>;

    /// Every chunk of a modality
    async fn scan(&self, modality: Modality) -> Result<Vec<Arc<Chunk>>>;

    /// Check store connectivity
    async fn health_check(&self) -> Result<()>;
}
