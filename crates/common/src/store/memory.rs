//! In-memory content store
//!
//! Chunks are loaded once and then shared read-only across queries.
//! Similarity search ranks the whole partition and applies the filter to
//! the top `k` only, the way approximate-nearest-neighbour indexes behave,
//! so a selective filter can starve a small pool.

use super::{ContentStore, ScoredChunk, SearchFilter, SearchHits};
use crate::embeddings::cosine_similarity;
use crate::errors::{AppError, Result};
use crate::models::{Chunk, Modality};
use crate::reference::StructuralRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Partition {
    dimension: Option<usize>,
    chunks: Vec<Arc<Chunk>>,
    structural: HashMap<StructuralRef, Arc<Chunk>>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    partitions: HashMap<Modality, Partition>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the embedding dimension of a modality before loading
    pub fn with_dimension(mut self, modality: Modality, dimension: usize) -> Self {
        self.partitions.entry(modality).or_default().dimension = Some(dimension);
        self
    }

    /// Add a chunk. The first chunk of a modality fixes its dimension
    /// unless one was configured.
    pub fn insert(&mut self, chunk: Chunk) -> Result<()> {
        let partition = self.partitions.entry(chunk.modality).or_default();

        let expected = *partition.dimension.get_or_insert(chunk.embedding.len());
        if chunk.embedding.len() != expected {
            return Err(AppError::DimensionMismatch {
                modality: chunk.modality.to_string(),
                expected,
                actual: chunk.embedding.len(),
            });
        }
        if partition.chunks.iter().any(|c| c.id == chunk.id) {
            return Err(AppError::DuplicateChunk { id: chunk.id });
        }

        let chunk = Arc::new(chunk);
        for field in chunk.identifier_fields() {
            for reference in StructuralRef::find_all(field) {
                partition
                    .structural
                    .entry(reference)
                    .or_insert_with(|| Arc::clone(&chunk));
            }
        }
        partition.chunks.push(chunk);
        Ok(())
    }

    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Chunk>) -> Result<()> {
        for chunk in chunks {
            self.insert(chunk)?;
        }
        Ok(())
    }

    pub fn len(&self, modality: Modality) -> usize {
        self.partitions.get(&modality).map_or(0, |p| p.chunks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(|p| p.chunks.is_empty())
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn search(
        &self,
        modality: Modality,
        embedding: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<SearchHits> {
        let Some(partition) = self.partitions.get(&modality) else {
            return Ok(SearchHits::default());
        };
        if let Some(expected) = partition.dimension {
            if !partition.chunks.is_empty() && embedding.len() != expected {
                return Err(AppError::DimensionMismatch {
                    modality: modality.to_string(),
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let mut ranked: Vec<ScoredChunk> = partition
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                similarity: cosine_similarity(embedding, &chunk.embedding),
                chunk: Arc::clone(chunk),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        ranked.truncate(k);

        let scanned = ranked.len();
        let hits = ranked
            .into_iter()
            .filter(|hit| filter.matches(&hit.chunk, hit.similarity))
            .collect();

        Ok(SearchHits { hits, scanned })
    }

    async fn get_by_structural_id(
        &self,
        modality: Modality,
        reference: &StructuralRef,
    ) -> Result<Option<Arc<Chunk>>> {
        Ok(self
            .partitions
            .get(&modality)
            .and_then(|p| p.structural.get(reference))
            .cloned())
    }

    async fn scan(&self, modality: Modality) -> Result<Vec<Arc<Chunk>>> {
        Ok(self
            .partitions
            .get(&modality)
            .map(|p| p.chunks.clone())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
