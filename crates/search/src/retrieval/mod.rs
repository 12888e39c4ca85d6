//! Multi-modal layered recall
//!
//! Every modality engine runs the same ordered list of recall layers:
//! - Structural exact match on figure/table identifiers (short-circuits)
//! - Vector similarity with automatic pool widening
//! - Weighted-field keyword overlap
//! - Hybrid linear combination of vector and keyword scores
//! - Fuzzy matching for partial identifiers
//! - Query expansion, only when earlier layers under-produce
//!
//! Layers are independent: any of them can be disabled, and one that
//! fails is skipped without aborting the engine.

mod engine;
mod expansion;
mod fusion;
mod fuzzy;
mod hybrid;
mod keyword;
mod profile;
mod structural;
mod vector;

pub use engine::LayeredEngine;
pub use expansion::{ExpansionLayer, SynonymDictionary};
pub use fusion::Fusion;
pub use fuzzy::FuzzyLayer;
pub use hybrid::HybridLayer;
pub use keyword::KeywordLayer;
pub use profile::ModalityProfile;
pub use structural::StructuralLayer;
pub use vector::VectorLayer;

use async_trait::async_trait;
use prism_common::config::EngineConfig;
use prism_common::errors::Result;
use prism_common::models::{Candidate, EngineReport, Modality, RecallLayer};
use prism_common::reference::StructuralRef;
use prism_common::store::ContentStore;
use prism_common::text::token_set;
use prism_common::Embedder;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-query recall input, shared by every engine
#[derive(Debug, Clone)]
pub struct RecallRequest {
    /// Resolved query text
    pub text: String,

    /// Distinct query tokens
    pub tokens: HashSet<String>,

    /// Query embedding, computed once per query
    pub embedding: Arc<[f32]>,

    /// Numbered figure/table identifier in the query, if any
    pub reference: Option<StructuralRef>,
}

impl RecallRequest {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        let text = text.into();
        Self {
            tokens: token_set(&text),
            reference: StructuralRef::parse_first(&text),
            embedding: embedding.into(),
            text,
        }
    }
}

/// Output of earlier layers, visible to later ones
#[derive(Debug, Default)]
pub struct LayerState {
    outputs: HashMap<RecallLayer, Vec<Candidate>>,
    seen: HashSet<String>,
}

impl LayerState {
    pub fn output(&self, layer: RecallLayer) -> &[Candidate] {
        self.outputs.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct chunk ids recalled so far
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }

    pub fn seen_ids(&self) -> &HashSet<String> {
        &self.seen
    }

    fn record(&mut self, layer: RecallLayer, candidates: Vec<Candidate>) {
        self.seen.extend(candidates.iter().map(|c| c.id().to_string()));
        self.outputs.insert(layer, candidates);
    }

    fn into_candidates(self) -> Vec<Candidate> {
        let mut outputs = self.outputs;
        RecallLayer::ORDERED
            .iter()
            .filter_map(|layer| outputs.remove(layer))
            .flatten()
            .collect()
    }
}

/// Shared collaborators and settings for one engine's layers
#[derive(Clone)]
pub struct LayerContext {
    pub modality: Modality,
    pub store: Arc<dyn ContentStore>,
    pub embedder: Arc<dyn Embedder>,
    pub config: Arc<EngineConfig>,
    pub profile: ModalityProfile,
}

/// One independent recall strategy
#[async_trait]
pub trait Layer: Send + Sync {
    fn kind(&self) -> RecallLayer;

    async fn recall(
        &self,
        ctx: &LayerContext,
        request: &RecallRequest,
        state: &LayerState,
    ) -> Result<Vec<Candidate>>;
}

/// Candidates and diagnostics from one engine run
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub candidates: Vec<Candidate>,
    pub report: EngineReport,
}

/// Common interface of the modality engines
#[async_trait]
pub trait RecallEngine: Send + Sync {
    fn modality(&self) -> Modality;

    /// Run the layers. Errors only when the content store is unreachable.
    async fn recall(&self, request: &RecallRequest) -> Result<EngineOutput>;
}

/// Closed set of modality engines selected by the router
pub enum ModalityEngine {
    Text(LayeredEngine),
    Image(LayeredEngine),
    Table(LayeredEngine),
}

impl ModalityEngine {
    pub fn new(
        modality: Modality,
        store: Arc<dyn ContentStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        let engine = LayeredEngine::new(modality, store, embedder, config);
        match modality {
            Modality::Text => ModalityEngine::Text(engine),
            Modality::Image => ModalityEngine::Image(engine),
            Modality::Table => ModalityEngine::Table(engine),
        }
    }

    fn inner(&self) -> &LayeredEngine {
        match self {
            ModalityEngine::Text(engine) | ModalityEngine::Image(engine) | ModalityEngine::Table(engine) => engine,
        }
    }
}

#[async_trait]
impl RecallEngine for ModalityEngine {
    fn modality(&self) -> Modality {
        match self {
            ModalityEngine::Text(_) => Modality::Text,
            ModalityEngine::Image(_) => Modality::Image,
            ModalityEngine::Table(_) => Modality::Table,
        }
    }

    async fn recall(&self, request: &RecallRequest) -> Result<EngineOutput> {
        self.inner().run(request).await
    }
}

/// Sort by raw score and cap a layer's output
pub(crate) fn cap_output(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.recall_score
            .total_cmp(&a.recall_score)
            .then_with(|| a.id().cmp(b.id()))
    });
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
pub(crate) mod test_support {
    use prism_common::embeddings::HashingEmbedder;
    use prism_common::models::{Chunk, Modality, StructuralMetadata};
    use prism_common::store::InMemoryStore;

    pub const DIM: usize = 128;

    pub fn embedder() -> HashingEmbedder {
        HashingEmbedder::new(DIM)
    }

    pub fn text_chunk(id: &str, content: &str) -> Chunk {
        Chunk::new(id, Modality::Text, content, embedder().embed_sync(content)).with_metadata(
            StructuralMetadata {
                document_name: "annual_report.pdf".into(),
                page_number: Some(1),
                ..Default::default()
            },
        )
    }

    pub fn image_chunk(id: &str, caption: &str, description: &str) -> Chunk {
        let embedding = embedder().embed_sync(&format!("{caption} {description}"));
        Chunk::new(id, Modality::Image, description, embedding).with_metadata(StructuralMetadata {
            document_name: "annual_report.pdf".into(),
            page_number: Some(4),
            captions: vec![caption.to_string()],
            ..Default::default()
        })
    }

    pub fn table_chunk(id: &str, title: &str, headers: &[&str], content: &str) -> Chunk {
        let embedding = embedder().embed_sync(&format!("{title} {content}"));
        Chunk::new(id, Modality::Table, content, embedding).with_metadata(StructuralMetadata {
            document_name: "annual_report.pdf".into(),
            title: Some(title.to_string()),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            column_count: Some(headers.len()),
            ..Default::default()
        })
    }

    pub fn store(chunks: Vec<Chunk>) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store.extend(chunks).unwrap();
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_common::models::Chunk;

    fn candidate(id: &str, score: f32) -> Candidate {
        let chunk = Arc::new(Chunk::new(id, Modality::Text, "", vec![]));
        Candidate::new(chunk, RecallLayer::Keyword, Modality::Text, score)
    }

    #[test]
    fn test_cap_output_keeps_best() {
        let capped = cap_output(vec![candidate("a", 0.1), candidate("b", 0.9), candidate("c", 0.5)], 2);
        let ids: Vec<&str> = capped.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_request_parses_reference() {
        let request = RecallRequest::new("show figure 4", vec![0.0; 4]);
        assert_eq!(request.reference.map(|r| r.label()).as_deref(), Some("4"));
        assert!(request.tokens.contains("figure"));
    }

    #[test]
    fn test_layer_state_tracks_distinct_ids() {
        let mut state = LayerState::default();
        state.record(RecallLayer::VectorSimilarity, vec![candidate("a", 0.5), candidate("b", 0.4)]);
        state.record(RecallLayer::Keyword, vec![candidate("a", 0.7)]);
        assert_eq!(state.distinct(), 2);
        assert_eq!(state.output(RecallLayer::Keyword).len(), 1);
        assert!(state.output(RecallLayer::Fuzzy).is_empty());
    }
}
