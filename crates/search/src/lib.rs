//! Prism retrieval
//!
//! Provides the recall side of the pipeline:
//! - Query routing to a subset of modality engines
//! - Layered recall per modality (structural, vector, keyword, hybrid, fuzzy, expansion)
//! - Score normalization, fusion and deduplication across engines
//! - Reranking with graceful degradation

pub mod rerank;
pub mod retrieval;
pub mod router;

pub use rerank::{RelevanceModel, RerankOutcome, RerankingService};
pub use retrieval::{EngineOutput, Fusion, ModalityEngine, RecallEngine, RecallRequest};
pub use router::{QueryRouter, ReferenceResolver, RouteDecision, RouteReason};
