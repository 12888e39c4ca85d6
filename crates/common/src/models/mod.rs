//! Data model for the retrieval pipeline
//!
//! Chunks are ingested elsewhere and only read here; candidates, queries
//! and results are transient per-query values.

mod candidate;
mod chunk;
mod query;
mod result;

pub use candidate::{Candidate, RecallLayer};
pub use chunk::{Chunk, Modality, StructuralMetadata};
pub use query::{Query, RequestedModality, MAX_QUERY_CHARS, MAX_RESULTS_LIMIT};
pub use result::{
    DegradedStage, EngineReport, LayerReport, PipelineMetrics, PipelineResult, SourceRef, Stage,
    StageMetrics,
};
