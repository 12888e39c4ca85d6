//! Prism Common Library
//!
//! Shared code for the Prism retrieval crates including:
//! - Chunk, candidate, query and result data model
//! - Error types and failure classification
//! - Configuration management
//! - Content store, embedding and language-model abstractions
//! - Language-aware tokenization and structural reference parsing
//! - Metrics and tracing setup

pub mod cancel;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod reference;
pub mod store;
pub mod telemetry;
pub mod text;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, ErrorClass, Result};
pub use llm::LanguageModel;
pub use models::{Candidate, Chunk, Modality, Query, RecallLayer, RequestedModality};
pub use reference::StructuralRef;
pub use store::ContentStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
