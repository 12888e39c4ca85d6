//! Prism context engine
//!
//! Everything after recall:
//! - Conversational memory with reference resolution
//! - Answer synthesis with retry, fallback and source filtering
//! - The end-to-end retrieval pipeline

pub mod filter;
pub mod memory;
pub mod pipeline;
pub mod synthesis;

pub use filter::SmartFilter;
pub use memory::{ContextSummary, ConversationalMemory, EntityKind, MemoryStats, TurnTicket};
pub use pipeline::RetrievalPipeline;
pub use synthesis::{AnswerSource, SourceFilter, Synthesis, SynthesisState, Synthesizer};
