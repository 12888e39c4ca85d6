//! Pipeline result and in-band metrics

use super::candidate::RecallLayer;
use super::chunk::Modality;
use crate::errors::ErrorDetails;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Pipeline stage, used for timing and degradation reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Route,
    Embed,
    Recall,
    Fusion,
    Rerank,
    SmartFilter,
    CollectContext,
    GenerateAnswer,
    FilterSources,
    Memory,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Route => "route",
            Stage::Embed => "embed",
            Stage::Recall => "recall",
            Stage::Fusion => "fusion",
            Stage::Rerank => "rerank",
            Stage::SmartFilter => "smart_filter",
            Stage::CollectContext => "collect_context",
            Stage::GenerateAnswer => "generate_answer",
            Stage::FilterSources => "filter_sources",
            Stage::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: Stage,
    pub duration_ms: f64,
    pub input_count: usize,
    pub output_count: usize,
}

/// A stage that fell back instead of doing its normal work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedStage {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerReport {
    pub layer: RecallLayer,
    pub candidates: usize,
    pub duration_ms: f64,
    /// Set when the layer failed and was skipped
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub modality: Modality,
    pub candidates: usize,
    pub duration_ms: f64,
    pub timed_out: bool,
    /// Set when the engine aborted on a fatal error
    pub error: Option<String>,
    /// Set when the structural layer short-circuited the engine
    pub short_circuited: bool,
    pub layers: Vec<LayerReport>,
}

impl EngineReport {
    pub fn empty(modality: Modality) -> Self {
        Self {
            modality,
            candidates: 0,
            duration_ms: 0.0,
            timed_out: false,
            error: None,
            short_circuited: false,
            layers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub stages: Vec<StageMetrics>,
    pub engines: Vec<EngineReport>,
    pub degraded: Vec<DegradedStage>,
    pub total_ms: f64,
}

impl PipelineMetrics {
    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration, input_count: usize, output_count: usize) {
        self.stages.push(StageMetrics {
            stage,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            input_count,
            output_count,
        });
    }

    pub fn mark_degraded(&mut self, stage: Stage, reason: impl Into<String>) {
        self.degraded.push(DegradedStage {
            stage,
            reason: reason.into(),
        });
    }

    pub fn is_degraded(&self, stage: Stage) -> bool {
        self.degraded.iter().any(|d| d.stage == stage)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageMetrics> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Fold another metrics block (e.g. from synthesis) into this one
    pub fn merge(&mut self, other: PipelineMetrics) {
        self.stages.extend(other.stages);
        self.engines.extend(other.engines);
        self.degraded.extend(other.degraded);
    }
}

/// Reference to a chunk that supports the answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub modality: Modality,
    pub document_name: String,
    pub page_number: Option<u32>,
    pub title: Option<String>,
    pub excerpt: String,
    /// Provenance marker index in the context block
    pub marker: usize,
    pub cited: bool,
    pub relevance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub query_id: Uuid,
    pub answer_text: String,
    pub filtered_sources: Vec<SourceRef>,
    pub metrics: PipelineMetrics,
    pub success: bool,
    pub error: Option<ErrorDetails>,
}

impl PipelineResult {
    pub fn failed(query_id: Uuid, error: ErrorDetails, metrics: PipelineMetrics) -> Self {
        Self {
            query_id,
            answer_text: String::new(),
            filtered_sources: Vec::new(),
            metrics,
            success: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_tracking() {
        let mut metrics = PipelineMetrics::default();
        assert!(!metrics.is_degraded(Stage::Rerank));
        metrics.mark_degraded(Stage::Rerank, "model unreachable");
        assert!(metrics.is_degraded(Stage::Rerank));
        assert!(!metrics.is_degraded(Stage::GenerateAnswer));
    }

    #[test]
    fn test_record_stage() {
        let mut metrics = PipelineMetrics::default();
        metrics.record_stage(Stage::Fusion, Duration::from_millis(12), 30, 10);
        let fusion = metrics.stage(Stage::Fusion).unwrap();
        assert_eq!(fusion.input_count, 30);
        assert!((fusion.duration_ms - 12.0).abs() < 0.01);
    }
}
