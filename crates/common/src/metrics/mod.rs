//! Pipeline metrics through the `metrics` facade
//!
//! Series are named `prism_<name>`. Without an installed recorder every call
//! is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::sync::Once;
use std::time::Instant;

pub const METRICS_PREFIX: &str = "prism";

static REGISTER: Once = Once::new();

fn series(name: &str) -> String {
    format!("{METRICS_PREFIX}_{name}")
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Describe every series once per process; later calls do nothing
pub fn register_metrics() {
    REGISTER.call_once(|| {
        describe_counter!(series("queries_total"), Unit::Count, "Processed queries by status");
        describe_histogram!(series("query_duration_seconds"), Unit::Seconds, "End-to-end query latency");
        describe_histogram!(series("stage_duration_seconds"), Unit::Seconds, "Latency per pipeline stage");

        describe_histogram!(series("engine_duration_seconds"), Unit::Seconds, "Recall engine latency");
        describe_gauge!(series("engine_candidates"), Unit::Count, "Candidates from the last run of each engine");
        describe_counter!(series("engine_timeouts_total"), Unit::Count, "Engines that exceeded their timeout");
        describe_counter!(series("layer_errors_total"), Unit::Count, "Recall layers skipped after an error");

        describe_histogram!(series("rerank_duration_seconds"), Unit::Seconds, "Reranking latency");
        describe_counter!(series("rerank_degraded_total"), Unit::Count, "Rerank calls passed through unscored");

        describe_counter!(series("llm_attempts_total"), Unit::Count, "Language model attempts, retries included");
        describe_counter!(series("llm_fallbacks_total"), Unit::Count, "Answers replaced by the fallback template");

        describe_counter!(series("embedding_requests_total"), Unit::Count, "Embedding API requests by status");
        describe_histogram!(series("embedding_duration_seconds"), Unit::Seconds, "Successful embedding latency");

        describe_gauge!(series("sessions_active"), Unit::Count, "Live conversational sessions");
        describe_counter!(series("sessions_evicted_total"), Unit::Count, "Sessions evicted by capacity or idleness");
        describe_counter!(series("reference_resolutions_total"), Unit::Count, "Reference resolution attempts");

        describe_counter!(series("cache_hits_total"), Unit::Count, "Relevance cache hits");
        describe_counter!(series("cache_misses_total"), Unit::Count, "Relevance cache misses");

        tracing::debug!(prefix = METRICS_PREFIX, "Metrics described");
    });
}

/// Times one query from dispatch to result
pub struct QueryTimer {
    start: Instant,
}

impl QueryTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Record the outcome and return the elapsed seconds
    pub fn finish(self, success: bool, degraded: bool) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        let status = status(success);
        counter!(series("queries_total"), "status" => status, "degraded" => degraded.to_string()).increment(1);
        histogram!(series("query_duration_seconds"), "status" => status).record(elapsed);
        elapsed
    }
}

pub fn record_stage(stage: &str, duration_secs: f64) {
    histogram!(series("stage_duration_seconds"), "stage" => stage.to_string()).record(duration_secs);
}

pub fn record_engine(modality: &str, duration_secs: f64, candidates: usize, timed_out: bool) {
    let modality = modality.to_string();
    histogram!(series("engine_duration_seconds"), "modality" => modality.clone()).record(duration_secs);
    gauge!(series("engine_candidates"), "modality" => modality.clone()).set(candidates as f64);
    if timed_out {
        counter!(series("engine_timeouts_total"), "modality" => modality).increment(1);
    }
}

pub fn record_layer_error(modality: &str, layer: &str) {
    counter!(
        series("layer_errors_total"),
        "modality" => modality.to_string(),
        "layer" => layer.to_string()
    )
    .increment(1);
}

pub fn record_rerank(duration_secs: f64, degraded: bool) {
    histogram!(series("rerank_duration_seconds")).record(duration_secs);
    if degraded {
        counter!(series("rerank_degraded_total")).increment(1);
    }
}

pub fn record_llm_attempt(model: &str, success: bool) {
    counter!(series("llm_attempts_total"), "model" => model.to_string(), "status" => status(success)).increment(1);
}

pub fn record_llm_fallback(reason: &str) {
    counter!(series("llm_fallbacks_total"), "reason" => reason.to_string()).increment(1);
}

/// Latency is recorded for successful requests only
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let model = model.to_string();
    counter!(series("embedding_requests_total"), "model" => model.clone(), "status" => status(success)).increment(1);
    if success {
        histogram!(series("embedding_duration_seconds"), "model" => model).record(duration_secs);
    }
}

pub fn set_active_sessions(count: usize) {
    gauge!(series("sessions_active")).set(count as f64);
}

pub fn record_session_eviction(reason: &str, count: usize) {
    counter!(series("sessions_evicted_total"), "reason" => reason.to_string()).increment(count as u64);
}

pub fn record_reference_resolution(resolved: bool) {
    counter!(series("reference_resolutions_total"), "resolved" => resolved.to_string()).increment(1);
}

pub fn record_cache(hit: bool, cache_name: &str) {
    let name = if hit { "cache_hits_total" } else { "cache_misses_total" };
    counter!(series(name), "cache" => cache_name.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_names_are_prefixed() {
        assert_eq!(series("queries_total"), "prism_queries_total");
        assert_eq!(status(false), "error");
    }

    #[test]
    fn test_query_timer() {
        let timer = QueryTimer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let elapsed = timer.finish(true, false);
        assert!(elapsed >= 0.005);
    }

    #[test]
    fn test_helpers_without_recorder() {
        register_metrics();
        register_metrics();
        record_engine("image", 0.01, 3, true);
        record_layer_error("text", "fuzzy");
        record_rerank(0.02, true);
        record_cache(false, "rerank");
        set_active_sessions(2);
    }
}
