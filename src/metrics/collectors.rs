//! Custom metric collectors for folio-forge operations.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics with methods named
//! after pipeline events. Every method is a no-op until `init_metrics()` has
//! run, so library code and tests can record freely.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_WORKERS, ENQUEUED_TOTAL, GENERATIONS_TOTAL, GENERATION_DURATION, LLM_LATENCY,
    LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, QUEUE_DEPTH, RECOVERED_TOTAL, REQUESTS_TOTAL,
};
use crate::pipeline::AssetKind;

/// Token usage information for LLM requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Number of input/prompt tokens.
    pub input_tokens: u64,
    /// Number of output/completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Get the total number of tokens (input + output).
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Metrics collector for recording pipeline events.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record the outcome of a request gate call.
    ///
    /// # Arguments
    ///
    /// * `kind` - Asset kind the request was for
    /// * `outcome` - e.g. "scheduled", "already_completed", "not_found"
    pub fn record_request(&self, kind: AssetKind, outcome: &str) {
        if let Some(requests) = REQUESTS_TOTAL.get() {
            requests.with_label_values(&[kind.as_str(), outcome]).inc();
        }

        tracing::trace!(kind = %kind, outcome = outcome, "Recorded request metric");
    }

    /// Record an id newly placed on a queue along with the resulting depth.
    pub fn record_enqueue(&self, kind: AssetKind, depth: usize) {
        if let Some(enqueued) = ENQUEUED_TOTAL.get() {
            enqueued.with_label_values(&[kind.as_str()]).inc();
        }
        self.update_queue_depth(kind, depth);
    }

    /// Update the queue depth gauge for a kind.
    pub fn update_queue_depth(&self, kind: AssetKind, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[kind.as_str()])
                .set(depth as f64);
        }

        tracing::trace!(kind = %kind, depth = depth, "Updated queue depth metric");
    }

    /// Record a processed queue item.
    ///
    /// # Arguments
    ///
    /// * `kind` - Asset kind of the pipeline
    /// * `outcome` - "completed", "fallback", "failed", "skipped", "abandoned" or "requeued"
    /// * `duration` - Wall time spent on the item
    pub fn record_generation(&self, kind: AssetKind, outcome: &str, duration: Duration) {
        if let Some(generations) = GENERATIONS_TOTAL.get() {
            generations
                .with_label_values(&[kind.as_str(), outcome])
                .inc();
        }

        if !matches!(outcome, "skipped" | "requeued") {
            if let Some(histogram) = GENERATION_DURATION.get() {
                histogram
                    .with_label_values(&[kind.as_str()])
                    .observe(duration.as_secs_f64());
            }
        }

        tracing::trace!(
            kind = %kind,
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Recorded generation metric"
        );
    }

    /// Record records re-enqueued by a recovery sweep.
    ///
    /// `reason` is "stale", "pending" or "legacy".
    pub fn record_recovered(&self, kind: AssetKind, reason: &str, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(recovered) = RECOVERED_TOTAL.get() {
            recovered
                .with_label_values(&[kind.as_str(), reason])
                .inc_by(count as f64);
        }
    }

    pub fn inc_active(&self, kind: AssetKind) {
        if let Some(active) = ACTIVE_WORKERS.get() {
            active.with_label_values(&[kind.as_str()]).inc();
        }
    }

    pub fn dec_active(&self, kind: AssetKind) {
        if let Some(active) = ACTIVE_WORKERS.get() {
            active.with_label_values(&[kind.as_str()]).dec();
        }
    }

    /// Record an LLM API request.
    ///
    /// # Arguments
    ///
    /// * `model` - LLM model identifier
    /// * `success` - Whether the request succeeded
    /// * `latency_secs` - Request latency in seconds
    /// * `tokens` - Token usage for the request
    pub fn record_llm_request(
        &self,
        model: &str,
        success: bool,
        latency_secs: f64,
        tokens: TokenUsage,
    ) {
        let status = if success { "success" } else { "failure" };

        if let Some(llm_requests) = LLM_REQUESTS_TOTAL.get() {
            llm_requests.with_label_values(&[model, status]).inc();
        }

        if let Some(llm_latency) = LLM_LATENCY.get() {
            llm_latency
                .with_label_values(&[model])
                .observe(latency_secs);
        }

        if let Some(llm_tokens) = LLM_TOKENS_TOTAL.get() {
            llm_tokens
                .with_label_values(&[model, "input"])
                .inc_by(tokens.input_tokens as f64);
            llm_tokens
                .with_label_values(&[model, "output"])
                .inc_by(tokens.output_tokens as f64);
        }

        tracing::trace!(
            model = model,
            status = status,
            latency_secs = latency_secs,
            input_tokens = tokens.input_tokens,
            output_tokens = tokens.output_tokens,
            "Recorded LLM request metric"
        );
    }
}
