//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by folio-forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all folio-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Request gate calls, labeled by kind and outcome.
pub static REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Ids newly placed on a queue, labeled by kind.
pub static ENQUEUED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Items finished by a worker, labeled by kind and outcome.
pub static GENERATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Time spent producing one asset, labeled by kind.
pub static GENERATION_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Ids waiting in each queue, labeled by kind.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Records picked up by the recovery sweep, labeled by kind and reason.
pub static RECOVERED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Workers currently inside a generation call, labeled by kind.
pub static ACTIVE_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// Total LLM API requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM API request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Total tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Calling again is harmless: the first registry wins
/// and later calls only build throwaway collectors.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new("folio_requests_total", "Generation requests by outcome"),
        &["kind", "outcome"],
    )?;

    let enqueued_total = CounterVec::new(
        Opts::new("folio_enqueued_total", "Target ids newly added to a queue"),
        &["kind"],
    )?;

    let generations_total = CounterVec::new(
        Opts::new("folio_generations_total", "Processed queue items by outcome"),
        &["kind", "outcome"],
    )?;

    let generation_duration = HistogramVec::new(
        HistogramOpts::new(
            "folio_generation_duration_seconds",
            "Time to produce one asset in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["kind"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("folio_queue_depth", "Target ids waiting in the queue"),
        &["kind"],
    )?;

    let recovered_total = CounterVec::new(
        Opts::new("folio_recovered_total", "Records re-enqueued by recovery sweeps"),
        &["kind", "reason"],
    )?;

    let active_workers = GaugeVec::new(
        Opts::new("folio_active_workers", "Workers currently generating"),
        &["kind"],
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("folio_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new("folio_llm_latency_seconds", "LLM API request latency in seconds")
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("folio_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(enqueued_total.clone()))?;
    registry.register(Box::new(generations_total.clone()))?;
    registry.register(Box::new(generation_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(recovered_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = REQUESTS_TOTAL.set(requests_total);
    let _ = ENQUEUED_TOTAL.set(enqueued_total);
    let _ = GENERATIONS_TOTAL.set(generations_total);
    let _ = GENERATION_DURATION.set(generation_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = RECOVERED_TOTAL.set(recovered_total);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the returned
/// string is a single comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
