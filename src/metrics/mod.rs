//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks the generation pipelines: gate outcomes, queue depth, worker
//! outcomes and latency, recovery sweeps, and LLM usage.
//!
//! # Example
//!
//! ```ignore
//! use folio_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_request(AssetKind::Quiz, "scheduled");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, TokenUsage};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, ENQUEUED_TOTAL, GENERATIONS_TOTAL, GENERATION_DURATION, LLM_LATENCY,
    LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, QUEUE_DEPTH, RECOVERED_TOTAL, REGISTRY, REQUESTS_TOTAL,
};
