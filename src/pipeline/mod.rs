//! Asynchronous asset generation pipeline.
//!
//! One generic [`Pipeline<T, O>`] per asset kind, each with its own record
//! store view, dedup queue and single worker.
//!
//! # Architecture
//!
//! - **RecordStore**: durable `(kind, target_id)` rows with status and output
//! - **DedupQueue**: in-memory FIFO of target ids, no duplicates while waiting
//! - **RequestGate**: creates or resets records and defers the enqueue to the
//!   caller's [`Outbox`]
//! - **Worker**: pops ids and drives records to `Completed` or `Failed`
//! - **RecoverySweep**: rebuilds the queue from the table after a crash
//!
//! # Flow
//!
//! 1. A producer opens a [`UnitOfWork`] and calls `request` on a pipeline
//! 2. The gate writes a `Pending` record and defers the enqueue
//! 3. The producer commits; the outbox flushes the id into the queue
//! 4. The worker marks the record `Generating`, calls the generator (or the
//!    fallback) and writes the terminal status
//! 5. On startup, and when a batch wait stalls, the sweep resets stale
//!    `Generating` rows and re-enqueues everything still pending

pub mod engine;
pub mod gate;
pub mod kind;
pub mod outbox;
pub mod pregenerate;
pub mod queue;
pub mod record;
pub mod recovery;
pub mod set;
pub mod store;
pub mod traits;
pub mod worker;

pub use engine::{Pipeline, PipelineParts, PipelineSettings};
pub use gate::{RequestGate, RequestOutcome};
pub use kind::{AssetKind, AssetRequest, TargetType};
pub use outbox::{Outbox, UnitOfWork};
pub use pregenerate::{PregenerateSettings, PregenerationReport, Pregenerator};
pub use queue::DedupQueue;
pub use record::{GenerationRecord, GenerationStatus, StatusCounts, StatusView};
pub use recovery::{RecoverySummary, RecoverySweep, StalenessPolicy};
pub use set::{AssetPipeline, AssetPipelines};
pub use store::RecordStore;
pub use traits::{
    AssetOutput, CompletionHook, FallbackGenerator, Generator, Target, TargetRepository,
};
pub use worker::WorkerStats;
