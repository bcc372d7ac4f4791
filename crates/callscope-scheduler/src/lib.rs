//! Periodic ticks for every source, plus retention sweeps and host metrics
//! sampling.
//!
//! Ticks are explicit bounded tasks: a due check claims the
//! per-(tenant, source) sync-state row, the job runs in a spawned task, and
//! the claim is released with the outcome. Ticks that find a claim already
//! held are dropped (reason `in-progress`), never queued. Graceful shutdown
//! stops dispatching and drains in-flight tasks so every row reaches a
//! persisted state.

mod engine;
mod jobs;
mod metrics;
mod retention;

pub use engine::{SchedulerEngine, SchedulerHandle, SyncCommand};
pub use metrics::{seconds_until_next_boundary, MetricsSampler};
pub use retention::{keep_from_day, retention_due};
