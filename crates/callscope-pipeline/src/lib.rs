//! The per-call processing engine.
//!
//! One claimed row moves through download → duration → transcribe → redact
//! → analyze → commit, strictly in order. Concurrency across rows is
//! bounded by a semaphore sized from `max_concurrent_processing`. Errors
//! mark the row failed with a short kind-prefixed message; nothing is ever
//! left in `processing` once a run returns.

pub mod duration;
mod engine;

pub use engine::ProcessingEngine;
