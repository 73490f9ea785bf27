//! Job Pipeline: fetch, transcode and publish each admitted item.
//!
//! The pipeline never mutates queue items directly. Every state change goes
//! through the queue actor's guarded `advance`, so a job whose item was
//! removed discovers it on its next transition and drops its output.

mod job;
mod manager;
mod worker_pool;

pub use manager::{PipelineConfig, PipelineManager};
pub use worker_pool::{StageKind, StagePermit, StagePool, StagePoolConfig};
