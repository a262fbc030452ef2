// crates/core/src/job/mod.rs
//! Server-side asynchronous jobs.
//!
//! Provides:
//! - `JobHandle`: identity, last-known state and timestamps of one job
//! - `JobSpec`: per-kind payload type and terminal/success classifiers
//! - state enums per kind (`ImportState`, `ExportState`, `BatchSqlStatus`, `Phase`)

pub mod handle;
pub mod spec;
pub mod state;

pub use handle::{BatchSqlJob, ExecutionJob, ExportJob, ImportJob, JobContext, JobHandle, SyncJob};
pub use spec::{
    BatchSql, BatchSqlPayload, Execution, ExecutionPayload, Export, ExportPayload, Failure, Import,
    ImportPayload, JobSpec, SyncPayload, SyncTable,
};
pub use state::{BatchSqlStatus, ExportState, ImportState, Phase};
