// crates/core/src/schedule/mod.rs
//! Scheduled analysis jobs: schedules, their executions, and tracking.
//!
//! Provides:
//! - `ScheduleContext`: api, clock, tracker config, palette and token store
//! - `ScheduleTracker`: rate-limited refresh, executions, `follow`
//! - `ScheduleRecord` / `ExecutionRecord`: decoded server records

pub mod record;
pub mod tracker;
pub mod view;

pub use record::{
    ChildCounts, ExecutionRecord, Recurrence, ScheduleFingerprint, ScheduleRecord, ScheduleSummary,
    TaskCounts,
};
pub use tracker::{
    ExecutionFilter, RefreshPolicy, ScheduleContext, ScheduleTracker, TokenTarget, TrackerConfig,
};
pub use view::ScheduleView;
