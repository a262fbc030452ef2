// crates/core/src/job/spec.rs
//! Per-kind job descriptions: typed payloads and the terminal/success
//! classifiers used everywhere instead of ad-hoc string checks.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::state::{BatchSqlStatus, ExportState, ImportState, Phase};
use crate::api::JobKind;
use crate::poller::{PollInterval, PollPolicy};

/// Server-supplied failure details, retained verbatim for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl Failure {
    fn from_parts(code: Option<&str>, message: Option<&str>) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.map(str::to_string),
        }
    }
}

/// Static description of one job kind.
pub trait JobSpec: Sized + 'static {
    const KIND: JobKind;

    type State: Clone + fmt::Debug + fmt::Display + PartialEq + Send + Sync;
    type Payload: DeserializeOwned + Clone + fmt::Debug + Send + Sync;

    fn state(payload: &Self::Payload) -> Self::State;

    fn is_terminal(state: &Self::State) -> bool;

    /// True only for a terminal success. A failed job is data, not an error.
    fn succeeded(payload: &Self::Payload) -> bool;

    fn failure(payload: &Self::Payload) -> Option<Failure>;

    fn default_policy() -> PollPolicy<Self::State>;
}

/// Ids arrive as numbers or strings depending on the endpoint.
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or numeric id, got {other}"
        ))),
    }
}

/// Error codes and optional ids arrive as numbers or strings depending on
/// the endpoint.
pub(crate) fn de_opt_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// `get_error_text` is either a plain string or `{title, what_about}`.
fn de_opt_error_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(obj)) => {
            let title = obj.get("title").and_then(Value::as_str);
            let detail = obj.get("what_about").and_then(Value::as_str);
            match (title, detail) {
                (Some(t), Some(d)) => Some(format!("{t}: {d}")),
                (Some(t), None) => Some(t.to_string()),
                (None, Some(d)) => Some(d.to_string()),
                (None, None) => Some(Value::Object(obj).to_string()),
            }
        }
        Some(other) => Some(other.to_string()),
    })
}

// =============================================================================
// Import
// =============================================================================

/// File or URL import.
pub enum Import {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportPayload {
    #[serde(default)]
    pub state: ImportState,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_code")]
    pub table_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_code")]
    pub synchronization_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_code")]
    pub error_code: Option<String>,
    #[serde(default, rename = "get_error_text", deserialize_with = "de_opt_error_text")]
    pub error_message: Option<String>,
    /// Fields not promoted to typed attributes.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Longer sleeps while the server is busy on the heavy phases.
fn import_interval(state: &ImportState) -> Duration {
    match state {
        ImportState::Importing | ImportState::Guessing => Duration::from_secs(5),
        _ => Duration::from_secs(1),
    }
}

impl JobSpec for Import {
    const KIND: JobKind = JobKind::Import;
    type State = ImportState;
    type Payload = ImportPayload;

    fn state(payload: &ImportPayload) -> ImportState {
        payload.state.clone()
    }

    fn is_terminal(state: &ImportState) -> bool {
        state.is_import_terminal()
    }

    /// `complete` with `success == false` is a failure.
    fn succeeded(payload: &ImportPayload) -> bool {
        payload.state == ImportState::Complete && payload.success != Some(false)
    }

    fn failure(payload: &ImportPayload) -> Option<Failure> {
        let failed = payload.state == ImportState::Failure
            || (payload.state == ImportState::Complete && payload.success == Some(false));
        failed.then(|| {
            Failure::from_parts(payload.error_code.as_deref(), payload.error_message.as_deref())
        })
    }

    fn default_policy() -> PollPolicy<ImportState> {
        PollPolicy::new(PollInterval::ByState(import_interval), 600)
    }
}

// =============================================================================
// Sync table
// =============================================================================

/// A table kept in sync with a remote URL.
pub enum SyncTable {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncPayload {
    #[serde(default)]
    pub state: ImportState,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ran_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retried_times: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_code")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpec for SyncTable {
    const KIND: JobKind = JobKind::Sync;
    type State = ImportState;
    type Payload = SyncPayload;

    fn state(payload: &SyncPayload) -> ImportState {
        payload.state.clone()
    }

    fn is_terminal(state: &ImportState) -> bool {
        state.is_sync_terminal()
    }

    /// `created` is "awaiting first run": neither success nor failure.
    fn succeeded(payload: &SyncPayload) -> bool {
        matches!(payload.state, ImportState::Complete | ImportState::Success)
    }

    fn failure(payload: &SyncPayload) -> Option<Failure> {
        (payload.state == ImportState::Failure).then(|| {
            Failure::from_parts(payload.error_code.as_deref(), payload.error_message.as_deref())
        })
    }

    fn default_policy() -> PollPolicy<ImportState> {
        PollPolicy::new(PollInterval::Fixed(Duration::from_secs(5)), 60)
    }
}

// =============================================================================
// Export
// =============================================================================

/// Visualization export.
pub enum Export {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExportPayload {
    #[serde(default)]
    pub state: ExportState,
    /// Download URL, set once the export is complete.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "de_opt_code")]
    pub visualization_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_code")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpec for Export {
    const KIND: JobKind = JobKind::Export;
    type State = ExportState;
    type Payload = ExportPayload;

    fn state(payload: &ExportPayload) -> ExportState {
        payload.state.clone()
    }

    fn is_terminal(state: &ExportState) -> bool {
        state.is_terminal()
    }

    fn succeeded(payload: &ExportPayload) -> bool {
        payload.state == ExportState::Complete
    }

    fn failure(payload: &ExportPayload) -> Option<Failure> {
        (payload.state == ExportState::Failure)
            .then(|| Failure::from_parts(payload.error_code.as_deref(), payload.error.as_deref()))
    }

    fn default_policy() -> PollPolicy<ExportState> {
        PollPolicy::new(PollInterval::Fixed(Duration::from_secs(5)), 120)
    }
}

// =============================================================================
// Batch SQL
// =============================================================================

/// Asynchronous SQL job.
pub enum BatchSql {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchSqlPayload {
    #[serde(default)]
    pub status: BatchSqlStatus,
    /// A single statement, a list of statements, or a list of
    /// `{query, status}` objects for multi-query jobs.
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub failed_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpec for BatchSql {
    const KIND: JobKind = JobKind::BatchSql;
    type State = BatchSqlStatus;
    type Payload = BatchSqlPayload;

    fn state(payload: &BatchSqlPayload) -> BatchSqlStatus {
        payload.status.clone()
    }

    fn is_terminal(state: &BatchSqlStatus) -> bool {
        state.is_terminal()
    }

    fn succeeded(payload: &BatchSqlPayload) -> bool {
        payload.status == BatchSqlStatus::Done
    }

    fn failure(payload: &BatchSqlPayload) -> Option<Failure> {
        match payload.status {
            BatchSqlStatus::Failed | BatchSqlStatus::Cancelled | BatchSqlStatus::Unknown => {
                Some(Failure::from_parts(None, payload.failed_reason.as_deref()))
            }
            _ => None,
        }
    }

    fn default_policy() -> PollPolicy<BatchSqlStatus> {
        PollPolicy::new(PollInterval::Fixed(Duration::from_secs(2)), 150)
    }
}

// =============================================================================
// Scheduled execution
// =============================================================================

/// One run of a schedule.
pub enum Execution {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionPayload {
    #[serde(alias = "id", deserialize_with = "de_id")]
    pub execution_id: String,
    #[serde(default, alias = "status")]
    pub phase: Phase,
    #[serde(default)]
    pub failed: Option<bool>,
    #[serde(default)]
    pub allocation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Executions doing real work are polled less often.
fn execution_interval(phase: &Phase) -> Duration {
    match phase {
        Phase::Running => Duration::from_secs(5),
        _ => Duration::from_secs(1),
    }
}

impl JobSpec for Execution {
    const KIND: JobKind = JobKind::ScheduledExecution;
    type State = Phase;
    type Payload = ExecutionPayload;

    fn state(payload: &ExecutionPayload) -> Phase {
        payload.phase.clone()
    }

    fn is_terminal(state: &Phase) -> bool {
        state.is_terminal()
    }

    /// `failed` is only meaningful once the execution is dead.
    fn succeeded(payload: &ExecutionPayload) -> bool {
        payload.phase == Phase::Dead && payload.failed != Some(true)
    }

    fn failure(payload: &ExecutionPayload) -> Option<Failure> {
        (payload.phase == Phase::Dead && payload.failed == Some(true))
            .then(|| Failure::from_parts(None, payload.error.as_deref()))
    }

    fn default_policy() -> PollPolicy<Phase> {
        PollPolicy::new(PollInterval::ByState(execution_interval), 720)
    }
}
