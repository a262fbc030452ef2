// crates/core/src/api.rs
//! The collaborator interface the job core drives.
//!
//! A [`JobApi`] turns one logical operation into exactly one signed HTTP
//! round trip. Implementations live outside the core (see `geoapi-client`);
//! the core only sees decoded JSON and typed [`TransportError`]s.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::schedule::Recurrence;

/// Which server-side resource family an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Import,
    Sync,
    Export,
    BatchSql,
    /// A schedule record of the analysis service (not itself a job handle).
    Schedule,
    ScheduledExecution,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Sync => "sync",
            Self::Export => "export",
            Self::BatchSql => "batch-sql",
            Self::Schedule => "schedule",
            Self::ScheduledExecution => "scheduled-execution",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server ids from outermost to innermost: `[job]`, `[job, schedule]` or
/// `[job, schedule, execution]`.
pub type IdChain = Vec<String>;

/// Options shared by file, URL and sync-table imports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// `public`, `link` or `private`; server default when absent.
    pub privacy: Option<String>,
    pub create_visualization: bool,
}

/// Everything needed to create a job server-side.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateParams {
    ImportFile {
        path: PathBuf,
        options: ImportOptions,
    },
    ImportUrl {
        url: String,
        options: ImportOptions,
    },
    SyncTable {
        url: String,
        interval_secs: u64,
        options: ImportOptions,
    },
    Export {
        visualization_id: String,
    },
    BatchSql {
        queries: Vec<String>,
    },
    Schedule {
        job_name: String,
        recurrence: Recurrence,
        definition: serde_json::Value,
    },
}

impl CreateParams {
    /// The resource family these parameters create.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::ImportFile { .. } | Self::ImportUrl { .. } => JobKind::Import,
            Self::SyncTable { .. } => JobKind::Sync,
            Self::Export { .. } => JobKind::Export,
            Self::BatchSql { .. } => JobKind::BatchSql,
            Self::Schedule { .. } => JobKind::Schedule,
        }
    }
}

/// Result of a creation call: the server-assigned ids and the raw response.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub ids: IdChain,
    pub payload: serde_json::Value,
}

/// One HTTP round trip per call. Errors are already typed.
///
/// `cancel` must be idempotent on the server side: cancelling a finished job
/// either no-ops or reports the existing terminal state.
pub trait JobApi: Send + Sync {
    fn create(&self, params: &CreateParams) -> Result<Created, TransportError>;

    fn read_status(&self, kind: JobKind, ids: &[String]) -> Result<serde_json::Value, TransportError>;

    fn cancel(&self, kind: JobKind, ids: &[String]) -> Result<serde_json::Value, TransportError>;

    /// All executions of the schedule `[job, schedule]`, in server order.
    fn list_executions(&self, ids: &[String]) -> Result<serde_json::Value, TransportError>;

    /// Ask the server to run a recurring job now (sync tables).
    fn trigger(&self, kind: JobKind, ids: &[String]) -> Result<serde_json::Value, TransportError> {
        let _ = ids;
        Err(TransportError::Unsupported {
            kind,
            operation: "trigger".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_labels() {
        assert_eq!(JobKind::BatchSql.to_string(), "batch-sql");
        assert_eq!(JobKind::ScheduledExecution.as_str(), "scheduled-execution");
        let json = serde_json::to_string(&JobKind::BatchSql).unwrap();
        assert_eq!(json, "\"batch-sql\"");
    }

    #[test]
    fn test_create_params_kind() {
        let params = CreateParams::SyncTable {
            url: "https://example.com/data.csv".into(),
            interval_secs: 3600,
            options: ImportOptions::default(),
        };
        assert_eq!(params.kind(), JobKind::Sync);
        let params = CreateParams::BatchSql {
            queries: vec!["SELECT 1".into()],
        };
        assert_eq!(params.kind(), JobKind::BatchSql);
    }
}
