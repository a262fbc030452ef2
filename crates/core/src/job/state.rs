// crates/core/src/job/state.rs
//! Server-reported state vocabularies, one enum per job kind.
//!
//! States are stored verbatim from the decoded response. Strings this client
//! does not know decode to `Unrecognized` instead of failing, and are never
//! treated as terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! server_state {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// A state string this client does not know, kept verbatim.
            Unrecognized(String),
        }

        impl $name {
            /// The raw string the server uses for this state.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $text, )+
                    Self::Unrecognized(raw) => raw,
                }
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                match raw.as_str() {
                    $( $text => Self::$variant, )+
                    _ => Self::Unrecognized(raw),
                }
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::from(raw.to_string())
            }
        }

        impl From<$name> for String {
            fn from(state: $name) -> String {
                state.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

server_state! {
    /// Import and sync-table job states.
    pub enum ImportState {
        Enqueued => "enqueued",
        Pending => "pending",
        Uploading => "uploading",
        Unpacking => "unpacking",
        Importing => "importing",
        Guessing => "guessing",
        Complete => "complete",
        Failure => "failure",
        /// Sync tables only: registered, first run not started yet.
        Created => "created",
        /// Sync tables only: waiting for the next sync slot.
        Queued => "queued",
        /// Sync tables only: a sync run is in progress.
        Syncing => "syncing",
        /// Sync tables only: the last sync run finished cleanly.
        Success => "success",
    }
}

server_state! {
    /// Visualization export states.
    pub enum ExportState {
        Enqueued => "enqueued",
        Pending => "pending",
        Exporting => "exporting",
        Complete => "complete",
        Failure => "failure",
    }
}

server_state! {
    /// Batch SQL job statuses.
    pub enum BatchSqlStatus {
        Pending => "pending",
        Running => "running",
        Done => "done",
        Failed => "failed",
        Cancelled => "cancelled",
        /// The server lost track of the job. Terminal.
        Unknown => "unknown",
    }
}

server_state! {
    /// Lifecycle phase of a schedule or of one of its executions.
    pub enum Phase {
        Pending => "pending",
        Running => "running",
        Dead => "dead",
    }
}

impl Default for ImportState {
    /// Creation responses for imports carry no state; the job is queued.
    fn default() -> Self {
        Self::Enqueued
    }
}

impl Default for ExportState {
    fn default() -> Self {
        Self::Pending
    }
}

impl Default for BatchSqlStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Pending
    }
}

impl ImportState {
    /// Terminal for a one-off import.
    pub fn is_import_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failure)
    }

    /// Terminal from the point of view of waiting on a sync-table creation.
    ///
    /// `created` counts: the table exists and awaits its first run, which may
    /// be hours away. The sync job itself keeps recurring server-side.
    pub fn is_sync_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Failure | Self::Success | Self::Created
        )
    }
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failure)
    }
}

impl BatchSqlStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Cancelled | Self::Unknown
        )
    }
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_states_round_trip_verbatim() {
        let state: BatchSqlStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(state, BatchSqlStatus::Cancelled);
        assert_eq!(serde_json::to_string(&state).unwrap(), "\"cancelled\"");
    }

    #[test]
    fn test_unrecognized_state_is_kept_and_not_terminal() {
        let state: ExportState = serde_json::from_str("\"rendering\"").unwrap();
        assert_eq!(state, ExportState::Unrecognized("rendering".into()));
        assert_eq!(state.to_string(), "rendering");
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_batch_sql_terminal_set() {
        for s in ["done", "failed", "cancelled", "unknown"] {
            assert!(BatchSqlStatus::from(s).is_terminal(), "{s} should be terminal");
        }
        for s in ["pending", "running"] {
            assert!(!BatchSqlStatus::from(s).is_terminal(), "{s} should not be terminal");
        }
    }

    #[test]
    fn test_import_vs_sync_terminal_sets() {
        assert!(ImportState::Complete.is_import_terminal());
        assert!(ImportState::Failure.is_import_terminal());
        assert!(!ImportState::Created.is_import_terminal());
        assert!(!ImportState::Importing.is_import_terminal());

        assert!(ImportState::Created.is_sync_terminal());
        assert!(ImportState::Failure.is_sync_terminal());
        assert!(!ImportState::Syncing.is_sync_terminal());
        assert!(!ImportState::Guessing.is_sync_terminal());
    }

    #[test]
    fn test_phase_terminal() {
        assert!(Phase::Dead.is_terminal());
        assert!(!Phase::Running.is_terminal());
        assert!(!Phase::Pending.is_terminal());
    }
}
