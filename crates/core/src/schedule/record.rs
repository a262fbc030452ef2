// crates/core/src/schedule/record.rs
//! Decoded schedule and execution records of the analysis service.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{IdChain, JobKind};
use crate::error::JobError;
use crate::job::spec::{de_id, de_opt_code};
use crate::job::{ExecutionPayload, Phase};

/// When a schedule runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// Cron-like interval, e.g. `0 * * * *`.
    Periodic(String),
    /// Re-run whenever the referenced table changes.
    Triggered(String),
    /// Run once, now.
    OneShot,
}

impl Recurrence {
    /// Classify from the raw `interval` / `trigger` fields. An interval wins
    /// over a trigger; blank strings count as absent.
    pub fn from_fields(interval: Option<&str>, trigger: Option<&str>) -> Self {
        let present = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        match (present(interval), present(trigger)) {
            (Some(interval), _) => Self::Periodic(interval),
            (None, Some(trigger)) => Self::Triggered(trigger),
            (None, None) => Self::OneShot,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::OneShot)
    }

    pub fn interval(&self) -> Option<&str> {
        match self {
            Self::Periodic(interval) => Some(interval),
            _ => None,
        }
    }

    pub fn trigger(&self) -> Option<&str> {
        match self {
            Self::Triggered(table) => Some(table),
            _ => None,
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Periodic(interval) => write!(f, "every '{interval}'"),
            Self::Triggered(table) => write!(f, "on change of {table}"),
            Self::OneShot => f.write_str("once"),
        }
    }
}

/// Child-process counts reported by periodic and triggered schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct ChildCounts {
    pub pending: u32,
    pub running: u32,
    pub dead: u32,
    pub failed: u32,
}

/// Task breakdown reported by one-shot jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskCounts {
    pub completed: u32,
    pub starting: u32,
    pub failed: u32,
    pub lost: u32,
    pub queued: u32,
    pub running: u32,
}

/// Which summary fields are meaningful depends on the recurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleSummary {
    Periodic { interval: String, children: ChildCounts },
    Triggered { table: String, children: ChildCounts },
    OneShot(TaskCounts),
}

#[derive(Debug, Deserialize)]
struct SchedulePayload {
    #[serde(alias = "id", deserialize_with = "de_id")]
    schedule_id: String,
    #[serde(default, deserialize_with = "de_opt_code")]
    job_id: Option<String>,
    #[serde(default, alias = "name")]
    job_name: Option<String>,
    #[serde(default, alias = "phase")]
    status: Phase,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default, alias = "trigger_table")]
    trigger: Option<String>,
    #[serde(default)]
    children: ChildCounts,
    #[serde(default)]
    tasks: TaskCounts,
}

/// One schedule of a scheduled analysis job.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRecord {
    pub schedule_id: String,
    pub job_id: String,
    pub job_name: Option<String>,
    pub status: Phase,
    pub recurrence: Recurrence,
    pub summary: ScheduleSummary,
    pub raw: Value,
}

/// The part of a schedule payload that counts as a change. Timestamps and
/// other volatile fields are left out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleFingerprint {
    status: String,
    summary: ScheduleSummary,
}

impl ScheduleRecord {
    /// Decode a schedule payload. `ids` is `[job, schedule]` and supplies the
    /// job id when the payload omits it.
    pub fn from_value(raw: Value, ids: &[String]) -> Result<Self, JobError> {
        let payload: SchedulePayload =
            serde_json::from_value(raw.clone()).map_err(|e| JobError::decode(JobKind::Schedule, e))?;
        let job_id = payload
            .job_id
            .or_else(|| ids.first().cloned())
            .ok_or_else(|| JobError::decode(JobKind::Schedule, "payload carries no job id"))?;
        let recurrence = Recurrence::from_fields(payload.interval.as_deref(), payload.trigger.as_deref());
        let summary = match &recurrence {
            Recurrence::Periodic(interval) => ScheduleSummary::Periodic {
                interval: interval.clone(),
                children: payload.children,
            },
            Recurrence::Triggered(table) => ScheduleSummary::Triggered {
                table: table.clone(),
                children: payload.children,
            },
            Recurrence::OneShot => ScheduleSummary::OneShot(payload.tasks),
        };
        Ok(Self {
            schedule_id: payload.schedule_id,
            job_id,
            job_name: payload.job_name,
            status: payload.status,
            recurrence,
            summary,
            raw,
        })
    }

    pub fn ids(&self) -> IdChain {
        vec![self.job_id.clone(), self.schedule_id.clone()]
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn fingerprint(&self) -> ScheduleFingerprint {
        ScheduleFingerprint {
            status: self.status.as_str().to_string(),
            summary: self.summary.clone(),
        }
    }
}

/// One run of a schedule, as listed under it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_id: String,
    pub schedule_id: String,
    pub phase: Phase,
    failed: Option<bool>,
    pub allocation_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Session token, when a registry is attached.
    pub token: Option<String>,
}

impl ExecutionRecord {
    /// Build from a listed payload, dropping fields the phase has not reached
    /// yet: no start time while pending, no finish time or failure flag
    /// before dead.
    pub fn from_payload(job_id: &str, schedule_id: &str, payload: ExecutionPayload) -> Self {
        let dead = payload.phase == Phase::Dead;
        let started = matches!(payload.phase, Phase::Running | Phase::Dead);
        Self {
            execution_id: payload.execution_id,
            job_id: job_id.to_string(),
            schedule_id: schedule_id.to_string(),
            failed: dead.then(|| payload.failed.unwrap_or(false)),
            allocation_time: payload.allocation_time,
            start_time: payload.start_time.filter(|_| started),
            finish_time: payload.finish_time.filter(|_| dead),
            output: payload.output,
            error: payload.error,
            phase: payload.phase,
            token: None,
        }
    }

    pub fn ids(&self) -> IdChain {
        vec![
            self.job_id.clone(),
            self.schedule_id.clone(),
            self.execution_id.clone(),
        ]
    }

    /// `None` until the execution is dead.
    pub fn failed(&self) -> Option<bool> {
        self.failed
    }

    pub fn succeeded(&self) -> bool {
        self.failed == Some(false)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.finish_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ids() -> IdChain {
        vec!["j1".into(), "s1".into()]
    }

    #[test]
    fn test_three_way_recurrence() {
        assert_eq!(
            Recurrence::from_fields(Some("0 * * * *"), Some("t")),
            Recurrence::Periodic("0 * * * *".into())
        );
        assert_eq!(
            Recurrence::from_fields(Some(" "), Some("public.roads")),
            Recurrence::Triggered("public.roads".into())
        );
        assert_eq!(Recurrence::from_fields(None, None), Recurrence::OneShot);
        assert!(!Recurrence::OneShot.is_recurring());
    }

    #[test]
    fn test_periodic_schedule_reports_children() {
        let record = ScheduleRecord::from_value(
            json!({
                "schedule_id": "s1",
                "status": "running",
                "interval": "0 * * * *",
                "children": {"pending": 1, "running": 2, "dead": 7, "failed": 1},
                "tasks": {"completed": 99}
            }),
            &ids(),
        )
        .unwrap();
        assert_eq!(record.job_id, "j1");
        assert_eq!(
            record.summary,
            ScheduleSummary::Periodic {
                interval: "0 * * * *".into(),
                children: ChildCounts {
                    pending: 1,
                    running: 2,
                    dead: 7,
                    failed: 1
                },
            }
        );
    }

    #[test]
    fn test_one_shot_schedule_reports_tasks() {
        let record = ScheduleRecord::from_value(
            json!({"id": "s1", "job_id": "j9", "status": "dead", "tasks": {"completed": 3, "lost": 1}}),
            &ids(),
        )
        .unwrap();
        assert_eq!(record.job_id, "j9");
        assert!(record.is_terminal());
        assert_eq!(
            record.summary,
            ScheduleSummary::OneShot(TaskCounts {
                completed: 3,
                lost: 1,
                ..TaskCounts::default()
            })
        );
    }

    #[test]
    fn test_numeric_ids_decode_as_strings() {
        let record = ScheduleRecord::from_value(
            json!({"job_id": 1, "schedule_id": 2, "status": "pending"}),
            &[],
        )
        .unwrap();
        assert_eq!(record.ids(), vec!["1".to_string(), "2".to_string()]);

        let payload: ExecutionPayload =
            serde_json::from_value(json!({"id": 7, "status": "running"})).unwrap();
        assert_eq!(payload.execution_id, "7");

        let err = ScheduleRecord::from_value(json!({"schedule_id": true}), &ids()).unwrap_err();
        assert!(err.to_string().contains("string or numeric id"));
    }

    #[test]
    fn test_fingerprint_ignores_volatile_fields() {
        let a = ScheduleRecord::from_value(
            json!({"schedule_id": "s1", "status": "running", "server_time": "2024-01-01T00:00:00Z"}),
            &ids(),
        )
        .unwrap();
        let b = ScheduleRecord::from_value(
            json!({"schedule_id": "s1", "status": "running", "server_time": "2024-01-01T00:00:05Z"}),
            &ids(),
        )
        .unwrap();
        let c = ScheduleRecord::from_value(json!({"schedule_id": "s1", "status": "dead"}), &ids()).unwrap();
        assert_ne!(a.raw, b.raw);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_execution_hides_fields_not_reached() {
        let payload: ExecutionPayload = serde_json::from_value(json!({
            "id": "e1",
            "status": "running",
            "failed": true,
            "allocation_time": "2024-01-01T00:00:00Z",
            "start_time": "2024-01-01T00:00:01Z",
            "finish_time": "2024-01-01T00:00:09Z"
        }))
        .unwrap();
        let record = ExecutionRecord::from_payload("j1", "s1", payload);
        assert_eq!(record.failed(), None);
        assert!(record.start_time().is_some());
        assert_eq!(record.finish_time(), None);
        assert_eq!(record.ids(), vec!["j1", "s1", "e1"]);
    }

    #[test]
    fn test_dead_execution_defaults_to_not_failed() {
        let payload: ExecutionPayload =
            serde_json::from_value(json!({"execution_id": "e2", "phase": "dead"})).unwrap();
        let record = ExecutionRecord::from_payload("j1", "s1", payload);
        assert_eq!(record.failed(), Some(false));
        assert!(record.succeeded());
    }
}
