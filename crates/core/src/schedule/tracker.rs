// crates/core/src/schedule/tracker.rs
//! Rate-limited tracking of one schedule and its executions.
//!
//! Unlike [`StatePoller`](crate::poller::StatePoller), which refreshes on
//! every attempt, [`ScheduleTracker::refresh`] enforces a minimum time
//! between round trips so redraw loops cannot hammer the server.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{
    ExecutionRecord, Recurrence, ScheduleFingerprint, ScheduleRecord, ScheduleSummary,
};
use super::view::ScheduleView;
use crate::api::{CreateParams, IdChain, JobKind};
use crate::clock::elapsed_between;
use crate::display::Palette;
use crate::error::{JobError, TokenError, TransportError};
use crate::job::{ExecutionJob, ExecutionPayload, JobContext, Phase};
use crate::tokens::SessionTokenRegistry;

/// Pause between `follow` iterations when no minimum update time is set.
const FOLLOW_FLOOR: Duration = Duration::from_secs(1);

/// What `refresh` does when called inside the minimum update window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Block until the window has elapsed, then refresh.
    #[default]
    AutoSleep,
    /// Return `false` without a round trip.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub minimum_update_time: Duration,
    pub policy: RefreshPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            minimum_update_time: Duration::from_secs(1),
            policy: RefreshPolicy::AutoSleep,
        }
    }
}

/// Selection for [`ScheduleTracker::last_outputs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionFilter {
    #[default]
    All,
    Succeeded,
    Failed,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &ExecutionRecord) -> bool {
        match self {
            Self::All => true,
            Self::Succeeded => execution.failed() == Some(false),
            Self::Failed => execution.failed() == Some(true),
        }
    }
}

/// What a session token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenTarget {
    Job {
        job_id: String,
    },
    Schedule {
        job_id: String,
        schedule_id: String,
    },
    Execution {
        job_id: String,
        schedule_id: String,
        execution_id: String,
    },
}

impl TokenTarget {
    pub fn from_chain(chain: &[String]) -> Option<Self> {
        match chain {
            [job] => Some(Self::Job {
                job_id: job.clone(),
            }),
            [job, schedule] => Some(Self::Schedule {
                job_id: job.clone(),
                schedule_id: schedule.clone(),
            }),
            [job, schedule, execution] => Some(Self::Execution {
                job_id: job.clone(),
                schedule_id: schedule.clone(),
                execution_id: execution.clone(),
            }),
            _ => None,
        }
    }

    pub fn ids(&self) -> IdChain {
        match self {
            Self::Job { job_id } => vec![job_id.clone()],
            Self::Schedule {
                job_id,
                schedule_id,
            } => vec![job_id.clone(), schedule_id.clone()],
            Self::Execution {
                job_id,
                schedule_id,
                execution_id,
            } => vec![job_id.clone(), schedule_id.clone(), execution_id.clone()],
        }
    }
}

impl fmt::Display for TokenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ids().join("/"))
    }
}

/// Everything schedule tracking needs, passed explicitly.
#[derive(Clone)]
pub struct ScheduleContext {
    jobs: JobContext,
    config: TrackerConfig,
    palette: Palette,
    tokens: Option<Arc<Mutex<SessionTokenRegistry>>>,
}

impl ScheduleContext {
    pub fn new(jobs: JobContext) -> Self {
        Self {
            jobs,
            config: TrackerConfig::default(),
            palette: Palette::default(),
            tokens: None,
        }
    }

    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = palette;
        self
    }

    pub fn with_tokens(mut self, registry: Arc<Mutex<SessionTokenRegistry>>) -> Self {
        self.tokens = Some(registry);
        self
    }

    pub fn jobs(&self) -> &JobContext {
        &self.jobs
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    /// Create a scheduled analysis job and start tracking its schedule.
    pub fn create_schedule(
        &self,
        job_name: &str,
        recurrence: Recurrence,
        definition: Value,
    ) -> Result<ScheduleTracker, JobError> {
        let params = CreateParams::Schedule {
            job_name: job_name.to_string(),
            recurrence,
            definition,
        };
        let created = self.jobs.api().create(&params)?;
        if created.ids.len() != 2 {
            return Err(JobError::decode(
                JobKind::Schedule,
                format!("expected [job, schedule] ids, got {} ids", created.ids.len()),
            ));
        }

        let mut tracker = ScheduleTracker::new(self.clone(), created.ids, Some(job_name.to_string()));
        tracker.observe(created.payload)?;
        tracker.token = self.mint(job_name, &tracker.ids)?;
        tracing::info!(
            job = %tracker.ids[0],
            schedule = %tracker.ids[1],
            token = tracker.token.as_deref().unwrap_or("-"),
            "schedule created"
        );
        Ok(tracker)
    }

    /// Track an existing schedule. Nothing is fetched until the first refresh.
    pub fn open(&self, job_id: impl Into<String>, schedule_id: impl Into<String>) -> ScheduleTracker {
        let ids = vec![job_id.into(), schedule_id.into()];
        let mut tracker = ScheduleTracker::new(self.clone(), ids, None);
        tracker.token = self.known_token(&tracker.ids[1]);
        tracker
    }

    /// Resolve a session token through the attached registry.
    pub fn by_token(&self, token: &str) -> Result<TokenTarget, JobError> {
        let Some(tokens) = &self.tokens else {
            return Err(JobError::UnknownToken(token.to_string()));
        };
        let registry = tokens.lock().map_err(|_| TokenError::Poisoned)?;
        registry
            .ids_for(token)
            .and_then(TokenTarget::from_chain)
            .ok_or_else(|| JobError::UnknownToken(token.to_string()))
    }

    /// Tracker for a schedule target, or for the schedule owning an
    /// execution target.
    pub fn tracker_for(&self, target: &TokenTarget) -> Result<ScheduleTracker, JobError> {
        match target {
            TokenTarget::Schedule {
                job_id,
                schedule_id,
            }
            | TokenTarget::Execution {
                job_id,
                schedule_id,
                ..
            } => Ok(self.open(job_id.clone(), schedule_id.clone())),
            TokenTarget::Job { .. } => Err(JobError::WrongTarget(target.to_string(), "schedule")),
        }
    }

    pub fn execution_job(&self, target: &TokenTarget) -> Result<ExecutionJob, JobError> {
        match target {
            TokenTarget::Execution { .. } => Ok(ExecutionJob::attach(&self.jobs, target.ids())),
            _ => Err(JobError::WrongTarget(target.to_string(), "execution")),
        }
    }

    /// Mint tokens for every prefix of `chain`, returning the innermost one.
    fn mint(&self, name: &str, chain: &[String]) -> Result<Option<String>, JobError> {
        let Some(tokens) = &self.tokens else {
            return Ok(None);
        };
        let mut registry = tokens.lock().map_err(|_| TokenError::Poisoned)?;
        let mut token = None;
        for depth in 1..=chain.len() {
            token = Some(registry.token_for(name, &chain[..depth])?);
        }
        Ok(token)
    }

    fn known_token(&self, id: &str) -> Option<String> {
        let registry = self.tokens.as_ref()?.lock().ok()?;
        registry.token_of(id).map(str::to_string)
    }
}

/// Client-side view of one schedule.
///
/// Provides:
/// - rate-limited `refresh` with change detection on a semantic fingerprint
/// - lazily fetched executions, sorted ascending by allocation time
/// - `follow` for interactive monitoring until the schedule is dead
pub struct ScheduleTracker {
    ctx: ScheduleContext,
    /// `[job, schedule]`
    ids: IdChain,
    job_name: Option<String>,
    token: Option<String>,
    record: Option<ScheduleRecord>,
    fingerprint: Option<ScheduleFingerprint>,
    /// Bumped on every observed change.
    revision: u64,
    executions: Vec<ExecutionRecord>,
    executions_stale: bool,
    last_refreshed_at: Option<DateTime<Utc>>,
}

impl ScheduleTracker {
    fn new(ctx: ScheduleContext, ids: IdChain, job_name: Option<String>) -> Self {
        Self {
            ctx,
            ids,
            job_name,
            token: None,
            record: None,
            fingerprint: None,
            revision: 0,
            executions: Vec::new(),
            executions_stale: true,
            last_refreshed_at: None,
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn record(&self) -> Option<&ScheduleRecord> {
        self.record.as_ref()
    }

    pub fn status(&self) -> Option<&Phase> {
        self.record.as_ref().map(|r| &r.status)
    }

    pub fn summary(&self) -> Option<&ScheduleSummary> {
        self.record.as_ref().map(|r| &r.summary)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.record.as_ref().is_some_and(ScheduleRecord::is_terminal)
    }

    /// Time left in the current minimum-update window.
    pub fn time_until_next_refresh(&self) -> Duration {
        let Some(last) = self.last_refreshed_at else {
            return Duration::ZERO;
        };
        let elapsed = elapsed_between(last, self.ctx.jobs.clock().now());
        self.ctx.config.minimum_update_time.saturating_sub(elapsed)
    }

    /// Refresh the schedule, at most once per minimum update window.
    ///
    /// Inside the window, blocks until it elapses (`AutoSleep`) or returns
    /// `Ok(false)` without a round trip (`Skip`). Returns `Ok(true)` when a
    /// round trip was made, whether or not anything changed.
    pub fn refresh(&mut self) -> Result<bool, JobError> {
        let remaining = self.time_until_next_refresh();
        if !remaining.is_zero() {
            match self.ctx.config.policy {
                RefreshPolicy::Skip => {
                    tracing::debug!(
                        schedule = %self.ids[1],
                        remaining_ms = remaining.as_millis() as u64,
                        "refresh skipped inside minimum update window"
                    );
                    return Ok(false);
                }
                RefreshPolicy::AutoSleep => self.ctx.jobs.clock().sleep(remaining),
            }
        }
        self.fetch()?;
        Ok(true)
    }

    /// Executions sorted ascending by allocation time, re-fetched only after
    /// a refresh observed a change.
    pub fn executions(&mut self) -> Result<&[ExecutionRecord], JobError> {
        if self.executions_stale {
            self.fetch_executions()?;
        }
        Ok(&self.executions)
    }

    /// The `n` most recently finished executions matching `filter`, newest
    /// first.
    pub fn last_outputs(
        &mut self,
        n: usize,
        filter: ExecutionFilter,
    ) -> Result<Vec<&ExecutionRecord>, JobError> {
        let mut selected: Vec<&ExecutionRecord> = self
            .executions()?
            .iter()
            .filter(|e| e.finish_time().is_some() && filter.matches(e))
            .collect();
        selected.sort_by(|a, b| b.finish_time().cmp(&a.finish_time()));
        selected.truncate(n);
        Ok(selected)
    }

    /// Handle for polling one execution of this schedule.
    pub fn execution_handle(&self, execution_id: impl Into<String>) -> ExecutionJob {
        let mut ids = self.ids.clone();
        ids.push(execution_id.into());
        ExecutionJob::attach(self.ctx.jobs(), ids)
    }

    /// Stop the schedule. The next refresh observes the dead phase.
    ///
    /// Stopping an already dead schedule returns its current payload.
    pub fn stop(&mut self) -> Result<Value, JobError> {
        match self.ctx.jobs.api().cancel(JobKind::Schedule, &self.ids) {
            Ok(confirmation) => {
                tracing::info!(job = %self.ids[0], schedule = %self.ids[1], "schedule stop requested");
                Ok(confirmation)
            }
            Err(err @ TransportError::Client { status: 400 | 409, .. }) => {
                self.fetch()?;
                match &self.record {
                    Some(record) if record.is_terminal() => Ok(record.raw.clone()),
                    _ => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Refresh and render until the schedule is dead. No timeout: callers
    /// needing a bound must drive `refresh` themselves.
    pub fn follow<W: Write>(&mut self, out: &mut W) -> Result<(), JobError> {
        let clock = self.ctx.jobs.clock().clone();
        let mut rendered: Option<u64> = None;
        loop {
            if !self.refresh()? {
                clock.sleep(self.time_until_next_refresh());
                continue;
            }
            if rendered != Some(self.revision) {
                self.render(&mut *out)?;
                rendered = Some(self.revision);
            }
            if self.is_terminal() {
                return Ok(());
            }
            if self.ctx.config.minimum_update_time.is_zero() {
                clock.sleep(FOLLOW_FLOOR);
            }
        }
    }

    /// Write the current schedule and executions once.
    pub fn render(&mut self, out: &mut dyn Write) -> Result<(), JobError> {
        self.executions()?;
        let Some(record) = &self.record else {
            return Ok(());
        };
        ScheduleView {
            record,
            executions: &self.executions,
            token: self.token.as_deref(),
            palette: self.ctx.palette,
        }
        .render(out)?;
        out.flush()?;
        Ok(())
    }

    fn fetch(&mut self) -> Result<bool, JobError> {
        let raw = self.ctx.jobs.api().read_status(JobKind::Schedule, &self.ids)?;
        self.observe(raw)
    }

    /// Apply a fetched payload. State only changes when the fingerprint does;
    /// the rate-limit window advances either way.
    fn observe(&mut self, raw: Value) -> Result<bool, JobError> {
        let record = ScheduleRecord::from_value(raw, &self.ids)?;
        let fingerprint = record.fingerprint();
        self.last_refreshed_at = Some(self.ctx.jobs.clock().now());

        let changed = self.fingerprint.as_ref() != Some(&fingerprint);
        if changed {
            tracing::debug!(
                schedule = %self.ids[1],
                status = %record.status,
                revision = self.revision + 1,
                "schedule changed"
            );
            if self.job_name.is_none() {
                self.job_name = record.job_name.clone();
            }
            self.record = Some(record);
            self.fingerprint = Some(fingerprint);
            self.revision += 1;
            self.executions_stale = true;
        }
        Ok(changed)
    }

    fn fetch_executions(&mut self) -> Result<(), JobError> {
        let raw = self.ctx.jobs.api().list_executions(&self.ids)?;
        let items = match raw {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            Value::Object(mut obj) => match obj.remove("executions") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(JobError::decode(
                        JobKind::ScheduledExecution,
                        "execution listing has no executions array",
                    ))
                }
            },
            other => {
                return Err(JobError::decode(
                    JobKind::ScheduledExecution,
                    format!("unexpected execution listing: {other}"),
                ))
            }
        };

        let (job_id, schedule_id) = (&self.ids[0], &self.ids[1]);
        let mut records = items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<ExecutionPayload>(item)
                    .map(|payload| ExecutionRecord::from_payload(job_id, schedule_id, payload))
                    .map_err(|e| JobError::decode(JobKind::ScheduledExecution, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        // Server order is not guaranteed; unallocated executions go last.
        records.sort_by_key(|r| (r.allocation_time.is_none(), r.allocation_time));

        let name = self.job_name.clone().unwrap_or_default();
        for record in &mut records {
            record.token = self.ctx.mint(&name, &record.ids())?;
        }
        if self.token.is_none() {
            // Minting an execution also mints its schedule.
            self.token = self.ctx.known_token(&self.ids[1]);
        }
        tracing::debug!(schedule = %self.ids[1], count = records.len(), "executions fetched");

        self.executions = records;
        self.executions_stale = false;
        Ok(())
    }
}
