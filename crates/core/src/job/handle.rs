// crates/core/src/job/handle.rs
//! A client-side handle on one server-side asynchronous job.

use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::spec::{
    BatchSql, BatchSqlPayload, Execution, ExecutionPayload, Export, Failure, Import,
    ImportPayload, JobSpec, SyncPayload, SyncTable,
};
use super::state::Phase;
use crate::api::{CreateParams, IdChain, ImportOptions, JobApi, JobKind};
use crate::clock::{Clock, SystemClock};
use crate::error::{JobError, TransportError};
use crate::poller::{PollPolicy, Pollable, StatePoller};

/// The collaborators every handle talks to.
#[derive(Clone)]
pub struct JobContext {
    api: Arc<dyn JobApi>,
    clock: Arc<dyn Clock>,
}

impl JobContext {
    /// Context using the wall clock.
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self {
            api,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(api: Arc<dyn JobApi>, clock: Arc<dyn Clock>) -> Self {
        Self { api, clock }
    }

    pub fn api(&self) -> &Arc<dyn JobApi> {
        &self.api
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Handle on a server-side job of kind `K`.
///
/// `state` is only ever replaced wholesale from a freshly fetched payload.
/// A handle without ids has not been submitted and cannot be polled.
pub struct JobHandle<K: JobSpec> {
    ctx: JobContext,
    params: Option<CreateParams>,
    ids: Option<IdChain>,
    state: Option<K::State>,
    payload: Option<K::Payload>,
    raw_payload: Option<Value>,
    created_at: Option<DateTime<Utc>>,
    last_refreshed_at: Option<DateTime<Utc>>,
    _kind: PhantomData<fn() -> K>,
}

/// The context holds trait objects, so only identity and observed state are
/// shown.
impl<K: JobSpec> fmt::Debug for JobHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("kind", &K::KIND)
            .field("ids", &self.ids)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("last_refreshed_at", &self.last_refreshed_at)
            .finish_non_exhaustive()
    }
}

pub type ImportJob = JobHandle<Import>;
pub type SyncJob = JobHandle<SyncTable>;
pub type ExportJob = JobHandle<Export>;
pub type BatchSqlJob = JobHandle<BatchSql>;
pub type ExecutionJob = JobHandle<Execution>;

impl<K: JobSpec> JobHandle<K> {
    fn unsubmitted(ctx: &JobContext, params: CreateParams) -> Self {
        debug_assert_eq!(params.kind(), K::KIND);
        Self {
            ctx: ctx.clone(),
            params: Some(params),
            ids: None,
            state: None,
            payload: None,
            raw_payload: None,
            created_at: None,
            last_refreshed_at: None,
            _kind: PhantomData,
        }
    }

    /// Handle on a job that already exists server-side. Call
    /// [`refresh`](Self::refresh) to load its state.
    pub fn attach(ctx: &JobContext, ids: IdChain) -> Self {
        Self {
            ctx: ctx.clone(),
            params: None,
            ids: Some(ids),
            state: None,
            payload: None,
            raw_payload: None,
            created_at: None,
            last_refreshed_at: None,
            _kind: PhantomData,
        }
    }

    pub fn kind(&self) -> JobKind {
        K::KIND
    }

    /// Innermost server id.
    pub fn id(&self) -> Option<&str> {
        self.ids.as_ref().and_then(|c| c.last()).map(String::as_str)
    }

    pub fn ids(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    pub fn state(&self) -> Option<&K::State> {
        self.state.as_ref()
    }

    pub fn payload(&self) -> Option<&K::Payload> {
        self.payload.as_ref()
    }

    /// Last full server response.
    pub fn raw_payload(&self) -> Option<&Value> {
        self.raw_payload.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.as_ref().is_some_and(K::is_terminal)
    }

    pub fn succeeded(&self) -> bool {
        self.payload.as_ref().is_some_and(K::succeeded)
    }

    /// Server-supplied error details when the job ended in failure.
    pub fn failure(&self) -> Option<Failure> {
        self.payload.as_ref().and_then(K::failure)
    }

    /// Turn a non-successful outcome into [`JobError::Failed`], carrying the
    /// last state and whatever error details the server supplied.
    pub fn ensure_succeeded(&self) -> Result<&Self, JobError> {
        if self.succeeded() {
            return Ok(self);
        }
        let Failure { code, message } = self.failure().unwrap_or_default();
        Err(JobError::Failed {
            kind: K::KIND,
            id: self.ids.as_ref().map(|ids| ids.join("/")).unwrap_or_default(),
            state: self.state.as_ref().map(ToString::to_string).unwrap_or_default(),
            code,
            message,
        })
    }

    /// Create the job server-side. The creation response provides the id and
    /// the initial state.
    pub fn submit(&mut self) -> Result<&K::State, JobError> {
        if let Some(ids) = &self.ids {
            return Err(JobError::AlreadySubmitted {
                kind: K::KIND,
                id: ids.join("/"),
            });
        }
        let params = self
            .params
            .as_ref()
            .ok_or(JobError::NotSubmitted { kind: K::KIND })?;

        let created = self.ctx.api.create(params)?;
        if created.ids.is_empty() {
            return Err(JobError::decode(K::KIND, "creation response carried no id"));
        }
        tracing::info!(kind = %K::KIND, id = %created.ids.join("/"), "job submitted");

        self.ids = Some(created.ids);
        self.created_at = Some(self.ctx.clock.now());
        self.apply(created.payload)
    }

    /// One round trip: fetch the current status and replace the state.
    pub fn refresh(&mut self) -> Result<&K::State, JobError> {
        let ids = self.require_ids()?.to_vec();
        let raw = self.ctx.api.read_status(K::KIND, &ids)?;
        self.apply(raw)
    }

    /// Block until the job reaches a terminal state (or the policy's
    /// attempt budget is exhausted).
    pub fn wait_until_terminal(&mut self, policy: &PollPolicy<K::State>) -> Result<&Self, JobError> {
        let poller = StatePoller::new(self.ctx.clock.clone());
        poller.wait_until_terminal(
            self,
            |handle: &mut Self| handle.refresh().map(|_| ()),
            K::is_terminal,
            policy,
        )?;
        Ok(&*self)
    }

    /// [`wait_until_terminal`](Self::wait_until_terminal) with this kind's
    /// default interval and attempt ceiling.
    pub fn wait(&mut self) -> Result<&Self, JobError> {
        self.wait_until_terminal(&K::default_policy())
    }

    /// Ask the server to cancel the job.
    ///
    /// The response is not applied to the handle: the next refresh observes
    /// the cancelled state. When the server rejects the cancel because the
    /// job already finished, the job is refreshed and its terminal payload
    /// returned instead of an error.
    pub fn cancel(&mut self) -> Result<Value, JobError> {
        let ids = self.require_ids()?.to_vec();
        match self.ctx.api.cancel(K::KIND, &ids) {
            Ok(confirmation) => {
                tracing::info!(kind = %K::KIND, id = %ids.join("/"), "cancel requested");
                Ok(confirmation)
            }
            Err(err @ TransportError::Client { status: 400 | 409, .. }) => {
                self.refresh()?;
                if self.is_terminal() {
                    tracing::debug!(kind = %K::KIND, id = %ids.join("/"), "cancel on finished job");
                    Ok(self.raw_payload.clone().unwrap_or(Value::Null))
                } else {
                    Err(err.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn require_ids(&self) -> Result<&[String], JobError> {
        self.ids
            .as_deref()
            .ok_or(JobError::NotSubmitted { kind: K::KIND })
    }

    fn apply(&mut self, raw: Value) -> Result<&K::State, JobError> {
        let payload: K::Payload =
            serde_json::from_value(raw.clone()).map_err(|e| JobError::decode(K::KIND, e))?;
        let state = K::state(&payload);
        self.last_refreshed_at = Some(self.ctx.clock.now());
        self.raw_payload = Some(raw);
        self.payload = Some(payload);
        Ok(&*self.state.insert(state))
    }
}

impl<K: JobSpec> Pollable for JobHandle<K> {
    type State = K::State;

    fn kind(&self) -> JobKind {
        K::KIND
    }

    fn poll_id(&self) -> Option<String> {
        self.ids.as_ref().map(|ids| ids.join("/"))
    }

    fn observed_state(&self) -> Option<&K::State> {
        self.state.as_ref()
    }
}

// -- Import -------------------------------------------------------------------

impl JobHandle<Import> {
    /// Upload a local file.
    pub fn from_file(ctx: &JobContext, path: impl Into<PathBuf>) -> Self {
        Self::unsubmitted(
            ctx,
            CreateParams::ImportFile {
                path: path.into(),
                options: ImportOptions::default(),
            },
        )
    }

    /// Let the server fetch a remote file.
    pub fn from_url(ctx: &JobContext, url: impl Into<String>) -> Self {
        Self::unsubmitted(
            ctx,
            CreateParams::ImportUrl {
                url: url.into(),
                options: ImportOptions::default(),
            },
        )
    }

    /// Replace the import options. No effect once submitted.
    pub fn with_options(mut self, new_options: ImportOptions) -> Self {
        if let Some(CreateParams::ImportFile { options, .. } | CreateParams::ImportUrl { options, .. }) =
            self.params.as_mut()
        {
            *options = new_options;
        }
        self
    }

    fn typed(&self) -> Option<&ImportPayload> {
        self.payload.as_ref()
    }

    pub fn table_name(&self) -> Option<&str> {
        self.typed().and_then(|p| p.table_name.as_deref())
    }

    pub fn table_id(&self) -> Option<&str> {
        self.typed().and_then(|p| p.table_id.as_deref())
    }

    pub fn synchronization_id(&self) -> Option<&str> {
        self.typed().and_then(|p| p.synchronization_id.as_deref())
    }
}

// -- Sync table ---------------------------------------------------------------

impl JobHandle<SyncTable> {
    pub fn from_url(ctx: &JobContext, url: impl Into<String>, interval_secs: u64) -> Self {
        Self::unsubmitted(
            ctx,
            CreateParams::SyncTable {
                url: url.into(),
                interval_secs,
                options: ImportOptions::default(),
            },
        )
    }

    /// Ask the server to run the sync now. Refresh afterwards to observe it.
    pub fn force_sync(&mut self) -> Result<(), JobError> {
        let ids = self.require_ids()?.to_vec();
        self.ctx.api.trigger(JobKind::Sync, &ids)?;
        tracing::info!(id = %ids.join("/"), "sync forced");
        Ok(())
    }

    fn typed(&self) -> Option<&SyncPayload> {
        self.payload.as_ref()
    }

    pub fn interval_secs(&self) -> Option<u64> {
        self.typed().and_then(|p| p.interval)
    }

    pub fn ran_at(&self) -> Option<DateTime<Utc>> {
        self.typed().and_then(|p| p.ran_at)
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.typed().and_then(|p| p.run_at)
    }

    pub fn retried_times(&self) -> Option<u32> {
        self.typed().and_then(|p| p.retried_times)
    }
}

// -- Export -------------------------------------------------------------------

impl JobHandle<Export> {
    pub fn for_visualization(ctx: &JobContext, visualization_id: impl Into<String>) -> Self {
        Self::unsubmitted(
            ctx,
            CreateParams::Export {
                visualization_id: visualization_id.into(),
            },
        )
    }

    /// Download URL, available once the export is complete.
    pub fn url(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.url.as_deref())
    }
}

// -- Batch SQL ----------------------------------------------------------------

impl JobHandle<BatchSql> {
    pub fn new(ctx: &JobContext, query: impl Into<String>) -> Self {
        Self::multi(ctx, vec![query.into()])
    }

    /// A job running several statements in order.
    pub fn multi(ctx: &JobContext, queries: Vec<String>) -> Self {
        Self::unsubmitted(ctx, CreateParams::BatchSql { queries })
    }

    fn typed(&self) -> Option<&BatchSqlPayload> {
        self.payload.as_ref()
    }

    pub fn failed_reason(&self) -> Option<&str> {
        self.typed().and_then(|p| p.failed_reason.as_deref())
    }

    pub fn user(&self) -> Option<&str> {
        self.typed().and_then(|p| p.user.as_deref())
    }
}

// -- Scheduled execution ------------------------------------------------------

impl JobHandle<Execution> {
    fn typed(&self) -> Option<&ExecutionPayload> {
        self.payload.as_ref()
    }

    /// `None` until the execution is dead.
    pub fn failed(&self) -> Option<bool> {
        self.typed()
            .filter(|p| p.phase == Phase::Dead)
            .map(|p| p.failed.unwrap_or(false))
    }

    pub fn output(&self) -> Option<&str> {
        self.typed().and_then(|p| p.output.as_deref())
    }
}
