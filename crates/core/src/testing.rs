// crates/core/src/testing.rs
//! Scripted in-memory `JobApi` for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::api::{CreateParams, Created, IdChain, JobApi, JobKind};
use crate::error::TransportError;

#[derive(Default)]
struct Script {
    creates: VecDeque<Created>,
    statuses: VecDeque<Result<Value, TransportError>>,
    last_status: Option<Value>,
    executions: VecDeque<Value>,
    last_executions: Option<Value>,
    cancel_error: Option<TransportError>,
    created: usize,
    reads: Vec<(JobKind, IdChain)>,
    cancels: usize,
    execution_lists: usize,
    triggers: usize,
}

/// Replays queued responses and counts round trips.
///
/// Status and execution queues are sticky: once drained, the last value is
/// returned again, like a server whose job stopped changing.
#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<Script>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(&self, ids: IdChain, payload: Value) {
        self.script.lock().unwrap().creates.push_back(Created { ids, payload });
    }

    pub fn push_status(&self, payload: Value) {
        self.script.lock().unwrap().statuses.push_back(Ok(payload));
    }

    pub fn push_status_error(&self, err: TransportError) {
        self.script.lock().unwrap().statuses.push_back(Err(err));
    }

    pub fn push_executions(&self, list: Value) {
        self.script.lock().unwrap().executions.push_back(list);
    }

    pub fn fail_cancel(&self, err: TransportError) {
        self.script.lock().unwrap().cancel_error = Some(err);
    }

    pub fn created(&self) -> usize {
        self.script.lock().unwrap().created
    }

    pub fn reads(&self) -> usize {
        self.script.lock().unwrap().reads.len()
    }

    pub fn read_log(&self) -> Vec<(JobKind, IdChain)> {
        self.script.lock().unwrap().reads.clone()
    }

    pub fn cancels(&self) -> usize {
        self.script.lock().unwrap().cancels
    }

    pub fn execution_lists(&self) -> usize {
        self.script.lock().unwrap().execution_lists
    }

    pub fn triggers(&self) -> usize {
        self.script.lock().unwrap().triggers
    }
}

impl JobApi for ScriptedApi {
    fn create(&self, params: &CreateParams) -> Result<Created, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.created += 1;
        script.creates.pop_front().ok_or(TransportError::Unsupported {
            kind: params.kind(),
            operation: "unscripted create".into(),
        })
    }

    fn read_status(&self, kind: JobKind, ids: &[String]) -> Result<Value, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.reads.push((kind, ids.to_vec()));
        match script.statuses.pop_front() {
            Some(Ok(value)) => {
                script.last_status = Some(value.clone());
                Ok(value)
            }
            Some(Err(err)) => Err(err),
            None => script.last_status.clone().ok_or(TransportError::NotFound {
                message: "unscripted status".into(),
            }),
        }
    }

    fn cancel(&self, _kind: JobKind, _ids: &[String]) -> Result<Value, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.cancels += 1;
        match script.cancel_error.take() {
            Some(err) => Err(err),
            None => Ok(json!({})),
        }
    }

    fn list_executions(&self, _ids: &[String]) -> Result<Value, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.execution_lists += 1;
        match script.executions.pop_front() {
            Some(list) => {
                script.last_executions = Some(list.clone());
                Ok(list)
            }
            None => Ok(script.last_executions.clone().unwrap_or_else(|| json!([]))),
        }
    }

    fn trigger(&self, _kind: JobKind, _ids: &[String]) -> Result<Value, TransportError> {
        self.script.lock().unwrap().triggers += 1;
        Ok(json!({}))
    }
}
