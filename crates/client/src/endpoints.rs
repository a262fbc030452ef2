// crates/client/src/endpoints.rs
//! `JobApi` over the platform's REST endpoints.
//!
//! | kind                | create                         | status / cancel                                  |
//! |---------------------|--------------------------------|--------------------------------------------------|
//! | import              | `POST /api/v1/imports`         | `GET /api/v1/imports/{id}`                       |
//! | sync                | `POST /api/v1/synchronizations`| `GET`, `DELETE /api/v1/synchronizations/{id}`    |
//! | export              | `POST /api/v3/visualization_exports` | `GET .../visualization_exports/{id}`       |
//! | batch-sql           | `POST /api/v2/sql/job`         | `GET`, `DELETE /api/v2/sql/job/{id}`             |
//! | schedule            | `POST /api/v4/analysis/jobs`   | `GET`, `DELETE .../jobs/{job}/schedules/{sched}` |
//! | scheduled-execution | -                              | `GET .../schedules/{sched}/executions/{exec}`    |

use geoapi_core::{CreateParams, Created, ImportOptions, JobApi, JobKind, Recurrence, TransportError};
use reqwest::blocking::multipart::Form;
use serde_json::{json, Map, Value};

use crate::config::ClientConfig;
use crate::http::HttpTransport;

const IMPORTS: &str = "/api/v1/imports";
const SYNCHRONIZATIONS: &str = "/api/v1/synchronizations";
const EXPORTS: &str = "/api/v3/visualization_exports";
const BATCH_SQL: &str = "/api/v2/sql/job";
const ANALYSIS_JOBS: &str = "/api/v4/analysis/jobs";

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: HttpTransport,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        Ok(Self::from_transport(HttpTransport::new(config)?))
    }

    pub fn from_transport(http: HttpTransport) -> Self {
        Self { http }
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.http
    }

    fn create_import_file(
        &self,
        path: &std::path::Path,
        options: &ImportOptions,
    ) -> Result<Created, TransportError> {
        let mut form = Form::new().file("file", path).map_err(|e| TransportError::LocalFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(privacy) = &options.privacy {
            form = form.text("privacy", privacy.clone());
        }
        form = form.text("create_vis", options.create_visualization.to_string());

        let payload = self.http.post_multipart(IMPORTS, form)?;
        created(JobKind::Import, payload, &["item_queue_id"])
    }
}

impl JobApi for ApiClient {
    fn create(&self, params: &CreateParams) -> Result<Created, TransportError> {
        match params {
            CreateParams::ImportFile { path, options } => self.create_import_file(path, options),
            CreateParams::ImportUrl { url, options } => {
                let mut body = import_body(options);
                body.insert("url".into(), json!(url));
                let payload = self.http.post_json(IMPORTS, &Value::Object(body))?;
                created(JobKind::Import, payload, &["item_queue_id"])
            }
            CreateParams::SyncTable {
                url,
                interval_secs,
                options,
            } => {
                let mut body = import_body(options);
                body.insert("url".into(), json!(url));
                body.insert("interval".into(), json!(interval_secs));
                let payload = self.http.post_json(SYNCHRONIZATIONS, &Value::Object(body))?;
                created(JobKind::Sync, payload, &["id"])
            }
            CreateParams::Export { visualization_id } => {
                let body = json!({ "visualization_id": visualization_id });
                let payload = self.http.post_json(EXPORTS, &body)?;
                created(JobKind::Export, payload, &["id"])
            }
            CreateParams::BatchSql { queries } => {
                let query = match queries.as_slice() {
                    [single] => json!(single),
                    many => json!(many),
                };
                let payload = self.http.post_json(BATCH_SQL, &json!({ "query": query }))?;
                created(JobKind::BatchSql, payload, &["job_id"])
            }
            CreateParams::Schedule {
                job_name,
                recurrence,
                definition,
            } => {
                let body = json!({
                    "name": job_name,
                    "definition": definition,
                    "schedule": schedule_body(recurrence),
                });
                let payload = self.http.post_json(ANALYSIS_JOBS, &body)?;
                created(JobKind::Schedule, payload, &["job_id", "schedule_id"])
            }
        }
    }

    fn read_status(&self, kind: JobKind, ids: &[String]) -> Result<Value, TransportError> {
        self.http.get(&resource_path(kind, ids, "read")?)
    }

    fn cancel(&self, kind: JobKind, ids: &[String]) -> Result<Value, TransportError> {
        match kind {
            JobKind::Sync | JobKind::BatchSql | JobKind::Schedule => {
                self.http.delete(&resource_path(kind, ids, "cancel")?)
            }
            JobKind::Import | JobKind::Export | JobKind::ScheduledExecution => {
                Err(unsupported(kind, "cancel"))
            }
        }
    }

    fn list_executions(&self, ids: &[String]) -> Result<Value, TransportError> {
        let path = resource_path(JobKind::Schedule, ids, "list executions")?;
        self.http.get(&format!("{path}/executions"))
    }

    fn trigger(&self, kind: JobKind, ids: &[String]) -> Result<Value, TransportError> {
        match kind {
            JobKind::Sync => {
                let path = resource_path(kind, ids, "trigger")?;
                self.http.put(&format!("{path}/sync_now"), None)
            }
            _ => Err(unsupported(kind, "trigger")),
        }
    }
}

/// Path of the resource named by `ids` (outermost first).
pub fn resource_path(kind: JobKind, ids: &[String], operation: &str) -> Result<String, TransportError> {
    let path = match (kind, ids) {
        (JobKind::Import, [id]) => format!("{IMPORTS}/{id}"),
        (JobKind::Sync, [id]) => format!("{SYNCHRONIZATIONS}/{id}"),
        (JobKind::Export, [id]) => format!("{EXPORTS}/{id}"),
        (JobKind::BatchSql, [id]) => format!("{BATCH_SQL}/{id}"),
        (JobKind::Schedule, [job, schedule]) => format!("{ANALYSIS_JOBS}/{job}/schedules/{schedule}"),
        (JobKind::ScheduledExecution, [job, schedule, execution]) => {
            format!("{ANALYSIS_JOBS}/{job}/schedules/{schedule}/executions/{execution}")
        }
        _ => {
            return Err(unsupported(
                kind,
                &format!("{operation} with {} ids", ids.len()),
            ))
        }
    };
    Ok(path)
}

fn unsupported(kind: JobKind, operation: &str) -> TransportError {
    TransportError::Unsupported {
        kind,
        operation: operation.to_string(),
    }
}

fn import_body(options: &ImportOptions) -> Map<String, Value> {
    let mut body = Map::new();
    if let Some(privacy) = &options.privacy {
        body.insert("privacy".into(), json!(privacy));
    }
    body.insert("create_vis".into(), json!(options.create_visualization));
    body
}

fn schedule_body(recurrence: &Recurrence) -> Value {
    match recurrence {
        Recurrence::Periodic(interval) => json!({ "interval": interval }),
        Recurrence::Triggered(table) => json!({ "trigger": table }),
        Recurrence::OneShot => json!({ "now": true }),
    }
}

/// Extract the id chain from a creation response. Ids arrive as strings or
/// numbers.
fn created(kind: JobKind, payload: Value, id_fields: &[&str]) -> Result<Created, TransportError> {
    let mut ids = Vec::with_capacity(id_fields.len());
    for field in id_fields {
        let id = match payload.get(*field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(TransportError::Decode(format!(
                    "{kind} creation response has no '{field}'"
                )))
            }
        };
        ids.push(id);
    }
    Ok(Created { ids, payload })
}
