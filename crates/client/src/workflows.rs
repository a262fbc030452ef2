// crates/client/src/workflows.rs
//! Submit-then-wait helpers for the common one-shot jobs.

use std::path::PathBuf;
use std::time::Duration;

use geoapi_core::{
    BatchSql, BatchSqlJob, BatchSqlStatus, Export, ExportJob, ExportState, ImportJob,
    ImportOptions, ImportState, JobContext, JobError, JobKind, JobSpec, PollPolicy,
};

/// Imports driven by dataset creation poll slowly but for a long time.
pub fn default_import_policy() -> PollPolicy<ImportState> {
    PollPolicy::fixed(Duration::from_secs(10), 60)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    File(PathBuf),
    Url(String),
}

impl ImportSource {
    /// `http://` and `https://` arguments are URLs, anything else a path.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Url(raw.to_string())
        } else {
            Self::File(PathBuf::from(raw))
        }
    }
}

/// Where a successful import landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedTable {
    pub import_id: String,
    pub table_name: String,
    pub table_id: Option<String>,
}

/// Import and block until the table exists.
///
/// A finished import that did not succeed is [`JobError::Failed`] with the
/// server's error code and text.
pub fn import_and_wait(
    ctx: &JobContext,
    source: ImportSource,
    options: ImportOptions,
    policy: Option<PollPolicy<ImportState>>,
) -> Result<ImportedTable, JobError> {
    let job = match source {
        ImportSource::File(path) => ImportJob::from_file(ctx, path),
        ImportSource::Url(url) => ImportJob::from_url(ctx, url),
    };
    let mut job = job.with_options(options);
    job.submit()?;
    job.wait_until_terminal(&policy.unwrap_or_else(default_import_policy))?
        .ensure_succeeded()?;

    let table_name = job
        .table_name()
        .ok_or_else(|| JobError::decode(JobKind::Import, "completed import names no table"))?;
    Ok(ImportedTable {
        import_id: job.id().unwrap_or_default().to_string(),
        table_name: table_name.to_string(),
        table_id: job.table_id().map(str::to_string),
    })
}

/// Run SQL statements as a batch job and wait for a terminal status.
///
/// The handle is returned whatever the outcome; a failed or cancelled job is
/// data for the caller to inspect.
pub fn run_batch_sql(
    ctx: &JobContext,
    queries: Vec<String>,
    policy: Option<PollPolicy<BatchSqlStatus>>,
) -> Result<BatchSqlJob, JobError> {
    let mut job = BatchSqlJob::multi(ctx, queries);
    job.submit()?;
    job.wait_until_terminal(&policy.unwrap_or_else(BatchSql::default_policy))?;
    Ok(job)
}

/// Export a visualization and return the download URL.
pub fn export_and_wait(
    ctx: &JobContext,
    visualization_id: &str,
    policy: Option<PollPolicy<ExportState>>,
) -> Result<String, JobError> {
    let mut job = ExportJob::for_visualization(ctx, visualization_id);
    job.submit()?;
    job.wait_until_terminal(&policy.unwrap_or_else(Export::default_policy))?
        .ensure_succeeded()?;
    job.url()
        .map(str::to_string)
        .ok_or_else(|| JobError::decode(JobKind::Export, "completed export has no url"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoapi_core::testing::ScriptedApi;
    use geoapi_core::ManualClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn context(api: &Arc<ScriptedApi>) -> (Arc<ManualClock>, JobContext) {
        let clock = Arc::new(ManualClock::default());
        (clock.clone(), JobContext::with_clock(api.clone(), clock))
    }

    #[test]
    fn test_import_source_parse() {
        assert_eq!(
            ImportSource::parse("https://example.com/a.csv"),
            ImportSource::Url("https://example.com/a.csv".into())
        );
        assert_eq!(
            ImportSource::parse("data/a.csv"),
            ImportSource::File(PathBuf::from("data/a.csv"))
        );
    }

    #[test]
    fn test_import_and_wait_uses_ten_second_interval() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create(vec!["q-1".into()], json!({"item_queue_id": "q-1", "success": true}));
        api.push_status(json!({"id": "q-1", "state": "uploading"}));
        api.push_status(json!({"id": "q-1", "state": "importing"}));
        api.push_status(json!({
            "id": "q-1", "state": "complete", "success": true,
            "table_name": "roads", "table_id": "t-9"
        }));
        let (clock, ctx) = context(&api);

        let table = import_and_wait(
            &ctx,
            ImportSource::Url("https://example.com/roads.csv".into()),
            ImportOptions::default(),
            None,
        )
        .unwrap();

        assert_eq!(
            table,
            ImportedTable {
                import_id: "q-1".into(),
                table_name: "roads".into(),
                table_id: Some("t-9".into()),
            }
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 2]);
    }

    #[test]
    fn test_import_and_wait_reports_server_failure() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create(vec!["q-2".into()], json!({"item_queue_id": "q-2"}));
        api.push_status(json!({
            "id": "q-2", "state": "failure", "success": false,
            "error_code": 1002, "get_error_text": {"title": "Unsupported file type", "what_about": "Use CSV"}
        }));
        let (_clock, ctx) = context(&api);

        let err = import_and_wait(
            &ctx,
            ImportSource::Url("https://example.com/x.bin".into()),
            ImportOptions::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "import job q-2 finished as 'failure': [1002] Unsupported file type: Use CSV"
        );
    }

    #[test]
    fn test_run_batch_sql_returns_failed_job_as_data() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create(vec!["b1".into()], json!({"job_id": "b1", "status": "pending"}));
        api.push_status(json!({"job_id": "b1", "status": "failed", "failed_reason": "syntax error"}));
        let (clock, ctx) = context(&api);

        let job = run_batch_sql(&ctx, vec!["SELEC 1".into()], None).unwrap();
        assert_eq!(job.state(), Some(&BatchSqlStatus::Failed));
        assert!(!job.succeeded());
        assert_eq!(job.failed_reason(), Some("syntax error"));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_run_batch_sql_times_out() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create(vec!["b1".into()], json!({"job_id": "b1", "status": "pending"}));
        api.push_status(json!({"job_id": "b1", "status": "running"}));
        let (_clock, ctx) = context(&api);

        let policy = PollPolicy::fixed(Duration::from_secs(2), 3);
        let err = run_batch_sql(&ctx, vec!["SELECT pg_sleep(999)".into()], Some(policy)).unwrap_err();
        assert!(matches!(err, JobError::PollTimeout { attempts: 3, .. }));
        assert_eq!(api.reads(), 3);
    }

    #[test]
    fn test_export_and_wait_returns_url() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create(vec!["x1".into()], json!({"id": "x1", "state": "pending"}));
        api.push_status(json!({"id": "x1", "state": "exporting"}));
        api.push_status(json!({"id": "x1", "state": "complete", "url": "https://cdn.example/x1.carto"}));
        let (_clock, ctx) = context(&api);

        let url = export_and_wait(&ctx, "viz-1", None).unwrap();
        assert_eq!(url, "https://cdn.example/x1.carto");
    }

    #[test]
    fn test_export_and_wait_falls_back_to_export_policy() {
        let api = Arc::new(ScriptedApi::new());
        api.on_create(vec!["x1".into()], json!({"id": "x1", "state": "pending"}));
        api.push_status(json!({"id": "x1", "state": "exporting"}));
        let (clock, ctx) = context(&api);

        let err = export_and_wait(&ctx, "viz-1", None).unwrap_err();
        let expected = Export::default_policy();
        assert!(matches!(err, JobError::PollTimeout { attempts, .. } if attempts == expected.max_attempts));
        assert!(clock.sleeps().iter().all(|d| *d == Duration::from_secs(5)));
    }
}
