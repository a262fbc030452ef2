//! ApiClient against a mock server: routing, signing, status mapping, and
//! the job core driving real HTTP round trips.

use std::sync::Arc;
use std::time::Duration;

use geoapi_client::{ApiClient, ClientConfig};
use geoapi_core::{
    BatchSqlJob, BatchSqlStatus, ImportJob, JobApi, JobContext, JobError, JobKind, ManualClock,
    PollPolicy, ScheduleContext, SyncJob, TransportError,
};
use mockito::{Matcher, Server, ServerGuard};
use pretty_assertions::assert_eq;
use serde_json::json;

fn client(server: &ServerGuard, username: Option<&str>) -> ApiClient {
    let mut config = ClientConfig {
        base_url: server.url(),
        api_key: Some("secret".into()),
        username: username.map(str::to_string),
        ..ClientConfig::default()
    };
    config.validate().unwrap();
    ApiClient::new(&config).unwrap()
}

fn context(api: ApiClient) -> (Arc<ManualClock>, JobContext) {
    let clock = Arc::new(ManualClock::default());
    (clock.clone(), JobContext::with_clock(Arc::new(api), clock))
}

fn signed() -> Matcher {
    Matcher::UrlEncoded("api_key".into(), "secret".into())
}

#[test]
fn batch_sql_submit_and_wait_over_http() {
    let mut server = Server::new();
    let create = server
        .mock("POST", "/api/v2/sql/job")
        .match_query(signed())
        .match_body(Matcher::Json(json!({"query": "UPDATE roads SET x = 1"})))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"job_id": "b1", "status": "pending"}"#)
        .create();
    let status = server
        .mock("GET", "/api/v2/sql/job/b1")
        .match_query(signed())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"job_id": "b1", "status": "done", "user": "acme"}"#)
        .expect(1)
        .create();

    let (clock, ctx) = context(client(&server, None));
    let mut job = BatchSqlJob::new(&ctx, "UPDATE roads SET x = 1");
    assert_eq!(job.submit().unwrap(), &BatchSqlStatus::Pending);
    job.wait_until_terminal(&PollPolicy::fixed(Duration::from_secs(2), 5))
        .unwrap();

    assert_eq!(job.state(), Some(&BatchSqlStatus::Done));
    assert_eq!(job.user(), Some("acme"));
    assert!(clock.sleeps().is_empty());
    create.assert();
    status.assert();
}

#[test]
fn username_prefixes_every_path() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/user/acme/api/v1/imports/q-1")
        .match_query(signed())
        .with_status(200)
        .with_body(r#"{"id": "q-1", "state": "importing"}"#)
        .create();

    let (_clock, ctx) = context(client(&server, Some("acme")));
    let mut job = ImportJob::attach(&ctx, vec!["q-1".into()]);
    job.refresh().unwrap();
    assert!(!job.is_terminal());
    mock.assert();
}

#[test]
fn http_errors_are_typed() {
    let mut server = Server::new();
    server
        .mock("GET", "/api/v2/sql/job/missing")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"error": ["Job with id missing not found"]}"#)
        .create();
    server
        .mock("GET", "/api/v2/sql/job/locked")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"error": "permission denied"}"#)
        .create();
    server
        .mock("GET", "/api/v2/sql/job/busy")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_header("retry-after", "30")
        .create();

    let api = client(&server, None);
    assert!(matches!(
        api.read_status(JobKind::BatchSql, &["missing".into()]),
        Err(TransportError::NotFound { .. })
    ));
    assert_eq!(
        api.read_status(JobKind::BatchSql, &["locked".into()]).unwrap_err(),
        TransportError::Unauthorized {
            status: 401,
            message: "permission denied".into()
        }
    );
    assert_eq!(
        api.read_status(JobKind::BatchSql, &["busy".into()]).unwrap_err(),
        TransportError::RateLimited { retry_after_secs: 30 }
    );
}

#[test]
fn transport_error_aborts_wait_without_retry() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/api/v2/sql/job/b1")
        .match_query(Matcher::Any)
        .with_status(502)
        .with_body("bad gateway")
        .expect(1)
        .create();

    let (clock, ctx) = context(client(&server, None));
    let mut job = BatchSqlJob::attach(&ctx, vec!["b1".into()]);
    let err = job
        .wait_until_terminal(&PollPolicy::fixed(Duration::from_secs(2), 10))
        .unwrap_err();

    assert!(matches!(
        err,
        JobError::Transport(TransportError::Server { status: 502, .. })
    ));
    assert!(clock.sleeps().is_empty());
    mock.assert();
}

#[test]
fn batch_cancel_is_a_delete() {
    let mut server = Server::new();
    let mock = server
        .mock("DELETE", "/api/v2/sql/job/b1")
        .match_query(signed())
        .with_status(200)
        .with_body(r#"{"job_id": "b1", "status": "cancelled"}"#)
        .create();

    let (_clock, ctx) = context(client(&server, None));
    let mut job = BatchSqlJob::attach(&ctx, vec!["b1".into()]);
    let confirmation = job.cancel().unwrap();
    assert_eq!(confirmation["status"], json!("cancelled"));
    // The response is not applied; only a refresh changes state.
    assert_eq!(job.state(), None);
    mock.assert();
}

#[test]
fn sync_force_and_delete() {
    let mut server = Server::new();
    let create = server
        .mock("POST", "/api/v1/synchronizations")
        .match_query(signed())
        .match_body(Matcher::PartialJson(json!({
            "url": "https://example.com/roads.csv",
            "interval": 3600
        })))
        .with_status(200)
        .with_body(r#"{"id": 77, "state": "created", "interval": 3600}"#)
        .create();
    let sync_now = server
        .mock("PUT", "/api/v1/synchronizations/77/sync_now")
        .match_query(signed())
        .with_status(200)
        .with_body("{}")
        .create();
    let delete = server
        .mock("DELETE", "/api/v1/synchronizations/77")
        .match_query(signed())
        .with_status(204)
        .create();

    let (_clock, ctx) = context(client(&server, None));
    let mut job = SyncJob::from_url(&ctx, "https://example.com/roads.csv", 3600);
    job.submit().unwrap();
    assert_eq!(job.id(), Some("77"));
    // `created` ends creation polling: the table waits for its first run.
    assert!(job.is_terminal());
    assert_eq!(job.interval_secs(), Some(3600));

    job.force_sync().unwrap();
    assert_eq!(job.cancel().unwrap(), serde_json::Value::Null);

    create.assert();
    sync_now.assert();
    delete.assert();
}

#[test]
fn import_and_export_cannot_be_cancelled() {
    let server = Server::new();
    let api = client(&server, None);
    assert!(matches!(
        api.cancel(JobKind::Export, &["x1".into()]),
        Err(TransportError::Unsupported { kind: JobKind::Export, .. })
    ));
    assert!(matches!(
        api.cancel(JobKind::Import, &["q1".into()]),
        Err(TransportError::Unsupported { .. })
    ));
}

#[test]
fn import_file_is_uploaded_as_multipart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roads.csv");
    std::fs::write(&path, "id,name\n1,Main St\n").unwrap();

    let mut server = Server::new();
    let mock = server
        .mock("POST", "/api/v1/imports")
        .match_query(signed())
        .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
        .match_body(Matcher::Regex("Main St".into()))
        .with_status(200)
        .with_body(r#"{"item_queue_id": "q-5", "success": true}"#)
        .create();

    let (_clock, ctx) = context(client(&server, None));
    let mut job = ImportJob::from_file(&ctx, &path);
    job.submit().unwrap();
    assert_eq!(job.id(), Some("q-5"));
    mock.assert();
}

#[test]
fn missing_upload_is_a_local_error() {
    let server = Server::new();
    let (_clock, ctx) = context(client(&server, None));
    let mut job = ImportJob::from_file(&ctx, "/definitely/not/here.csv");
    assert!(matches!(
        job.submit(),
        Err(JobError::Transport(TransportError::LocalFile { .. }))
    ));
    assert!(job.id().is_none());
}

#[test]
fn schedule_follow_over_http() {
    let mut server = Server::new();
    server
        .mock("POST", "/api/v4/analysis/jobs")
        .match_query(signed())
        .match_body(Matcher::PartialJson(json!({"name": "nightly", "schedule": {"now": true}})))
        .with_status(201)
        .with_body(r#"{"job_id": "j1", "schedule_id": "s1", "status": "pending"}"#)
        .create();
    server
        .mock("GET", "/api/v4/analysis/jobs/j1/schedules/s1")
        .match_query(signed())
        .with_status(200)
        .with_body(r#"{"schedule_id": "s1", "status": "dead", "tasks": {"completed": 1}}"#)
        .create();
    server
        .mock("GET", "/api/v4/analysis/jobs/j1/schedules/s1/executions")
        .match_query(signed())
        .with_status(200)
        .with_body(
            r#"[{"id": "e1", "status": "dead", "failed": false,
                 "allocation_time": "2024-05-01T00:00:00Z",
                 "finish_time": "2024-05-01T00:00:30Z"}]"#,
        )
        .create();

    let (clock, jobs) = context(client(&server, None));
    let ctx = ScheduleContext::new(jobs);
    let mut tracker = ctx
        .create_schedule("nightly", geoapi_core::Recurrence::OneShot, json!({"sql": "SELECT 1"}))
        .unwrap();

    let mut out = Vec::new();
    tracker.follow(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("schedule j1/s1  dead  once"));
    assert!(text.contains("tasks: completed 1"));
    assert!(text.contains("e1"));
    // Creation counts as an observation: the first refresh waits out the window.
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
}
