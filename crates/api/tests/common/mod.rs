//! Common test utilities for integration tests.
//!
//! Tests run the full router against the in-memory event log and object
//! store, with export files written to a per-test temporary directory.

// Not every helper is used by every test binary.
#![allow(dead_code)]

use audit_export_api::{
    app::{build_engine, create_app},
    config::{
        CloudStorageConfig, Config, DatabaseConfig, ExportConfig, LoggingConfig, SecurityConfig,
        ServerConfig,
    },
    services::ExportEngine,
};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use domain::models::EventRecord;
use domain::services::{InMemoryEventLog, InMemoryObjectStore};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const PROJECT_ID: i64 = 101;
pub const OTHER_PROJECT_ID: i64 = 202;

/// Test configuration writing exports below `artifact_dir`.
pub fn test_config(artifact_dir: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Use random port
            request_timeout_secs: 30,
            max_body_size: 1048576,
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            cors_origins: vec![],
        },
        export: ExportConfig {
            artifact_dir: artifact_dir.to_path_buf(),
            retention_secs: 3600,
            legacy_sync_wait_ms: 100,
            slow_job_threshold_secs: 300,
            sweep_interval_secs: 60,
            default_range_days: 30,
        },
        cloud_storage: CloudStorageConfig::default(),
    }
}

/// A running application with handles on its in-memory backends.
pub struct TestApp {
    pub app: Router,
    pub engine: Arc<ExportEngine>,
    pub log: Arc<InMemoryEventLog>,
    pub store: Arc<InMemoryObjectStore>,
    // Dropping the directory removes the exported files.
    pub dir: TempDir,
}

/// Create a test application over the given events.
pub fn create_test_app(events: Vec<EventRecord>) -> TestApp {
    create_test_app_with(events, |_| {})
}

/// Create a test application, adjusting the configuration first.
pub fn create_test_app_with(events: Vec<EventRecord>, adjust: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = test_config(dir.path());
    adjust(&mut config);

    let log = Arc::new(InMemoryEventLog::with_events(events));
    let store = Arc::new(InMemoryObjectStore::new());
    let engine = build_engine(&config, log.clone(), store.clone());
    let app = create_app(config, engine.clone(), log.clone(), None);

    TestApp {
        app,
        engine,
        log,
        store,
        dir,
    }
}

/// Send one request through a clone of the router.
pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("Failed to execute request")
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(uri: &str, body: &Value, request_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(id) = request_id {
        builder = builder.header("X-Request-ID", id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Parse response body as JSON.
pub async fn parse_response_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(json!({}))
}

/// Read response body as text.
pub async fn response_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).expect("Response body is not UTF-8")
}

/// Parse a CSV export into its header and rows.
pub fn parse_csv(text: &str) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let header = reader
        .headers()
        .expect("CSV has no header")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.expect("Malformed CSV row").iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

/// Poll `/api/requests/:rq_id` until the request leaves the running states.
pub async fn wait_for_request(app: &Router, rq_id: &str) -> Value {
    for _ in 0..200 {
        let response = send(app, get_request(&format!("/api/requests/{}", rq_id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = parse_response_body(response).await;
        if matches!(body["status"].as_str(), Some("finished") | Some("failed")) {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("Background request {} did not finish", rq_id);
}

/// Poll the legacy endpoint until the export is ready (201).
pub async fn wait_for_legacy(app: &Router, query_id: &str) -> Response {
    for _ in 0..200 {
        let response = send(app, get_request(&format!("/api/events?query_id={}", query_id))).await;
        if response.status() != StatusCode::ACCEPTED {
            return response;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("Legacy export {} did not finish", query_id);
}

/// Fixed reference time used by seeded events.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

/// Format a timestamp for a query string.
pub fn query_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Events produced by one request touching a project, two tasks and four
/// jobs: `<action>:project` once, `<action>:task` twice, `<action>:job` four
/// times, all sharing the same correlation id.
pub fn project_tree_events(
    action: &str,
    project_id: i64,
    at: DateTime<Utc>,
    request_id: Uuid,
) -> Vec<EventRecord> {
    let event = |resource: &str, offset: i64| {
        EventRecord::new(format!("{}:{}", action, resource), at + Duration::milliseconds(offset))
            .with_user(1, "admin", "admin@example.com")
            .with_project(project_id)
            .with_org(7, "acme")
            .with_source("server")
            .with_request_id(request_id)
    };

    let mut events = vec![event("project", 0).with_object("name", None, Some("demo".to_string()))];
    for task in 0..2 {
        let task_id = project_id * 10 + task;
        events.push(event("task", 10 + task).with_task(task_id));
        for job in 0..2 {
            events.push(
                event("job", 100 + task * 10 + job)
                    .with_task(task_id)
                    .with_job(task_id * 10 + job),
            );
        }
    }
    events
}

/// Count events per scope in a set of CSV rows.
pub fn scope_counts(rows: &[Vec<String>]) -> std::collections::BTreeMap<String, usize> {
    let mut counts = std::collections::BTreeMap::new();
    for row in rows {
        *counts.entry(row[0].clone()).or_insert(0) += 1;
    }
    counts
}
