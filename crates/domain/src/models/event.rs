//! Audit event domain models.
//!
//! An event is an immutable row of the append-only audit log. Events are
//! emitted by the host system for every state-changing request and carry the
//! originating request id inside their JSON payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::errors::ExportError;

/// A single audit event as stored in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventRecord {
    /// `<action>:<resource>`, e.g. `create:project`.
    pub scope: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub job_id: Option<i64>,
    pub org_id: Option<i64>,
    pub org_slug: Option<String>,
    pub obj_name: Option<String>,
    pub obj_id: Option<i64>,
    pub obj_val: Option<String>,
    pub source: Option<String>,
    pub count: Option<i64>,
    pub duration: Option<i64>,
    #[serde(default = "empty_payload")]
    pub payload: JsonValue,
}

fn empty_payload() -> JsonValue {
    json!({})
}

impl EventRecord {
    /// Create a new event with the given scope and timestamp.
    pub fn new(scope: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            scope: scope.into(),
            timestamp,
            user_id: None,
            user_name: None,
            user_email: None,
            project_id: None,
            task_id: None,
            job_id: None,
            org_id: None,
            org_slug: None,
            obj_name: None,
            obj_id: None,
            obj_val: None,
            source: None,
            count: None,
            duration: None,
            payload: empty_payload(),
        }
    }

    /// Attribute the event to an authenticated user.
    pub fn with_user(mut self, id: i64, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.user_id = Some(id);
        self.user_name = Some(name.into());
        self.user_email = Some(email.into());
        self
    }

    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_job(mut self, job_id: i64) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_org(mut self, org_id: i64, slug: impl Into<String>) -> Self {
        self.org_id = Some(org_id);
        self.org_slug = Some(slug.into());
        self
    }

    /// Set the object the event refers to.
    pub fn with_object(mut self, name: impl Into<String>, id: Option<i64>, value: Option<String>) -> Self {
        self.obj_name = Some(name.into());
        self.obj_id = id;
        self.obj_val = value;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Record the correlation id of the request that produced this event.
    ///
    /// Stored at `payload.request.id`; other payload keys are preserved.
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        if !self.payload.is_object() {
            self.payload = empty_payload();
        }
        if let Some(payload) = self.payload.as_object_mut() {
            let request = payload.entry("request").or_insert_with(empty_payload);
            if !request.is_object() {
                *request = empty_payload();
            }
            if let Some(request) = request.as_object_mut() {
                request.insert("id".to_string(), json!(request_id.to_string()));
            }
        }
        self
    }

    /// Merge additional keys into the payload.
    pub fn with_payload_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        if !self.payload.is_object() {
            self.payload = empty_payload();
        }
        if let Some(payload) = self.payload.as_object_mut() {
            payload.insert(key.into(), value);
        }
        self
    }

    /// The raw `payload.request.id` value, if present.
    pub fn request_id(&self) -> Option<&str> {
        self.payload
            .get("request")
            .and_then(|r| r.get("id"))
            .and_then(JsonValue::as_str)
    }

    /// Whether the event carries a complete user attribution.
    pub fn is_attributed(&self) -> bool {
        self.user_id.is_some()
            && self.user_name.as_deref().is_some_and(|s| !s.is_empty())
            && self.user_email.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Check the structural invariants of an incoming event.
    pub fn validate(&self) -> Result<(), ExportError> {
        if !SCOPE_REGEX.is_match(&self.scope) {
            return Err(ExportError::BadRequest(format!(
                "Invalid event scope '{}', expected '<action>:<resource>'",
                self.scope
            )));
        }
        let partial_user = self.user_id.is_some()
            || self.user_name.is_some()
            || self.user_email.is_some();
        if partial_user && !self.is_attributed() {
            return Err(ExportError::BadRequest(
                "Events attributed to a user must carry user_id, user_name and user_email"
                    .to_string(),
            ));
        }
        if !self.payload.is_object() {
            return Err(ExportError::BadRequest(
                "Event payload must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}

/// Batch of events submitted by the host system.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestEventsRequest {
    pub events: Vec<EventRecord>,
}

/// Response for an accepted event batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEventsResponse {
    pub accepted: usize,
}

lazy_static::lazy_static! {
    pub static ref SCOPE_REGEX: regex::Regex = regex::Regex::new(r"^[a-z][a-z_]*:[a-z][a-z_:]*$").unwrap();
}
