//! Event export domain models.
//!
//! Covers the export filter, delivery destinations, the canonical request
//! signature used for deduplication, job states and the wire documents of
//! both export protocol generations.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use shared::crypto::sha256_hex;
use shared::validation::{validate_bucket_name, validate_filename, validate_time_range};
use std::path::PathBuf;
use validator::ValidationError;

use crate::errors::ExportError;
use crate::models::EventRecord;

/// Default export window when the caller omits `from`.
pub const DEFAULT_EXPORT_RANGE_DAYS: i64 = 30;

/// File name used for downloads and cloud objects when the caller gives none.
pub const DEFAULT_EXPORT_FILENAME: &str = "events.csv";

/// Prefix of export job identifiers (query tokens and request ids).
pub const EXPORT_JOB_ID_PREFIX: &str = "events";

/// Operation type reported in background request documents.
pub const EXPORT_OPERATION_TYPE: &str = "export:events";

/// Rejection message for cloud destinations on the legacy protocol.
pub const CLOUD_EXPORT_UNSUPPORTED_MESSAGE: &str =
    "This endpoint does not support exporting events to cloud storage";

/// Event selection criteria. All present predicates are AND-ed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub job_id: Option<i64>,
    pub org_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl ExportFilter {
    /// Create a filter over the inclusive window `[from, to]`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, ExportError> {
        validate_time_range(from, to).map_err(invalid)?;
        Ok(Self {
            from,
            to,
            project_id: None,
            task_id: None,
            job_id: None,
            org_id: None,
            user_id: None,
        })
    }

    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Whether an event satisfies every predicate of this filter.
    pub fn matches(&self, event: &EventRecord) -> bool {
        fn eq(expected: Option<i64>, actual: Option<i64>) -> bool {
            expected.map_or(true, |id| actual == Some(id))
        }

        self.from <= event.timestamp
            && event.timestamp <= self.to
            && eq(self.project_id, event.project_id)
            && eq(self.task_id, event.task_id)
            && eq(self.job_id, event.job_id)
            && eq(self.org_id, event.org_id)
            && eq(self.user_id, event.user_id)
    }

    /// Canonical text form of the scope predicates (bounds excluded).
    fn predicates_canonical(&self) -> String {
        format!(
            "project_id={};task_id={};job_id={};org_id={};user_id={}",
            canonical_id(self.project_id),
            canonical_id(self.task_id),
            canonical_id(self.job_id),
            canonical_id(self.org_id),
            canonical_id(self.user_id),
        )
    }

    /// Canonical text form of the whole filter.
    pub fn canonical(&self) -> String {
        format!(
            "from={};to={};{}",
            canonical_time(self.from),
            canonical_time(self.to),
            self.predicates_canonical()
        )
    }
}

/// Where the caller wants the export to end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportLocation {
    #[default]
    Local,
    CloudStorage,
}

/// Delivery mode of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Download,
    CloudUpload,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Download => write!(f, "download"),
            DeliveryMode::CloudUpload => write!(f, "cloud_upload"),
        }
    }
}

/// Delivery mode together with its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Delivery {
    /// Keep the file for direct download under the given name.
    Download { filename: String },
    /// Write the file as `key` into `bucket`.
    CloudUpload { bucket: String, key: String },
}

impl Delivery {
    pub fn mode(&self) -> DeliveryMode {
        match self {
            Delivery::Download { .. } => DeliveryMode::Download,
            Delivery::CloudUpload { .. } => DeliveryMode::CloudUpload,
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            Delivery::Download { filename } => format!("download;filename={}", filename),
            Delivery::CloudUpload { bucket, key } => {
                format!("cloud_upload;bucket={};key={}", bucket, key)
            }
        }
    }
}

/// A validated export request as handed to the job engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub filter: ExportFilter,
    pub delivery: Delivery,
    /// Canonical signature; equal signatures share one active job.
    pub signature: String,
}

impl ExportRequest {
    /// Build a request whose signature covers the exact filter bounds.
    pub fn new(filter: ExportFilter, delivery: Delivery) -> Self {
        let signature = format!("{}|{}", filter.canonical(), delivery.canonical());
        Self {
            filter,
            delivery,
            signature,
        }
    }

    /// SHA-256 of the signature, used as the dedup key.
    pub fn fingerprint(&self) -> String {
        sha256_hex(&self.signature)
    }
}

/// Export parameters shared by both protocol generations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ExportQuery {
    #[serde(rename = "_from", alias = "from")]
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub job_id: Option<i64>,
    pub org_id: Option<i64>,
    pub user_id: Option<i64>,
    pub location: Option<ExportLocation>,
    pub bucket: Option<String>,
    pub filename: Option<String>,
}

impl ExportQuery {
    /// Validate the query and resolve it into an engine request.
    ///
    /// Missing bounds default to `[to - default_range_days, now]`. Defaulted
    /// bounds enter the signature as `default`, so repeated requests without
    /// explicit bounds attach to the same active job.
    pub fn to_request(
        &self,
        now: DateTime<Utc>,
        default_range_days: i64,
    ) -> Result<ExportRequest, ExportError> {
        let to = self.to.unwrap_or(now);
        let from = self
            .from
            .unwrap_or_else(|| to - Duration::days(default_range_days));

        let mut filter = ExportFilter::new(from, to)?;
        filter.project_id = self.project_id;
        filter.task_id = self.task_id;
        filter.job_id = self.job_id;
        filter.org_id = self.org_id;
        filter.user_id = self.user_id;

        let filename = self
            .filename
            .clone()
            .unwrap_or_else(|| DEFAULT_EXPORT_FILENAME.to_string());
        validate_filename(&filename).map_err(invalid)?;

        let delivery = match self.location.unwrap_or_default() {
            ExportLocation::Local => {
                if self.bucket.is_some() {
                    return Err(ExportError::BadRequest(
                        "The bucket parameter requires location=cloud_storage".to_string(),
                    ));
                }
                Delivery::Download { filename }
            }
            ExportLocation::CloudStorage => {
                let bucket = self.bucket.clone().ok_or_else(|| {
                    ExportError::BadRequest(
                        "A bucket is required when exporting to cloud storage".to_string(),
                    )
                })?;
                validate_bucket_name(&bucket).map_err(invalid)?;
                Delivery::CloudUpload {
                    bucket,
                    key: filename,
                }
            }
        };

        let signature = format!(
            "from={};to={};{}|{}",
            self.from.map_or_else(|| "default".to_string(), canonical_time),
            self.to.map_or_else(|| "default".to_string(), canonical_time),
            filter.predicates_canonical(),
            delivery.canonical()
        );

        Ok(ExportRequest {
            filter,
            delivery,
            signature,
        })
    }

    /// Whether the caller asked for a cloud storage destination.
    pub fn targets_cloud(&self) -> bool {
        self.location == Some(ExportLocation::CloudStorage)
    }
}

/// Follow-up action on the legacy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyAction {
    Download,
}

/// Query parameters of the legacy polling endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct LegacyEventsQuery {
    #[serde(rename = "_from", alias = "from")]
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub job_id: Option<i64>,
    pub org_id: Option<i64>,
    pub user_id: Option<i64>,
    pub location: Option<ExportLocation>,
    pub bucket: Option<String>,
    pub filename: Option<String>,
    /// Token returned by the first call; empty means "start a new export".
    pub query_id: Option<String>,
    pub action: Option<LegacyAction>,
}

impl LegacyEventsQuery {
    /// Convert to the shared export query.
    pub fn to_export_query(&self) -> ExportQuery {
        ExportQuery {
            from: self.from,
            to: self.to,
            project_id: self.project_id,
            task_id: self.task_id,
            job_id: self.job_id,
            org_id: self.org_id,
            user_id: self.user_id,
            location: self.location,
            bucket: self.bucket.clone(),
            filename: self.filename.clone(),
        }
    }

    /// The query token, treating an empty string as absent.
    pub fn token(&self) -> Option<&str> {
        self.query_id.as_deref().filter(|t| !t.is_empty())
    }
}

/// Lifecycle state of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportJobState {
    Pending,
    Running,
    Finished,
    Failed,
}

impl ExportJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportJobState::Finished | ExportJobState::Failed)
    }

    /// Transitions only move forward: Pending → Running → {Finished | Failed}.
    /// A pending job may fail before it starts running.
    pub fn can_transition_to(&self, next: ExportJobState) -> bool {
        matches!(
            (self, next),
            (ExportJobState::Pending, ExportJobState::Running)
                | (ExportJobState::Pending, ExportJobState::Failed)
                | (ExportJobState::Running, ExportJobState::Finished)
                | (ExportJobState::Running, ExportJobState::Failed)
        )
    }
}

impl std::fmt::Display for ExportJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportJobState::Pending => write!(f, "pending"),
            ExportJobState::Running => write!(f, "running"),
            ExportJobState::Finished => write!(f, "finished"),
            ExportJobState::Failed => write!(f, "failed"),
        }
    }
}

/// A finished CSV file kept on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
}

/// Outcome of a successful export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    /// The file can be retrieved from this service.
    Downloadable(ArtifactHandle),
    /// The file lives only in the destination bucket.
    DeliveredExternally { bucket: String, key: String },
}

/// Point-in-time view of an export job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub state: ExportJobState,
    pub filter: ExportFilter,
    pub delivery: Delivery,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
    pub error: Option<ExportError>,
    pub row_count: Option<u64>,
}

/// Legacy protocol response carrying the query token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyExportResponse {
    pub query_id: String,
}

/// Unified protocol response for an accepted export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportAcceptedResponse {
    pub rq_id: String,
}

/// Generic background request status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl From<ExportJobState> for RequestStatus {
    fn from(state: ExportJobState) -> Self {
        match state {
            ExportJobState::Pending => RequestStatus::Queued,
            ExportJobState::Running => RequestStatus::Started,
            ExportJobState::Finished => RequestStatus::Finished,
            ExportJobState::Failed => RequestStatus::Failed,
        }
    }
}

/// Description of the operation behind a background request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOperation {
    #[serde(rename = "type")]
    pub operation_type: String,
    pub target: String,
    pub format: String,
}

/// Background request document served by the unified protocol.
///
/// `result_url` is always serialized; it is `null` until the job finishes and
/// stays `null` for cloud deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundRequest {
    pub id: String,
    pub status: RequestStatus,
    pub message: String,
    pub operation: RequestOperation,
    pub created_date: DateTime<Utc>,
    pub started_date: Option<DateTime<Utc>>,
    pub finished_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub result_url: Option<String>,
}

/// Listing of live background requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundRequestList {
    pub count: usize,
    pub results: Vec<BackgroundRequest>,
}

fn canonical_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn canonical_id(id: Option<i64>) -> String {
    id.map(|v| v.to_string()).unwrap_or_default()
}

fn invalid(err: ValidationError) -> ExportError {
    let message = err
        .message
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string());
    ExportError::BadRequest(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let to = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        (to - Duration::minutes(3), to)
    }

    #[test]
    fn test_filter_rejects_inverted_range() {
        let (from, to) = window();
        assert!(matches!(
            ExportFilter::new(to, from),
            Err(ExportError::BadRequest(_))
        ));
    }

    #[test]
    fn test_filter_matches_bounds_inclusive() {
        let (from, to) = window();
        let filter = ExportFilter::new(from, to).unwrap();

        assert!(filter.matches(&EventRecord::new("create:task", from)));
        assert!(filter.matches(&EventRecord::new("create:task", to)));
        assert!(!filter.matches(&EventRecord::new(
            "create:task",
            to + Duration::microseconds(1)
        )));
        assert!(!filter.matches(&EventRecord::new(
            "create:task",
            from - Duration::microseconds(1)
        )));
    }

    #[test]
    fn test_filter_intersection() {
        let (from, to) = window();
        let filter = ExportFilter::new(from, to)
            .unwrap()
            .with_project(1)
            .with_task(2);

        let both = EventRecord::new("create:job", to).with_project(1).with_task(2);
        let project_only = EventRecord::new("create:task", to).with_project(1);
        let other_task = EventRecord::new("create:job", to).with_project(1).with_task(3);

        assert!(filter.matches(&both));
        assert!(!filter.matches(&project_only));
        assert!(!filter.matches(&other_task));
    }

    #[test]
    fn test_query_defaults_window() {
        let now = Utc::now();
        let request = ExportQuery::default()
            .to_request(now, DEFAULT_EXPORT_RANGE_DAYS)
            .unwrap();

        assert_eq!(request.filter.to, now);
        assert_eq!(request.filter.from, now - Duration::days(30));
        assert_eq!(
            request.delivery,
            Delivery::Download {
                filename: DEFAULT_EXPORT_FILENAME.to_string()
            }
        );
    }

    #[test]
    fn test_defaulted_bounds_share_signature() {
        let query = ExportQuery {
            project_id: Some(5),
            ..Default::default()
        };
        let first = query.to_request(Utc::now(), 30).unwrap();
        let second = query
            .to_request(Utc::now() + Duration::seconds(5), 30)
            .unwrap();

        assert_eq!(first.signature, second.signature);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_signature_distinguishes_destination() {
        let (from, to) = window();
        let base = ExportQuery {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        };
        let cloud = ExportQuery {
            location: Some(ExportLocation::CloudStorage),
            bucket: Some("import-export".to_string()),
            ..base.clone()
        };
        let other_bucket = ExportQuery {
            bucket: Some("archive".to_string()),
            ..cloud.clone()
        };

        let a = base.to_request(to, 30).unwrap();
        let b = cloud.to_request(to, 30).unwrap();
        let c = other_bucket.to_request(to, 30).unwrap();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(b.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_explicit_bounds_match_request_new() {
        let (from, to) = window();
        let query = ExportQuery {
            from: Some(from),
            to: Some(to),
            task_id: Some(9),
            ..Default::default()
        };
        let from_query = query.to_request(Utc::now(), 30).unwrap();
        let direct = ExportRequest::new(
            ExportFilter::new(from, to).unwrap().with_task(9),
            Delivery::Download {
                filename: DEFAULT_EXPORT_FILENAME.to_string(),
            },
        );
        assert_eq!(from_query, direct);
    }

    #[test]
    fn test_cloud_requires_bucket() {
        let query = ExportQuery {
            location: Some(ExportLocation::CloudStorage),
            filename: Some("test.csv".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            query.to_request(Utc::now(), 30),
            Err(ExportError::BadRequest(_))
        ));
    }

    #[test]
    fn test_cloud_request_uses_filename_as_key() {
        let query = ExportQuery {
            location: Some(ExportLocation::CloudStorage),
            bucket: Some("import-export".to_string()),
            filename: Some("test.csv".to_string()),
            ..Default::default()
        };
        let request = query.to_request(Utc::now(), 30).unwrap();
        assert_eq!(
            request.delivery,
            Delivery::CloudUpload {
                bucket: "import-export".to_string(),
                key: "test.csv".to_string()
            }
        );
        assert_eq!(request.delivery.mode(), DeliveryMode::CloudUpload);
    }

    #[test]
    fn test_bucket_without_cloud_location_rejected() {
        let query = ExportQuery {
            bucket: Some("import-export".to_string()),
            ..Default::default()
        };
        assert!(query.to_request(Utc::now(), 30).is_err());
    }

    #[test]
    fn test_invalid_filename_rejected() {
        let query = ExportQuery {
            filename: Some("../escape.csv".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            query.to_request(Utc::now(), 30),
            Err(ExportError::BadRequest(_))
        ));
    }

    #[test]
    fn test_legacy_query_token() {
        let mut query = LegacyEventsQuery::default();
        assert!(query.token().is_none());
        query.query_id = Some(String::new());
        assert!(query.token().is_none());
        query.query_id = Some("events_abc".to_string());
        assert_eq!(query.token(), Some("events_abc"));
    }

    #[test]
    fn test_legacy_query_conversion() {
        let query = LegacyEventsQuery {
            project_id: Some(4),
            location: Some(ExportLocation::CloudStorage),
            query_id: Some("events_abc".to_string()),
            action: Some(LegacyAction::Download),
            ..Default::default()
        };
        let export = query.to_export_query();
        assert_eq!(export.project_id, Some(4));
        assert!(export.targets_cloud());
    }

    #[test]
    fn test_job_state_transitions() {
        use ExportJobState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Finished));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Finished.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Finished));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Finished));
    }

    #[test]
    fn test_request_status_mapping() {
        assert_eq!(RequestStatus::from(ExportJobState::Pending), RequestStatus::Queued);
        assert_eq!(RequestStatus::from(ExportJobState::Running), RequestStatus::Started);
        assert_eq!(RequestStatus::from(ExportJobState::Finished), RequestStatus::Finished);
        assert_eq!(RequestStatus::from(ExportJobState::Failed), RequestStatus::Failed);
    }

    #[test]
    fn test_background_request_serializes_null_result_url() {
        let request = BackgroundRequest {
            id: "events_abc".to_string(),
            status: RequestStatus::Finished,
            message: String::new(),
            operation: RequestOperation {
                operation_type: EXPORT_OPERATION_TYPE.to_string(),
                target: "events".to_string(),
                format: "CSV".to_string(),
            },
            created_date: Utc::now(),
            started_date: None,
            finished_date: None,
            expiry_date: None,
            result_url: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("result_url").is_some());
        assert!(value["result_url"].is_null());
        assert_eq!(value["status"], "finished");
        assert_eq!(value["operation"]["type"], "export:events");
    }

    #[test]
    fn test_query_deserializes_underscore_from() {
        let query: ExportQuery = serde_json::from_value(serde_json::json!({
            "_from": "2024-05-01T11:57:00Z",
            "to": "2024-05-01T12:00:00Z",
            "location": "cloud_storage",
            "bucket": "import-export"
        }))
        .unwrap();
        let (from, to) = window();
        assert_eq!(query.from, Some(from));
        assert_eq!(query.to, Some(to));
        assert!(query.targets_cloud());
    }
}
