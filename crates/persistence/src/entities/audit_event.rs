//! Audit event entity.

use chrono::{DateTime, Utc};
use domain::models::EventRecord;
use sqlx::FromRow;

/// Database row of the `audit_events` table.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEventEntity {
    /// Insertion sequence; breaks timestamp ties.
    pub id: i64,
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
    pub payload: serde_json::Value,
}

impl From<AuditEventEntity> for EventRecord {
    fn from(entity: AuditEventEntity) -> Self {
        EventRecord {
            scope: entity.scope,
            timestamp: entity.timestamp,
            user_id: entity.user_id,
            user_name: entity.user_name,
            user_email: entity.user_email,
            project_id: entity.project_id,
            task_id: entity.task_id,
            job_id: entity.job_id,
            org_id: entity.org_id,
            org_slug: entity.org_slug,
            obj_name: entity.obj_name,
            obj_id: entity.obj_id,
            obj_val: entity.obj_val,
            source: entity.source,
            count: entity.count,
            duration: entity.duration,
            payload: entity.payload,
        }
    }
}
