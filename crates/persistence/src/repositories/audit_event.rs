//! Audit event repository backed by PostgreSQL.

use async_trait::async_trait;
use domain::errors::ExportError;
use domain::models::{EventRecord, ExportFilter};
use domain::services::{EventLogReader, EventLogWriter, EventStream};
use futures::StreamExt;
use metrics::{counter, histogram};
use sqlx::PgPool;
use std::time::Instant;

use crate::entities::AuditEventEntity;

/// Optional predicates are bound as NULL when absent, so one statement serves
/// every filter combination and the stream can borrow a `'static` query.
const SELECT_EVENTS: &str = r#"
    SELECT id, scope, "timestamp", user_id, user_name, user_email,
           project_id, task_id, job_id, org_id, org_slug,
           obj_name, obj_id, obj_val, source, count, duration, payload
    FROM audit_events
    WHERE "timestamp" >= $1
      AND "timestamp" <= $2
      AND ($3::BIGINT IS NULL OR project_id = $3)
      AND ($4::BIGINT IS NULL OR task_id = $4)
      AND ($5::BIGINT IS NULL OR job_id = $5)
      AND ($6::BIGINT IS NULL OR org_id = $6)
      AND ($7::BIGINT IS NULL OR user_id = $7)
    ORDER BY "timestamp" ASC, id ASC
"#;

const INSERT_EVENT: &str = r#"
    INSERT INTO audit_events (
        scope, "timestamp", user_id, user_name, user_email,
        project_id, task_id, job_id, org_id, org_slug,
        obj_name, obj_id, obj_val, source, count, duration, payload
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
"#;

/// Repository for the `audit_events` table.
#[derive(Clone)]
pub struct AuditEventRepository {
    pool: PgPool,
}

impl AuditEventRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl EventLogReader for AuditEventRepository {
    fn query<'a>(&'a self, filter: &ExportFilter) -> EventStream<'a> {
        counter!("event_store_queries_total").increment(1);

        sqlx::query_as::<_, AuditEventEntity>(SELECT_EVENTS)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.project_id)
            .bind(filter.task_id)
            .bind(filter.job_id)
            .bind(filter.org_id)
            .bind(filter.user_id)
            .fetch(&self.pool)
            .map(|row| row.map(EventRecord::from).map_err(store_error))
            .boxed()
    }
}

#[async_trait]
impl EventLogWriter for AuditEventRepository {
    async fn append(&self, events: Vec<EventRecord>) -> Result<usize, ExportError> {
        for event in &events {
            event.validate()?;
        }

        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        for event in &events {
            sqlx::query(INSERT_EVENT)
                .bind(&event.scope)
                .bind(event.timestamp)
                .bind(event.user_id)
                .bind(&event.user_name)
                .bind(&event.user_email)
                .bind(event.project_id)
                .bind(event.task_id)
                .bind(event.job_id)
                .bind(event.org_id)
                .bind(&event.org_slug)
                .bind(&event.obj_name)
                .bind(event.obj_id)
                .bind(&event.obj_val)
                .bind(&event.source)
                .bind(event.count)
                .bind(event.duration)
                .bind(&event.payload)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)?;

        histogram!("event_store_append_duration_seconds").record(start.elapsed().as_secs_f64());
        counter!("event_store_appended_total").increment(events.len() as u64);
        tracing::debug!(count = events.len(), "Appended audit events");

        Ok(events.len())
    }
}

/// Row decoding problems are serialization failures; everything else means
/// the store could not be read.
fn store_error(err: sqlx::Error) -> ExportError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            ExportError::Serialization(err.to_string())
        }
        other => ExportError::StoreUnavailable(other.to_string()),
    }
}
