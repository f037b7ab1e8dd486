//! Export job engine.
//!
//! Owns the job registry, runs each export as its own task and answers
//! create/poll/retrieve for both protocol generations.
//!
//! Registry layout: `jobs` maps id → entry, `active` maps request fingerprint
//! → id for jobs that are still Pending or Running. Both maps change only
//! under the registry lock, so two identical requests can never start two
//! executions. Per-job state lives in a `watch` channel so waiters can block
//! on completion without touching the registry.

use chrono::{DateTime, Utc};
use domain::errors::ExportError;
use domain::models::export::EXPORT_JOB_ID_PREFIX;
use domain::models::{
    ArtifactHandle, Delivery, ExportFilter, ExportJobState, ExportRequest, JobResult, JobSnapshot,
};
use domain::services::{write_event_stream, EventLogReader};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use shared::crypto::generate_token;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufWriter;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::services::delivery::{discard, DeliveryBackend};

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// How long a terminal job stays observable after finishing or its last poll.
    pub retention: Duration,
    /// Running jobs older than this are reported once by `sweep`.
    pub slow_job_threshold: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(86_400),
            slow_job_threshold: Duration::from_secs(300),
        }
    }
}

/// Result of `create_or_attach`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub job_id: String,
    /// False when the request attached to an already active job.
    pub created: bool,
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub artifacts_removed: usize,
    /// Files in the artifact directory that no live job owns.
    pub orphans_removed: usize,
    pub slow: usize,
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
struct JobStatus {
    state: ExportJobState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    result: Option<JobResult>,
    error: Option<ExportError>,
    row_count: Option<u64>,
}

struct JobEntry {
    id: String,
    fingerprint: String,
    filter: ExportFilter,
    delivery: Delivery,
    created_at: DateTime<Utc>,
    status: watch::Sender<JobStatus>,
    observed_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    slow_warned: AtomicBool,
}

impl JobEntry {
    fn new(id: String, request: ExportRequest, now: DateTime<Utc>) -> Self {
        let fingerprint = request.fingerprint();
        let (status, _) = watch::channel(JobStatus {
            state: ExportJobState::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            row_count: None,
        });
        Self {
            id,
            fingerprint,
            filter: request.filter,
            delivery: request.delivery,
            created_at: now,
            status,
            observed_at: std::sync::Mutex::new(None),
            slow_warned: AtomicBool::new(false),
        }
    }

    fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Apply a forward transition; out-of-order updates are dropped.
    fn transition(&self, next: ExportJobState, update: impl FnOnce(&mut JobStatus)) -> bool {
        self.status.send_if_modified(|status| {
            if !status.state.can_transition_to(next) {
                warn!(job_id = %self.id, from = %status.state, to = %next, "Rejected job state transition");
                return false;
            }
            status.state = next;
            update(status);
            true
        })
    }

    fn observe(&self, now: DateTime<Utc>) {
        let mut observed = self
            .observed_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *observed = Some(observed.map_or(now, |previous| previous.max(now)));
    }

    /// Terminal jobs expire `retention` after their latest finish or observation.
    fn expires_at(&self, status: &JobStatus, retention: chrono::Duration) -> Option<DateTime<Utc>> {
        if !status.state.is_terminal() {
            return None;
        }
        let observed = *self
            .observed_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let anchor = match (status.finished_at, observed) {
            (Some(finished), Some(observed)) => finished.max(observed),
            (finished, observed) => finished.or(observed).unwrap_or(self.created_at),
        };
        Some(anchor + retention)
    }

    fn is_expired(&self, status: &JobStatus, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.expires_at(status, retention)
            .is_some_and(|expires_at| now > expires_at)
    }

    fn snapshot(&self, status: JobStatus, retention: chrono::Duration) -> JobSnapshot {
        let expires_at = self.expires_at(&status, retention);
        JobSnapshot {
            id: self.id.clone(),
            state: status.state,
            filter: self.filter.clone(),
            delivery: self.delivery.clone(),
            created_at: self.created_at,
            started_at: status.started_at,
            finished_at: status.finished_at,
            expires_at,
            result: status.result,
            error: status.error,
            row_count: status.row_count,
        }
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, Arc<JobEntry>>,
    active: HashMap<String, String>,
}

/// Asynchronous CSV export engine.
pub struct ExportEngine {
    reader: Arc<dyn EventLogReader>,
    delivery: DeliveryBackend,
    settings: EngineSettings,
    registry: Mutex<Registry>,
}

impl ExportEngine {
    pub fn new(
        reader: Arc<dyn EventLogReader>,
        delivery: DeliveryBackend,
        settings: EngineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            reader,
            delivery,
            settings,
            registry: Mutex::new(Registry::default()),
        })
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    fn retention(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365))
    }

    /// Return the active job for an identical request, or start a new one.
    pub async fn create_or_attach(self: &Arc<Self>, request: ExportRequest) -> JobTicket {
        let fingerprint = request.fingerprint();
        let mode = request.delivery.mode();

        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.active.get(&fingerprint) {
            counter!("audit_export_requests_total", "outcome" => "attached").increment(1);
            info!(job_id = %existing, "Attached export request to active job");
            return JobTicket {
                job_id: existing.clone(),
                created: false,
            };
        }

        let job_id = generate_token(EXPORT_JOB_ID_PREFIX);
        let entry = Arc::new(JobEntry::new(job_id.clone(), request, Utc::now()));
        registry.jobs.insert(job_id.clone(), Arc::clone(&entry));
        registry.active.insert(fingerprint, job_id.clone());
        drop(registry);

        counter!("audit_export_requests_total", "outcome" => "created").increment(1);
        counter!("audit_export_jobs_total", "mode" => mode.to_string()).increment(1);
        info!(job_id = %job_id, mode = %mode, "Export job created");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_job(entry).await;
        });

        JobTicket {
            job_id,
            created: true,
        }
    }

    /// Current state of a job. Observing a terminal job extends its retention.
    pub async fn poll(&self, job_id: &str) -> Result<JobSnapshot, ExportError> {
        self.poll_at(job_id, Utc::now()).await
    }

    async fn poll_at(&self, job_id: &str, now: DateTime<Utc>) -> Result<JobSnapshot, ExportError> {
        let entry = self.lookup(job_id).await?;
        let status = entry.status();

        if status.state.is_terminal() {
            if entry.is_expired(&status, now, self.retention()) {
                return Err(ExportError::UnknownJob(job_id.to_string()));
            }
            entry.observe(now);
        }

        Ok(entry.snapshot(status, self.retention()))
    }

    /// The downloadable file of a finished job.
    pub async fn retrieve(&self, job_id: &str) -> Result<ArtifactHandle, ExportError> {
        let snapshot = self.poll(job_id).await?;

        if matches!(snapshot.delivery, Delivery::CloudUpload { .. }) {
            return Err(ExportError::NoLocalArtifact(job_id.to_string()));
        }

        match snapshot.state {
            ExportJobState::Pending | ExportJobState::Running => {
                Err(ExportError::NotReady(job_id.to_string()))
            }
            ExportJobState::Failed => Err(ExportError::JobFailed(
                snapshot
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown cause".to_string()),
            )),
            ExportJobState::Finished => match snapshot.result {
                Some(JobResult::Downloadable(handle)) => Ok(handle),
                _ => Err(ExportError::NoLocalArtifact(job_id.to_string())),
            },
        }
    }

    /// Wait up to `timeout` for a job to reach a terminal state, then poll it.
    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<JobSnapshot, ExportError> {
        let entry = self.lookup(job_id).await?;
        let mut rx = entry.status.subscribe();
        drop(entry);

        let reached = match tokio::time::timeout(timeout, rx.wait_for(|s| s.state.is_terminal())).await {
            Ok(Ok(_)) => true,
            _ => false,
        };
        if !reached {
            tracing::debug!(job_id = %job_id, ?timeout, "Job still running after wait");
        }

        self.poll(job_id).await
    }

    /// Live jobs ordered by creation time. Does not extend retention.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let now = Utc::now();
        let retention = self.retention();
        let registry = self.registry.lock().await;

        let mut snapshots: Vec<JobSnapshot> = registry
            .jobs
            .values()
            .filter_map(|entry| {
                let status = entry.status();
                if entry.is_expired(&status, now, retention) {
                    None
                } else {
                    Some(entry.snapshot(status, retention))
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    pub async fn stats(&self) -> EngineStats {
        let registry = self.registry.lock().await;
        let mut stats = EngineStats::default();
        for entry in registry.jobs.values() {
            match entry.status.borrow().state {
                ExportJobState::Pending => stats.pending += 1,
                ExportJobState::Running => stats.running += 1,
                ExportJobState::Finished => stats.finished += 1,
                ExportJobState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Forget expired jobs, delete their files and flag slow jobs once.
    /// Files older than the retention window that belong to no live job,
    /// such as those of a previous process, are deleted as well.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = self.retention();
        let slow_threshold = chrono::Duration::from_std(self.settings.slow_job_threshold)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let mut report = SweepReport::default();

        let mut registry = self.registry.lock().await;
        let expired: Vec<String> = registry
            .jobs
            .values()
            .filter(|entry| entry.is_expired(&entry.status(), now, retention))
            .map(|entry| entry.id.clone())
            .collect();

        let removed: Vec<Arc<JobEntry>> = expired
            .iter()
            .filter_map(|id| registry.jobs.remove(id))
            .collect();

        for entry in registry.jobs.values() {
            let status = entry.status();
            let Some(started_at) = status.started_at else {
                continue;
            };
            if status.state == ExportJobState::Running
                && now - started_at > slow_threshold
                && !entry.slow_warned.swap(true, Ordering::SeqCst)
            {
                report.slow += 1;
                warn!(
                    job_id = %entry.id,
                    running_secs = (now - started_at).num_seconds(),
                    "Export job exceeds slow job threshold"
                );
            }
        }
        let live: HashSet<String> = registry.jobs.keys().cloned().collect();
        drop(registry);

        for entry in &removed {
            if let Some(JobResult::Downloadable(handle)) = entry.status().result {
                discard(&handle.path).await;
                report.artifacts_removed += 1;
            }
        }
        report.expired = removed.len();
        report.orphans_removed = self
            .delivery
            .remove_orphans(&live, (now - retention).into())
            .await;

        gauge!("audit_export_jobs_live").set(live.len() as f64);
        if report.expired > 0 {
            counter!("audit_export_jobs_expired_total").increment(report.expired as u64);
            info!(
                expired = report.expired,
                artifacts_removed = report.artifacts_removed,
                "Expired export jobs removed"
            );
        }
        report
    }

    async fn lookup(&self, job_id: &str) -> Result<Arc<JobEntry>, ExportError> {
        self.registry
            .lock()
            .await
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| ExportError::UnknownJob(job_id.to_string()))
    }

    async fn run_job(self: Arc<Self>, entry: Arc<JobEntry>) {
        let started_at = Utc::now();
        entry.transition(ExportJobState::Running, |status| {
            status.started_at = Some(started_at);
        });
        gauge!("audit_export_jobs_running").increment(1.0);

        let outcome = self.execute(&entry).await;
        let finished_at = Utc::now();
        let elapsed = (finished_at - started_at).to_std().unwrap_or_default();

        // Leaving the active map and publishing the terminal state happen
        // together so no request can attach to a job that is already done.
        let mut registry = self.registry.lock().await;
        if registry.active.get(&entry.fingerprint) == Some(&entry.id) {
            registry.active.remove(&entry.fingerprint);
        }
        let state = match outcome {
            Ok((result, rows)) => {
                entry.transition(ExportJobState::Finished, |status| {
                    status.finished_at = Some(finished_at);
                    status.result = Some(result);
                    status.row_count = Some(rows);
                });
                counter!("audit_export_rows_total").increment(rows);
                info!(job_id = %entry.id, rows, elapsed_ms = elapsed.as_millis() as u64, "Export job finished");
                ExportJobState::Finished
            }
            Err(err) => {
                error!(job_id = %entry.id, kind = err.kind(), error = %err, "Export job failed");
                entry.transition(ExportJobState::Failed, |status| {
                    status.finished_at = Some(finished_at);
                    status.error = Some(err);
                });
                ExportJobState::Failed
            }
        };
        drop(registry);

        gauge!("audit_export_jobs_running").decrement(1.0);
        histogram!("audit_export_job_duration_seconds", "state" => state.to_string())
            .record(elapsed.as_secs_f64());
    }

    async fn execute(&self, entry: &JobEntry) -> Result<(JobResult, u64), ExportError> {
        self.delivery.prepare().await?;
        let staging = self.delivery.staging_path(&entry.id);

        let file = tokio::fs::File::create(&staging).await.map_err(|e| {
            ExportError::DeliveryFailed(format!("cannot create staging file: {}", e))
        })?;

        let events = self.reader.query(&entry.filter);
        let summary = match write_event_stream(events, BufWriter::new(file)).await {
            Ok(summary) => summary,
            Err(err) => {
                discard(&staging).await;
                return Err(err);
            }
        };

        let result = match self
            .delivery
            .deliver(&entry.id, &staging, &entry.delivery, summary.bytes)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                discard(&staging).await;
                return Err(err);
            }
        };

        Ok((result, summary.rows))
    }
}
