//! Export retention sweep job.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::services::ExportEngine;

/// Periodically forgets expired export jobs, deletes their files and reports
/// slow running jobs.
pub struct ExportSweepJob {
    engine: Arc<ExportEngine>,
    interval_secs: u64,
}

impl ExportSweepJob {
    pub fn new(engine: Arc<ExportEngine>, interval_secs: u64) -> Self {
        Self {
            engine,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for ExportSweepJob {
    fn name(&self) -> &'static str {
        "export_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let report = self.engine.sweep(Utc::now()).await;
        if report.expired > 0 || report.orphans_removed > 0 || report.slow > 0 {
            info!(
                expired = report.expired,
                artifacts_removed = report.artifacts_removed,
                orphans_removed = report.orphans_removed,
                slow = report.slow,
                "Export sweep finished"
            );
        }
        Ok(())
    }
}
