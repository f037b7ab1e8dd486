//! Delivery of finished CSV files.
//!
//! Every export is first written to a staging file. Delivery then either
//! promotes it to the artifact directory for download or uploads it to cloud
//! storage and discards the local copy.

use domain::errors::ExportError;
use domain::models::export::EXPORT_JOB_ID_PREFIX;
use domain::models::{ArtifactHandle, Delivery, JobResult};
use domain::services::CloudStorage;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

const STAGING_DIR: &str = ".staging";

/// Routes staged files to their destination.
#[derive(Clone)]
pub struct DeliveryBackend {
    artifact_dir: PathBuf,
    cloud: Arc<dyn CloudStorage>,
}

impl DeliveryBackend {
    pub fn new(artifact_dir: impl Into<PathBuf>, cloud: Arc<dyn CloudStorage>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            cloud,
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Where a job writes its CSV before delivery.
    pub fn staging_path(&self, job_id: &str) -> PathBuf {
        self.artifact_dir
            .join(STAGING_DIR)
            .join(format!("{}.csv.part", job_id))
    }

    /// Final location of a downloadable file.
    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        self.artifact_dir.join(format!("{}.csv", job_id))
    }

    /// Create the artifact and staging directories.
    pub async fn prepare(&self) -> Result<(), ExportError> {
        tokio::fs::create_dir_all(self.artifact_dir.join(STAGING_DIR))
            .await
            .map_err(|e| {
                ExportError::DeliveryFailed(format!(
                    "cannot create artifact directory {}: {}",
                    self.artifact_dir.display(),
                    e
                ))
            })
    }

    /// Delete artifact and staging files whose job is not in `live` and that
    /// were last modified before `cutoff`. Covers files left behind by an
    /// earlier process. Returns the number of files removed.
    pub async fn remove_orphans(&self, live: &HashSet<String>, cutoff: SystemTime) -> usize {
        let mut removed = 0;
        let locations = [
            (self.artifact_dir.clone(), ".csv"),
            (self.artifact_dir.join(STAGING_DIR), ".csv.part"),
        ];

        for (dir, suffix) in locations {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(dir = %dir.display(), error = %e, "Cannot scan export directory");
                    }
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Export directory scan aborted");
                        break;
                    }
                };
                let file_name = entry.file_name();
                let Some(job_id) = file_name.to_str().and_then(|name| name.strip_suffix(suffix))
                else {
                    continue;
                };
                if !job_id.starts_with(EXPORT_JOB_ID_PREFIX) || live.contains(job_id) {
                    continue;
                }
                let Ok(metadata) = entry.metadata().await else {
                    continue;
                };
                let stale = metadata.is_file()
                    && metadata.modified().is_ok_and(|modified| modified < cutoff);
                if stale {
                    discard(&entry.path()).await;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, "Removed orphaned export files");
        }
        removed
    }

    /// Move a staged file to its destination.
    ///
    /// The staging file never outlives this call on the cloud path.
    pub async fn deliver(
        &self,
        job_id: &str,
        staged: &Path,
        delivery: &Delivery,
        size_bytes: u64,
    ) -> Result<JobResult, ExportError> {
        match delivery {
            Delivery::Download { filename } => {
                let path = self.artifact_path(job_id);
                tokio::fs::rename(staged, &path).await.map_err(|e| {
                    ExportError::DeliveryFailed(format!("cannot promote staged file: {}", e))
                })?;
                info!(job_id = %job_id, path = %path.display(), size_bytes, "Export ready for download");
                Ok(JobResult::Downloadable(ArtifactHandle {
                    path,
                    filename: filename.clone(),
                    size_bytes,
                }))
            }
            Delivery::CloudUpload { bucket, key } => {
                let body = tokio::fs::read(staged).await;
                discard(staged).await;
                let body = body.map_err(|e| {
                    ExportError::DeliveryFailed(format!("cannot read staged file: {}", e))
                })?;

                if let Err(err) = self.cloud.put_object(bucket, key, body).await {
                    if let Err(cleanup) = self.cloud.delete_object(bucket, key).await {
                        warn!(job_id = %job_id, bucket = %bucket, key = %key, error = %cleanup, "Failed to remove partial object");
                    }
                    return Err(ExportError::DeliveryFailed(err.to_string()));
                }

                info!(job_id = %job_id, bucket = %bucket, key = %key, size_bytes, "Export uploaded to cloud storage");
                Ok(JobResult::DeliveredExternally {
                    bucket: bucket.clone(),
                    key: key.clone(),
                })
            }
        }
    }
}

/// Remove a file, ignoring a missing one.
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove export file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::services::InMemoryObjectStore;

    async fn staged(backend: &DeliveryBackend, job_id: &str, body: &[u8]) -> PathBuf {
        backend.prepare().await.unwrap();
        let path = backend.staging_path(job_id);
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_download_promotes_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DeliveryBackend::new(dir.path(), Arc::new(InMemoryObjectStore::new()));
        let path = staged(&backend, "events_a", b"scope\r\n").await;

        let result = backend
            .deliver(
                "events_a",
                &path,
                &Delivery::Download {
                    filename: "events.csv".to_string(),
                },
                7,
            )
            .await
            .unwrap();

        let JobResult::Downloadable(handle) = result else {
            panic!("expected a downloadable result");
        };
        assert_eq!(handle.path, backend.artifact_path("events_a"));
        assert_eq!(handle.filename, "events.csv");
        assert_eq!(tokio::fs::read(&handle.path).await.unwrap(), b"scope\r\n");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cloud_upload_removes_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        let backend = DeliveryBackend::new(dir.path(), store.clone());
        let path = staged(&backend, "events_b", b"scope\r\n").await;

        let result = backend
            .deliver(
                "events_b",
                &path,
                &Delivery::CloudUpload {
                    bucket: "import-export".to_string(),
                    key: "test.csv".to_string(),
                },
                7,
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            JobResult::DeliveredExternally {
                bucket: "import-export".to_string(),
                key: "test.csv".to_string()
            }
        );
        assert_eq!(
            store.get_object("import-export", "test.csv"),
            Some(b"scope\r\n".to_vec())
        );
        assert!(!path.exists());
        assert!(!backend.artifact_path("events_b").exists());
    }

    #[tokio::test]
    async fn test_cloud_failure_leaves_no_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        store.set_failing(true);
        let backend = DeliveryBackend::new(dir.path(), store.clone());
        let path = staged(&backend, "events_c", b"scope\r\n").await;

        let result = backend
            .deliver(
                "events_c",
                &path,
                &Delivery::CloudUpload {
                    bucket: "import-export".to_string(),
                    key: "test.csv".to_string(),
                },
                7,
            )
            .await;

        assert!(matches!(result, Err(ExportError::DeliveryFailed(_))));
        assert!(store.get_object("import-export", "test.csv").is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_orphans_keeps_live_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DeliveryBackend::new(dir.path(), Arc::new(InMemoryObjectStore::new()));
        backend.prepare().await.unwrap();

        let orphan = backend.artifact_path("events_old");
        let live = backend.artifact_path("events_live");
        let partial = staged(&backend, "events_crashed", b"scope").await;
        let foreign = dir.path().join("notes.csv");
        for path in [&orphan, &live, &foreign] {
            tokio::fs::write(path, b"scope\r\n").await.unwrap();
        }

        let owned: HashSet<String> = ["events_live".to_string()].into_iter().collect();

        // Nothing is older than a cutoff in the past.
        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        assert_eq!(backend.remove_orphans(&owned, past).await, 0);
        assert!(orphan.exists());

        let future = SystemTime::now() + std::time::Duration::from_secs(3600);
        assert_eq!(backend.remove_orphans(&owned, future).await, 2);
        assert!(!orphan.exists());
        assert!(!partial.exists());
        assert!(live.exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn test_remove_orphans_without_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DeliveryBackend::new(
            dir.path().join("missing"),
            Arc::new(InMemoryObjectStore::new()),
        );
        assert_eq!(
            backend
                .remove_orphans(&HashSet::new(), SystemTime::now())
                .await,
            0
        );
    }
}
