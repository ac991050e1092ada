//! Orphan reclamation pass (`spec.md` §4.11). One pass: collect every
//! `BlobUri` the index still references, then for each storage backend
//! that supports listing, delete anything on disk that the index no
//! longer points to. Per-blob failures are logged; the pass continues.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kernel_common::error::Result;
use kernel_common::traits::{MetadataIndex, StorageBackend};
use tokio::sync::Notify;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacuumReport {
    pub deleted_count: u64,
    pub reclaimed_bytes: u64,
    pub duration: Duration,
}

pub struct DataVacuum {
    index: Arc<dyn MetadataIndex>,
    backends: Vec<Arc<dyn StorageBackend>>,
    shutdown: Notify,
}

impl DataVacuum {
    pub fn new(index: Arc<dyn MetadataIndex>, backends: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self {
            index,
            backends,
            shutdown: Notify::new(),
        }
    }

    pub async fn run_once(&self) -> Result<VacuumReport> {
        let started = Instant::now();
        let valid_uris: HashSet<String> = self
            .index
            .enumerate_all()
            .await?
            .into_iter()
            .map(|m| m.blob_uri)
            .collect();

        let mut deleted_count = 0u64;
        let mut reclaimed_bytes = 0u64;

        for backend in &self.backends {
            if !backend.supports_listing() {
                continue;
            }
            let entries = match backend.list().await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(
                        scheme = backend.scheme(),
                        error = %err,
                        "vacuum could not list backend, skipping"
                    );
                    continue;
                }
            };

            for (uri, size) in entries {
                if valid_uris.contains(&uri) {
                    continue;
                }
                match backend.delete(&uri).await {
                    Ok(()) => {
                        deleted_count += 1;
                        reclaimed_bytes += size;
                    }
                    Err(err) => {
                        tracing::warn!(uri = %uri, error = %err, "vacuum failed to delete orphan");
                    }
                }
            }
        }

        Ok(VacuumReport {
            deleted_count,
            reclaimed_bytes,
            duration: started.elapsed(),
        })
    }

    /// Runs `run_once` on `interval` until `shutdown` is signaled.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match self.run_once().await {
                            Ok(report) => tracing::info!(
                                deleted = report.deleted_count,
                                reclaimed_bytes = report.reclaimed_bytes,
                                duration_ms = report.duration.as_millis() as u64,
                                "vacuum pass complete"
                            ),
                            Err(err) => tracing::error!(error = %err, "vacuum pass failed"),
                        }
                    }
                    _ = self.shutdown.notified() => {
                        tracing::info!("data vacuum shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
