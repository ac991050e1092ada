//! Scheduled re-scan loop (`spec.md` §4.10). Every `scan_interval`,
//! enumerate the index; for each manifest not already `Verified:<today>`,
//! fetch the plaintext through the normal read path (so governance sees
//! decrypted bytes), evaluate the sentinel with `OnSchedule`, apply its
//! judgment idempotently, and reindex. A `HealWithReplicaId` judgment
//! triggers `Replication::restore`; success clears `Status:Corrupt` and
//! stamps today's `Verified` tag.

use std::sync::Arc;
use std::time::Duration;

use kernel_common::error::Result;
use kernel_common::traits::{MetadataIndex, Replication, SentinelContext};
use kernel_common::Trigger;
use kernel_pipeline::{PipelineEngine, SecurityContext};
use kernel_sentinel::Sentinel;
use tokio::sync::Notify;

const VERIFIED_TAG: &str = "Verified";
const STATUS_TAG: &str = "Status";

fn today() -> String {
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .ok()
        .map(|s| s.chars().take(10).collect())
        .unwrap_or_default()
}

/// Tally from one `run_once` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: u64,
    pub skipped: u64,
    pub healed: u64,
}

pub struct SentinelDaemon {
    engine: Arc<PipelineEngine>,
    index: Arc<dyn MetadataIndex>,
    sentinel: Arc<Sentinel>,
    replication: Arc<dyn Replication>,
    system_principal: String,
    scan_interval: Duration,
    yield_between: Duration,
    shutdown: Notify,
}

impl SentinelDaemon {
    pub fn new(
        engine: Arc<PipelineEngine>,
        index: Arc<dyn MetadataIndex>,
        sentinel: Arc<Sentinel>,
        replication: Arc<dyn Replication>,
    ) -> Self {
        Self {
            engine,
            index,
            sentinel,
            replication,
            system_principal: "sentinel-daemon".to_string(),
            scan_interval: Duration::from_secs(kernel_common::DEFAULT_SCAN_INTERVAL_SECS),
            yield_between: Duration::from_millis(50),
            shutdown: Notify::new(),
        }
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_yield_between(mut self, yield_between: Duration) -> Self {
        self.yield_between = yield_between;
        self
    }

    /// One full enumeration of the index. Returns once every manifest has
    /// been visited.
    pub async fn run_once(&self) -> Result<ScanReport> {
        let manifests = self.index.enumerate_all().await?;
        let today = today();
        let mut report = ScanReport::default();

        for manifest in manifests {
            report.scanned += 1;

            if manifest.governance_tags.get(VERIFIED_TAG) == Some(&today) {
                report.skipped += 1;
                continue;
            }

            let sec = SecurityContext::new(self.system_principal.clone());
            let data = match self
                .engine
                .get_blob(&sec, &manifest.container_id, manifest.blob_name())
                .await
            {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(
                        manifest_id = %manifest.id.to_hex(),
                        error = %err,
                        "scheduled scan could not read blob, skipping"
                    );
                    tokio::time::sleep(self.yield_between).await;
                    continue;
                }
            };

            let ctx = SentinelContext {
                trigger: Trigger::OnSchedule,
                manifest: manifest.clone(),
                data: Some(data),
                principal: self.system_principal.clone(),
            };
            let judgment = self.sentinel.evaluate(&ctx).await?;

            let mut updated = manifest.clone();
            updated.tags.extend(judgment.add_tags);
            updated.governance_tags.extend(judgment.update_properties);
            if let Some(pipeline) = judgment.enforce_pipeline {
                updated.pipeline = pipeline;
            }

            if let Some(replica_id) = judgment.heal_with_replica_id.as_deref() {
                match self.replication.restore(manifest.id, replica_id).await {
                    Ok(()) => {
                        updated.governance_tags.remove(STATUS_TAG);
                        updated
                            .governance_tags
                            .insert(VERIFIED_TAG.to_string(), today.clone());
                        report.healed += 1;
                        tracing::info!(
                            manifest_id = %manifest.id.to_hex(),
                            replica_id,
                            "sentinel daemon healed manifest from replica"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            manifest_id = %manifest.id.to_hex(),
                            replica_id,
                            error = %err,
                            "replica restore failed"
                        );
                    }
                }
            } else if !judgment.block_operation {
                updated
                    .governance_tags
                    .insert(VERIFIED_TAG.to_string(), today.clone());
            }

            self.index.index_manifest(updated).await?;
            tokio::time::sleep(self.yield_between).await;
        }

        Ok(report)
    }

    /// Runs `run_once` on `scan_interval` until `shutdown` is signaled.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.scan_interval) => {
                        if let Err(err) = self.run_once().await {
                            tracing::error!(error = %err, "sentinel daemon scan pass failed");
                        }
                    }
                    _ = self.shutdown.notified() => {
                        tracing::info!("sentinel daemon shutting down");
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
