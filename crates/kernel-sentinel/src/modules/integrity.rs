//! Integrity checker: recomputes the SHA-256 checksum on `OnRead`/
//! `OnSchedule` triggers. A mismatch marks the manifest `Status:Corrupt`,
//! blocks the operation, and proposes healing from a replica if the
//! manifest carries a `Replica:*` tag.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{Alert, Judgment, SentinelContext, SentinelModule, Severity};
use kernel_common::Trigger;
use sha2::{Digest, Sha256};

pub struct IntegrityChecker;

impl IntegrityChecker {
    pub fn new() -> Self {
        Self
    }

    fn replica_id(ctx: &SentinelContext) -> Option<String> {
        ctx.manifest
            .tags
            .iter()
            .find(|(key, _)| key.starts_with("Replica:"))
            .map(|(_, value)| value.clone())
    }
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelModule for IntegrityChecker {
    fn name(&self) -> &str {
        "integrity"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            if !matches!(ctx.trigger, Trigger::OnRead | Trigger::OnSchedule) {
                return Ok(Judgment::default());
            }
            let Some(data) = ctx.data.as_ref() else {
                return Ok(Judgment::default());
            };

            let actual = hex::encode(Sha256::digest(data));
            if actual == ctx.manifest.checksum {
                return Ok(Judgment::default());
            }

            let mut judgment = Judgment {
                block_operation: true,
                intervention_required: true,
                heal_with_replica_id: Self::replica_id(ctx),
                alert: Some(Alert {
                    code: "CHECKSUM_MISMATCH".to_string(),
                    severity: Severity::Critical,
                    message: format!(
                        "manifest {} checksum mismatch: expected {}, computed {actual}",
                        ctx.manifest.id.to_hex(),
                        ctx.manifest.checksum
                    ),
                }),
                ..Judgment::default()
            };
            judgment
                .update_properties
                .insert("Status".to_string(), "Corrupt".to_string());
            Ok(judgment)
        })
    }
}
