//! GDPR guardrail: blocks writes of user-tagged content into the `public`
//! container.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{Alert, Judgment, SentinelContext, SentinelModule, Severity};
use kernel_common::Trigger;

const PUBLIC_CONTAINER: &str = "public";

/// A manifest is "user-tagged" when it carries a `contains_pii` tag set to
/// `true` — the same tag the PII detector writes, so a prior `OnWrite`
/// pass's judgment merges into the tags this module reads on subsequent
/// triggers.
pub struct GdprModule;

impl GdprModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GdprModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelModule for GdprModule {
    fn name(&self) -> &str {
        "gdpr"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            let is_user_tagged = ctx.manifest.tags.get("contains_pii").map(String::as_str) == Some("true");
            if ctx.trigger != Trigger::OnWrite
                || ctx.manifest.container_id != PUBLIC_CONTAINER
                || !is_user_tagged
            {
                return Ok(Judgment::default());
            }

            Ok(Judgment {
                block_operation: true,
                intervention_required: true,
                alert: Some(Alert {
                    code: "GDPR_PUBLIC_WRITE".to_string(),
                    severity: Severity::Critical,
                    message: format!(
                        "blocked write of user-tagged content to container {PUBLIC_CONTAINER:?}"
                    ),
                }),
                ..Judgment::default()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_common::policy::Pipeline;
    use kernel_common::{Manifest, ManifestId, Tier};
    use std::collections::HashMap;

    fn ctx(container_id: &str, user_tagged: bool, trigger: Trigger) -> SentinelContext {
        let mut tags = HashMap::new();
        if user_tagged {
            tags.insert("contains_pii".to_string(), "true".to_string());
        }
        SentinelContext {
            trigger,
            manifest: Manifest {
                id: ManifestId::new(),
                container_id: container_id.into(),
                blob_uri: format!("file://{container_id}/a.txt"),
                size_bytes: 0,
                created_at: 1,
                last_accessed_at: 1,
                owner_id: "o".into(),
                checksum: "x".into(),
                etag: "e".into(),
                pipeline: Pipeline::default(),
                tags,
                governance_tags: HashMap::new(),
                vector_embedding: None,
                content_summary: None,
                current_tier: Tier::Hot,
            },
            data: None,
            principal: "alice".into(),
        }
    }

    #[tokio::test]
    async fn blocks_user_tagged_write_to_public() {
        let gdpr = GdprModule::new();
        let judgment = gdpr.analyze(&ctx("public", true, Trigger::OnWrite)).await.unwrap();
        assert!(judgment.block_operation);
    }

    #[tokio::test]
    async fn allows_user_tagged_write_to_private_container() {
        let gdpr = GdprModule::new();
        let judgment = gdpr.analyze(&ctx("private", true, Trigger::OnWrite)).await.unwrap();
        assert!(!judgment.block_operation);
    }

    #[tokio::test]
    async fn allows_untagged_write_to_public() {
        let gdpr = GdprModule::new();
        let judgment = gdpr.analyze(&ctx("public", false, Trigger::OnWrite)).await.unwrap();
        assert!(!judgment.block_operation);
    }

    #[tokio::test]
    async fn only_applies_to_write_triggers() {
        let gdpr = GdprModule::new();
        let judgment = gdpr.analyze(&ctx("public", true, Trigger::OnRead)).await.unwrap();
        assert!(!judgment.block_operation);
    }
}
