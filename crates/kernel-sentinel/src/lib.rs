//! Governance judgment engine (`spec.md` §4.8). [`Sentinel::evaluate`] fans
//! a [`SentinelContext`] out to every registered [`SentinelModule`] and
//! merges the resulting [`Judgment`]s left-to-right using
//! [`kernel_common::traits::Judgment::merge`] — block is sticky, tag sets
//! union, property updates last-writer-wins, the first non-nil
//! `EnforcePipeline` wins, alerts aggregate by severity max.

pub mod modules;

use std::sync::{Arc, RwLock};

use kernel_common::error::Result;
use kernel_common::traits::{Judgment, SentinelContext, SentinelModule};

#[derive(Default)]
pub struct Sentinel {
    modules: RwLock<Vec<Arc<dyn SentinelModule>>>,
}

impl Sentinel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: Arc<dyn SentinelModule>) {
        self.modules.write().unwrap().push(module);
    }

    pub async fn evaluate(&self, ctx: &SentinelContext) -> Result<Judgment> {
        let modules: Vec<Arc<dyn SentinelModule>> = self.modules.read().unwrap().clone();
        let mut judgment = Judgment::default();
        for module in modules {
            let next = module.analyze(ctx).await?;
            tracing::debug!(module = module.name(), block = next.block_operation, "sentinel module evaluated");
            judgment = judgment.merge(next);
        }
        Ok(judgment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use kernel_common::policy::Pipeline;
    use kernel_common::traits::{Alert, Severity};
    use kernel_common::{Manifest, ManifestId, Tier, Trigger};
    use std::collections::HashMap;

    struct AlwaysBlocks;
    impl SentinelModule for AlwaysBlocks {
        fn name(&self) -> &str {
            "always-blocks"
        }
        fn analyze<'a>(&'a self, _ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
            Box::pin(async move {
                Ok(Judgment {
                    block_operation: true,
                    ..Judgment::default()
                })
            })
        }
    }

    struct AddsTag(&'static str, &'static str);
    impl SentinelModule for AddsTag {
        fn name(&self) -> &str {
            "adds-tag"
        }
        fn analyze<'a>(&'a self, _ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
            Box::pin(async move {
                Ok(Judgment {
                    add_tags: HashMap::from([(self.0.to_string(), self.1.to_string())]),
                    ..Judgment::default()
                })
            })
        }
    }

    struct RaisesAlert(Severity);
    impl SentinelModule for RaisesAlert {
        fn name(&self) -> &str {
            "raises-alert"
        }
        fn analyze<'a>(&'a self, _ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
            Box::pin(async move {
                Ok(Judgment {
                    alert: Some(Alert {
                        code: "TEST".into(),
                        severity: self.0,
                        message: "test alert".into(),
                    }),
                    ..Judgment::default()
                })
            })
        }
    }

    fn ctx() -> SentinelContext {
        SentinelContext {
            trigger: Trigger::OnWrite,
            manifest: Manifest {
                id: ManifestId::new(),
                container_id: "c1".into(),
                blob_uri: "file://c1/a.txt".into(),
                size_bytes: 10,
                created_at: 1,
                last_accessed_at: 1,
                owner_id: "o".into(),
                checksum: "abc".into(),
                etag: "e".into(),
                pipeline: Pipeline::default(),
                tags: HashMap::new(),
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
    async fn block_from_any_module_is_sticky() {
        let sentinel = Sentinel::new();
        sentinel.register(Arc::new(AddsTag("k", "v")));
        sentinel.register(Arc::new(AlwaysBlocks));
        let judgment = sentinel.evaluate(&ctx()).await.unwrap();
        assert!(judgment.block_operation);
        assert_eq!(judgment.add_tags.get("k"), Some(&"v".to_string()));
    }

    #[tokio::test]
    async fn tags_from_multiple_modules_union() {
        let sentinel = Sentinel::new();
        sentinel.register(Arc::new(AddsTag("a", "1")));
        sentinel.register(Arc::new(AddsTag("b", "2")));
        let judgment = sentinel.evaluate(&ctx()).await.unwrap();
        assert_eq!(judgment.add_tags.len(), 2);
    }

    #[tokio::test]
    async fn higher_severity_alert_wins() {
        let sentinel = Sentinel::new();
        sentinel.register(Arc::new(RaisesAlert(Severity::Info)));
        sentinel.register(Arc::new(RaisesAlert(Severity::Critical)));
        let judgment = sentinel.evaluate(&ctx()).await.unwrap();
        assert_eq!(judgment.alert.unwrap().severity, Severity::Critical);
    }

    #[tokio::test]
    async fn no_modules_yields_an_empty_judgment() {
        let sentinel = Sentinel::new();
        let judgment = sentinel.evaluate(&ctx()).await.unwrap();
        assert!(!judgment.block_operation);
        assert!(judgment.alert.is_none());
    }
}
