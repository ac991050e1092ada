//! Policy hierarchy and pipeline optimization (`spec.md` §4.6).
//!
//! [`PolicyEnforcer`] resolves a `container_id`/`blob_name` pair to a
//! [`kernel_common::Pipeline`] by walking a path hierarchy — exact
//! `container/blob`, parent folders upward, container, global default,
//! first hit wins — and handing the resolved [`kernel_common::StorageIntent`]
//! to [`PipelineOptimizer`], which selects concrete transformation plugins
//! by step name, preference match, and quality level.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kernel_common::policy::{Compression, Security, StorageIntent};
use kernel_common::traits::{PolicyEvaluator, Transformation};
use kernel_common::Pipeline;

/// What a stored policy overrides at a path pattern. Either field may be
/// absent — an override only replaces what it specifies, falling back to
/// the enforcer's default intent / the optimizer's default order
/// otherwise.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub intent: Option<StorageIntent>,
    pub pipeline_order: Option<Vec<String>>,
}

#[derive(Default)]
pub struct PolicyEnforcer {
    policies: RwLock<HashMap<String, PolicyConfig>>,
    default_intent: StorageIntent,
    transformations: RwLock<Vec<Arc<dyn Transformation>>>,
}

fn candidate_patterns(container_id: &str, blob_name: &str) -> Vec<String> {
    let mut patterns = vec![format!("{container_id}/{blob_name}")];

    let mut segments: Vec<&str> = blob_name.split('/').collect();
    while segments.len() > 1 {
        segments.pop();
        patterns.push(format!("{container_id}/{}", segments.join("/")));
    }

    patterns.push(container_id.to_string());
    patterns.push("*".to_string());
    patterns
}

impl PolicyEnforcer {
    pub fn new(default_intent: StorageIntent) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            default_intent,
            transformations: RwLock::new(Vec::new()),
        }
    }

    /// Stores `config` at `pattern`, replacing any prior policy at the
    /// same pattern.
    pub fn set_policy(&self, pattern: impl Into<String>, config: PolicyConfig) {
        self.policies.write().unwrap().insert(pattern.into(), config);
    }

    pub fn register_transformation(&self, plugin: Arc<dyn Transformation>) {
        self.transformations.write().unwrap().push(plugin);
    }

    fn resolve_config(&self, container_id: &str, blob_name: &str) -> Option<PolicyConfig> {
        let policies = self.policies.read().unwrap();
        candidate_patterns(container_id, blob_name)
            .iter()
            .find_map(|pattern| policies.get(pattern).cloned())
    }
}

impl PolicyEvaluator for PolicyEnforcer {
    fn resolve(&self, container_id: &str, blob_name: &str) -> Pipeline {
        let config = self.resolve_config(container_id, blob_name);
        let intent = config
            .as_ref()
            .and_then(|c| c.intent)
            .unwrap_or(self.default_intent);
        let order_override = config.as_ref().and_then(|c| c.pipeline_order.clone());
        let transformations = self.transformations.read().unwrap();
        PipelineOptimizer::optimize(&intent, &transformations, order_override.as_deref())
    }
}

fn compression_quality(compression: Compression) -> u32 {
    match compression {
        Compression::None => 0,
        Compression::Fast => 1,
        Compression::Optimal => 2,
        Compression::High => 3,
    }
}

fn security_quality(security: Security) -> u32 {
    match security {
        Security::None => 0,
        Security::Standard => 1,
        Security::High => 2,
        Security::Quantum => 3,
    }
}

/// Maps a [`StorageIntent`] to a concrete [`Pipeline`]. `spec.md` §4.6.
pub struct PipelineOptimizer;

impl PipelineOptimizer {
    pub fn optimize(
        intent: &StorageIntent,
        transformations: &[Arc<dyn Transformation>],
        order_override: Option<&[String]>,
    ) -> Pipeline {
        let transformation_order = order_override
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| vec!["Compression".to_string(), "Encryption".to_string()]);

        let compression = (intent.compression != Compression::None)
            .then(|| Self::select(transformations, "Compression", compression_quality(intent.compression)))
            .flatten();
        let encryption = (intent.security != Security::None)
            .then(|| Self::select(transformations, "Encryption", security_quality(intent.security)))
            .flatten();

        Pipeline {
            transformation_order,
            enable_compression: compression.is_some(),
            enable_encryption: encryption.is_some(),
            compression_provider_id: compression.map(|p| p.plugin_id().to_string()),
            crypto_provider_id: encryption.map(|p| p.plugin_id().to_string()),
            key_id: None,
        }
    }

    /// Among plugins filling `step`, prefer one whose `quality_level`
    /// matches the caller's requested level; among ties, the highest
    /// `quality_level` wins. `bool` orders `false < true`, so the tuple
    /// key naturally encodes "(matches preference, descending quality)".
    fn select(
        transformations: &[Arc<dyn Transformation>],
        step: &str,
        preferred_quality: u32,
    ) -> Option<Arc<dyn Transformation>> {
        transformations
            .iter()
            .filter(|t| t.step_name() == step)
            .max_by_key(|t| (t.quality_level() == preferred_quality, t.quality_level()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use kernel_common::policy::Availability;
    use kernel_common::traits::TransformContext;
    use kernel_common::error::Result;

    struct Fixture {
        id: &'static str,
        step: &'static str,
        quality: u32,
    }

    impl Transformation for Fixture {
        fn plugin_id(&self) -> &str {
            self.id
        }

        fn step_name(&self) -> &str {
            self.step
        }

        fn quality_level(&self) -> u32 {
            self.quality
        }

        fn on_write<'a>(&'a self, input: Vec<u8>, _ctx: &'a TransformContext) -> BoxFuture<'a, Result<Vec<u8>>> {
            Box::pin(async move { Ok(input) })
        }

        fn on_read<'a>(&'a self, input: Vec<u8>, _ctx: &'a TransformContext) -> BoxFuture<'a, Result<Vec<u8>>> {
            Box::pin(async move { Ok(input) })
        }
    }

    fn intent(compression: Compression, security: Security) -> StorageIntent {
        StorageIntent {
            security,
            compression,
            availability: Availability::Single,
        }
    }

    #[test]
    fn exact_container_blob_pattern_wins_first() {
        let enforcer = PolicyEnforcer::new(intent(Compression::None, Security::None));
        enforcer.set_policy(
            "c1/reports/q1.txt",
            PolicyConfig {
                intent: Some(intent(Compression::High, Security::None)),
                pipeline_order: None,
            },
        );
        enforcer.set_policy(
            "c1",
            PolicyConfig {
                intent: Some(intent(Compression::Fast, Security::None)),
                pipeline_order: None,
            },
        );

        let resolved = enforcer.resolve_config("c1", "reports/q1.txt").unwrap();
        assert_eq!(resolved.intent.unwrap().compression, Compression::High);
    }

    #[test]
    fn falls_back_to_parent_folder_then_container_then_global() {
        let enforcer = PolicyEnforcer::new(intent(Compression::None, Security::None));
        enforcer.set_policy(
            "c1/reports",
            PolicyConfig {
                intent: Some(intent(Compression::Optimal, Security::None)),
                pipeline_order: None,
            },
        );

        let resolved = enforcer.resolve_config("c1", "reports/q1/draft.txt").unwrap();
        assert_eq!(resolved.intent.unwrap().compression, Compression::Optimal);
    }

    #[test]
    fn global_default_pattern_is_the_last_resort() {
        let enforcer = PolicyEnforcer::new(intent(Compression::None, Security::None));
        enforcer.set_policy(
            "*",
            PolicyConfig {
                intent: Some(intent(Compression::Fast, Security::None)),
                pipeline_order: None,
            },
        );

        let resolved = enforcer.resolve_config("any-container", "any/blob.txt").unwrap();
        assert_eq!(resolved.intent.unwrap().compression, Compression::Fast);
    }

    #[test]
    fn no_matching_policy_falls_back_to_enforcer_default() {
        let enforcer = PolicyEnforcer::new(intent(Compression::Fast, Security::Standard));
        let pipeline = enforcer.resolve("unconfigured", "blob.txt");
        assert!(!pipeline.enable_compression);
        assert!(!pipeline.enable_encryption);
    }

    #[test]
    fn set_policy_replaces_prior_entry_at_same_pattern() {
        let enforcer = PolicyEnforcer::new(intent(Compression::None, Security::None));
        enforcer.set_policy(
            "c1",
            PolicyConfig {
                intent: Some(intent(Compression::Fast, Security::None)),
                pipeline_order: None,
            },
        );
        enforcer.set_policy(
            "c1",
            PolicyConfig {
                intent: Some(intent(Compression::High, Security::None)),
                pipeline_order: None,
            },
        );
        let resolved = enforcer.resolve_config("c1", "x.txt").unwrap();
        assert_eq!(resolved.intent.unwrap().compression, Compression::High);
    }

    #[test]
    fn optimizer_omits_compression_when_intent_is_none() {
        let transformations: Vec<Arc<dyn Transformation>> = vec![Arc::new(Fixture {
            id: "lz4",
            step: "Compression",
            quality: 1,
        })];
        let pipeline = PipelineOptimizer::optimize(
            &intent(Compression::None, Security::None),
            &transformations,
            None,
        );
        assert!(!pipeline.enable_compression);
        assert!(pipeline.compression_provider_id.is_none());
    }

    #[test]
    fn optimizer_prefers_matching_quality_level_over_a_higher_mismatch() {
        let transformations: Vec<Arc<dyn Transformation>> = vec![
            Arc::new(Fixture {
                id: "zstd-max",
                step: "Compression",
                quality: 3,
            }),
            Arc::new(Fixture {
                id: "lz4-fast",
                step: "Compression",
                quality: 1,
            }),
        ];
        let pipeline = PipelineOptimizer::optimize(
            &intent(Compression::Fast, Security::None),
            &transformations,
            None,
        );
        assert_eq!(pipeline.compression_provider_id.as_deref(), Some("lz4-fast"));
    }

    #[test]
    fn optimizer_breaks_ties_by_descending_quality() {
        let transformations: Vec<Arc<dyn Transformation>> = vec![
            Arc::new(Fixture {
                id: "zstd-1",
                step: "Compression",
                quality: 2,
            }),
            Arc::new(Fixture {
                id: "zstd-2",
                step: "Compression",
                quality: 3,
            }),
        ];
        let pipeline = PipelineOptimizer::optimize(
            &intent(Compression::High, Security::None),
            &transformations,
            None,
        );
        assert_eq!(pipeline.compression_provider_id.as_deref(), Some("zstd-2"));
    }

    #[test]
    fn optimizer_uses_configured_order_when_present() {
        let pipeline = PipelineOptimizer::optimize(
            &intent(Compression::None, Security::None),
            &[],
            Some(&["Encryption".to_string(), "Compression".to_string()]),
        );
        assert_eq!(pipeline.transformation_order, vec!["Encryption", "Compression"]);
    }
}
