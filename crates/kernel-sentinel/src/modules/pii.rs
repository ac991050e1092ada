//! PII/secret detector: regex over the first ≤5 MiB of the data stream.
//!
//! Two categories escalate beyond tagging. A bare `password=`/`secret=`
//! assignment written into the `public` container is blocked outright
//! (`spec.md` §8 scenario 2); an `api_key=`-style credential anywhere else
//! forces encryption on and stamps `Governance:AutoEncrypted` rather than
//! blocking (§8 scenario 3), since a credential in a private container is
//! a remediation case, not a policy violation.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{Alert, Judgment, SentinelContext, SentinelModule, Severity};
use kernel_common::Pipeline;
use regex::Regex;

const SCAN_LIMIT_BYTES: usize = 5 * 1024 * 1024;
const PUBLIC_CONTAINER: &str = "public";
const AUTO_ENCRYPT_CRYPTO_PROVIDER: &str = "builtin.encryption";
// `kernel_crypto::KeyManager` keys its cache by rotation version, starting
// at `"1"`; this is the only version that exists until the kernel's
// `KeyManager` is rotated, so it is the only safe id to force here.
const AUTO_ENCRYPT_KEY_ID: &str = "1";

pub struct PiiDetector {
    patterns: Vec<(&'static str, Regex)>,
}

impl PiiDetector {
    pub fn new() -> Self {
        Self {
            patterns: vec![
                (
                    "email",
                    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
                ),
                ("ssn", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
                (
                    "credit_card",
                    Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap(),
                ),
                (
                    "api_key",
                    Regex::new(r#"(?i)(api[_-]?key|secret|token)\s*[:=]\s*['"]?[A-Za-z0-9_\-]{16,}"#)
                        .unwrap(),
                ),
                (
                    "password",
                    Regex::new(r#"(?i)password\s*[:=]\s*['"]?\S{6,}"#).unwrap(),
                ),
            ],
        }
    }
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelModule for PiiDetector {
    fn name(&self) -> &str {
        "pii-secret-detector"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            let Some(data) = ctx.data.as_ref() else {
                return Ok(Judgment::default());
            };
            let scan_window = &data[..data.len().min(SCAN_LIMIT_BYTES)];
            let sample = String::from_utf8_lossy(scan_window);

            let mut found = Vec::new();
            for (kind, pattern) in &self.patterns {
                if pattern.is_match(&sample) {
                    found.push(*kind);
                }
            }

            if found.is_empty() {
                return Ok(Judgment::default());
            }

            let mut judgment = Judgment {
                intervention_required: true,
                ..Judgment::default()
            };
            judgment
                .add_tags
                .insert("contains_pii".to_string(), "true".to_string());
            judgment
                .add_tags
                .insert("pii_kinds".to_string(), found.join(","));

            if found.contains(&"password") && ctx.manifest.container_id == PUBLIC_CONTAINER {
                judgment.block_operation = true;
                judgment.alert = Some(Alert {
                    code: "PII_SECRET".to_string(),
                    severity: Severity::Critical,
                    message: format!(
                        "blocked write of plaintext secret to container {PUBLIC_CONTAINER:?}"
                    ),
                });
                return Ok(judgment);
            }

            if found.contains(&"api_key") {
                judgment.enforce_pipeline = Some(Pipeline::encrypted(
                    AUTO_ENCRYPT_CRYPTO_PROVIDER,
                    AUTO_ENCRYPT_KEY_ID,
                ));
                judgment
                    .update_properties
                    .insert("Governance:AutoEncrypted".to_string(), "True".to_string());
            }

            Ok(judgment)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_common::policy::Pipeline;
    use kernel_common::{Manifest, ManifestId, Tier, Trigger};
    use std::collections::HashMap;

    fn ctx_with(data: Option<Vec<u8>>) -> SentinelContext {
        ctx_in("c1", data)
    }

    fn ctx_in(container_id: &str, data: Option<Vec<u8>>) -> SentinelContext {
        SentinelContext {
            trigger: Trigger::OnWrite,
            manifest: Manifest {
                id: ManifestId::new(),
                container_id: container_id.into(),
                blob_uri: "file://c1/a.txt".into(),
                size_bytes: data.as_ref().map(|d| d.len() as u64).unwrap_or(0),
                created_at: 1,
                last_accessed_at: 1,
                owner_id: "o".into(),
                checksum: "x".into(),
                etag: "e".into(),
                pipeline: Pipeline::default(),
                tags: HashMap::new(),
                governance_tags: HashMap::new(),
                vector_embedding: None,
                content_summary: None,
                current_tier: Tier::Hot,
            },
            data,
            principal: "alice".into(),
        }
    }

    #[tokio::test]
    async fn flags_email_addresses() {
        let detector = PiiDetector::new();
        let ctx = ctx_with(Some(b"contact me at alice@example.com please".to_vec()));
        let judgment = detector.analyze(&ctx).await.unwrap();
        assert!(judgment.intervention_required);
        assert_eq!(judgment.add_tags.get("contains_pii"), Some(&"true".to_string()));
    }

    #[tokio::test]
    async fn clean_text_is_not_flagged() {
        let detector = PiiDetector::new();
        let ctx = ctx_with(Some(b"just a quarterly report, nothing sensitive".to_vec()));
        let judgment = detector.analyze(&ctx).await.unwrap();
        assert!(!judgment.intervention_required);
    }

    #[tokio::test]
    async fn absent_data_stream_is_a_no_op() {
        let detector = PiiDetector::new();
        let ctx = ctx_with(None);
        let judgment = detector.analyze(&ctx).await.unwrap();
        assert!(!judgment.intervention_required);
    }

    #[tokio::test]
    async fn blocks_plaintext_secret_written_to_public_container() {
        let detector = PiiDetector::new();
        let ctx = ctx_in("public", Some(b"password=hunter2supersecret".to_vec()));
        let judgment = detector.analyze(&ctx).await.unwrap();
        assert!(judgment.block_operation);
        assert_eq!(judgment.alert.unwrap().code, "PII_SECRET");
    }

    #[tokio::test]
    async fn allows_plaintext_secret_in_a_private_container() {
        let detector = PiiDetector::new();
        let ctx = ctx_in("private", Some(b"password=hunter2supersecret".to_vec()));
        let judgment = detector.analyze(&ctx).await.unwrap();
        assert!(!judgment.block_operation);
    }

    #[tokio::test]
    async fn forces_encryption_on_api_key_content() {
        let detector = PiiDetector::new();
        let ctx = ctx_in("private", Some(b"api_key=XYZ12345ABCDEFGH".to_vec()));
        let judgment = detector.analyze(&ctx).await.unwrap();
        assert!(!judgment.block_operation);
        let forced = judgment.enforce_pipeline.expect("pipeline forced");
        assert!(forced.enable_encryption);
        assert_eq!(
            judgment.update_properties.get("Governance:AutoEncrypted"),
            Some(&"True".to_string())
        );
    }
}
