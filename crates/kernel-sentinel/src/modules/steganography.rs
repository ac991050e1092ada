//! Steganography heuristic: flags a mismatch between a blob's extension
//! and the magic bytes its data actually starts with.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{Alert, Judgment, SentinelContext, SentinelModule, Severity};

const SIGNATURES: &[(&str, &[u8])] = &[
    ("jpg", &[0xFF, 0xD8, 0xFF]),
    ("jpeg", &[0xFF, 0xD8, 0xFF]),
    ("png", &[0x89, 0x50, 0x4E, 0x47]),
    ("gif", b"GIF8"),
    ("pdf", b"%PDF"),
];

pub struct SteganographyDetector;

impl SteganographyDetector {
    pub fn new() -> Self {
        Self
    }

    fn extension(blob_name: &str) -> Option<&str> {
        blob_name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

impl Default for SteganographyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelModule for SteganographyDetector {
    fn name(&self) -> &str {
        "steganography"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            let Some(data) = ctx.data.as_ref() else {
                return Ok(Judgment::default());
            };
            let Some(extension) = Self::extension(ctx.manifest.blob_name()) else {
                return Ok(Judgment::default());
            };
            let extension_lower = extension.to_ascii_lowercase();

            let Some((_, signature)) = SIGNATURES
                .iter()
                .find(|(ext, _)| *ext == extension_lower)
            else {
                return Ok(Judgment::default());
            };

            if data.starts_with(signature) {
                return Ok(Judgment::default());
            }

            let mut judgment = Judgment {
                intervention_required: true,
                alert: Some(Alert {
                    code: "MAGIC_BYTE_MISMATCH".to_string(),
                    severity: Severity::Warning,
                    message: format!(
                        "blob extension {extension_lower:?} does not match its leading bytes"
                    ),
                }),
                ..Judgment::default()
            };
            judgment
                .add_tags
                .insert("suspected_steganography".to_string(), "true".to_string());
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

    fn ctx(blob_name: &str, data: Vec<u8>) -> SentinelContext {
        SentinelContext {
            trigger: Trigger::OnWrite,
            manifest: Manifest {
                id: ManifestId::new(),
                container_id: "c1".into(),
                blob_uri: format!("file://c1/{blob_name}"),
                size_bytes: data.len() as u64,
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
            data: Some(data),
            principal: "alice".into(),
        }
    }

    #[tokio::test]
    async fn matching_magic_bytes_is_not_flagged() {
        let detector = SteganographyDetector::new();
        let judgment = detector
            .analyze(&ctx("photo.png", vec![0x89, 0x50, 0x4E, 0x47, 0x00, 0x00]))
            .await
            .unwrap();
        assert!(!judgment.intervention_required);
    }

    #[tokio::test]
    async fn mismatched_magic_bytes_is_flagged() {
        let detector = SteganographyDetector::new();
        let judgment = detector
            .analyze(&ctx("photo.png", b"not actually a png".to_vec()))
            .await
            .unwrap();
        assert!(judgment.intervention_required);
        assert_eq!(
            judgment.add_tags.get("suspected_steganography"),
            Some(&"true".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_extension_is_ignored() {
        let detector = SteganographyDetector::new();
        let judgment = detector.analyze(&ctx("data.bin", vec![1, 2, 3])).await.unwrap();
        assert!(!judgment.intervention_required);
    }
}
