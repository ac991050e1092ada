//! Auto-tagging: filename heuristics for content-type and category tags.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{Judgment, SentinelContext, SentinelModule};

const MIME_BY_EXTENSION: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("json", "application/json"),
];

const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("invoice", "financial"),
    ("receipt", "financial"),
    ("report", "report"),
    ("contract", "legal"),
];

pub struct AutoTagger;

impl AutoTagger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AutoTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelModule for AutoTagger {
    fn name(&self) -> &str {
        "auto-tagger"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            let blob_name = ctx.manifest.blob_name().to_ascii_lowercase();
            let mut judgment = Judgment::default();

            if let Some((_, mime)) = blob_name
                .rsplit_once('.')
                .and_then(|(_, ext)| MIME_BY_EXTENSION.iter().find(|(e, _)| *e == ext))
            {
                judgment
                    .add_tags
                    .insert("content-type".to_string(), mime.to_string());
            }

            for (keyword, category) in CATEGORY_KEYWORDS {
                if blob_name.contains(keyword) {
                    judgment
                        .add_tags
                        .insert("category".to_string(), category.to_string());
                    break;
                }
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

    fn ctx(blob_name: &str) -> SentinelContext {
        SentinelContext {
            trigger: Trigger::OnWrite,
            manifest: Manifest {
                id: ManifestId::new(),
                container_id: "c1".into(),
                blob_uri: format!("file://c1/{blob_name}"),
                size_bytes: 0,
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
            data: None,
            principal: "alice".into(),
        }
    }

    #[tokio::test]
    async fn tags_content_type_from_extension() {
        let tagger = AutoTagger::new();
        let judgment = tagger.analyze(&ctx("photo.PNG")).await.unwrap();
        assert_eq!(judgment.add_tags.get("content-type"), Some(&"image/png".to_string()));
    }

    #[tokio::test]
    async fn tags_category_from_filename_keyword() {
        let tagger = AutoTagger::new();
        let judgment = tagger.analyze(&ctx("march_invoice.pdf")).await.unwrap();
        assert_eq!(judgment.add_tags.get("category"), Some(&"financial".to_string()));
    }

    #[tokio::test]
    async fn unrecognized_filename_yields_no_tags() {
        let tagger = AutoTagger::new();
        let judgment = tagger.analyze(&ctx("x.bin")).await.unwrap();
        assert!(judgment.add_tags.is_empty());
    }
}
