//! Compression advisor: enforces compression on large text-like blobs.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::policy::Pipeline;
use kernel_common::traits::{Judgment, SentinelContext, SentinelModule};

const LARGE_BLOB_BYTES: u64 = 1024 * 1024;

pub struct CompressionAdvisor {
    default_provider_id: String,
}

impl CompressionAdvisor {
    pub fn new(default_provider_id: impl Into<String>) -> Self {
        Self {
            default_provider_id: default_provider_id.into(),
        }
    }

    fn looks_textual(ctx: &SentinelContext) -> bool {
        ctx.manifest.content_summary.is_some()
            || ctx
                .manifest
                .tags
                .get("content-type")
                .map(|v| v.starts_with("text/"))
                .unwrap_or(false)
    }
}

impl SentinelModule for CompressionAdvisor {
    fn name(&self) -> &str {
        "compression-advisor"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            if ctx.manifest.size_bytes <= LARGE_BLOB_BYTES || !Self::looks_textual(ctx) {
                return Ok(Judgment::default());
            }

            Ok(Judgment {
                enforce_pipeline: Some(Pipeline::compressed(self.default_provider_id.clone())),
                ..Judgment::default()
            })
        })
    }
}
