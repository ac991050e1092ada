//! Relationship mapper: extracts manifest-id-looking references from
//! small text files.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{Judgment, SentinelContext, SentinelModule};
use regex::Regex;

const SMALL_FILE_BYTES: u64 = 64 * 1024;
const MAX_REFERENCES: usize = 5;

pub struct RelationshipMapper {
    reference_pattern: Regex,
}

impl RelationshipMapper {
    pub fn new() -> Self {
        Self {
            reference_pattern: Regex::new(r"\b[0-9a-f]{32}\b").unwrap(),
        }
    }
}

impl Default for RelationshipMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelModule for RelationshipMapper {
    fn name(&self) -> &str {
        "relationship-mapper"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            if ctx.manifest.size_bytes > SMALL_FILE_BYTES {
                return Ok(Judgment::default());
            }
            let Some(data) = ctx.data.as_ref() else {
                return Ok(Judgment::default());
            };
            let text = String::from_utf8_lossy(data);

            let mut judgment = Judgment::default();
            for (i, reference) in self
                .reference_pattern
                .find_iter(&text)
                .map(|m| m.as_str().to_string())
                .filter(|r| *r != ctx.manifest.id.to_hex())
                .take(MAX_REFERENCES)
                .enumerate()
            {
                judgment
                    .add_tags
                    .insert(format!("reference_{i}"), reference);
            }
            Ok(judgment)
        })
    }
}
