//! Deduplication advisor: queries the metadata index for another manifest
//! sharing this one's checksum.

use std::sync::Arc;

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{CompositeQuery, Judgment, Logic, MetadataIndex, Operator, Predicate, SentinelContext, SentinelModule};
use kernel_common::Trigger;

pub struct DeduplicationAdvisor {
    index: Arc<dyn MetadataIndex>,
}

impl DeduplicationAdvisor {
    pub fn new(index: Arc<dyn MetadataIndex>) -> Self {
        Self { index }
    }
}

impl SentinelModule for DeduplicationAdvisor {
    fn name(&self) -> &str {
        "deduplication-advisor"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            if ctx.trigger != Trigger::OnWrite {
                return Ok(Judgment::default());
            }

            let query = CompositeQuery {
                predicates: vec![Predicate {
                    field: "checksum".to_string(),
                    operator: Operator::Eq,
                    value: ctx.manifest.checksum.clone(),
                }],
                logic: Logic::And,
            };
            let matches = self.index.execute_query(&query, 5).await?;
            let duplicate = matches.into_iter().find(|id| *id != ctx.manifest.id);

            let Some(duplicate_id) = duplicate else {
                return Ok(Judgment::default());
            };

            let mut judgment = Judgment::default();
            judgment
                .add_tags
                .insert("duplicate_of".to_string(), duplicate_id.to_hex());
            Ok(judgment)
        })
    }
}
