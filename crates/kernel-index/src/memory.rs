//! In-memory `MetadataIndex` (`spec.md` §4.4 "laptop mode"): two maps
//! behind one lock so a write updates both the by-id and by-uri indices
//! atomically.

use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{CompositeQuery, MetadataIndex};
use kernel_common::{Manifest, ManifestId};

use crate::query;
use crate::search::{score_text, Scored};

#[derive(Default)]
struct State {
    by_id: HashMap<ManifestId, Manifest>,
    by_uri: HashMap<String, ManifestId>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataIndex for InMemoryIndex {
    fn index_manifest<'a>(&'a self, manifest: Manifest) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.by_uri.insert(manifest.blob_uri.clone(), manifest.id);
            state.by_id.insert(manifest.id, manifest);
            Ok(())
        })
    }

    fn get_manifest<'a>(&'a self, blob_name: &'a str) -> BoxFuture<'a, Result<Option<Manifest>>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let manifest = state
                .by_uri
                .iter()
                .find(|(uri, _)| uri.rsplit('/').next() == Some(blob_name) || uri.as_str() == blob_name)
                .and_then(|(_, id)| state.by_id.get(id).cloned());
            Ok(manifest)
        })
    }

    fn get_manifest_by_id<'a>(
        &'a self,
        id: ManifestId,
    ) -> BoxFuture<'a, Result<Option<Manifest>>> {
        Box::pin(async move { Ok(self.state.read().unwrap().by_id.get(&id).cloned()) })
    }

    fn update_last_access<'a>(
        &'a self,
        id: ManifestId,
        timestamp: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(manifest) = self.state.write().unwrap().by_id.get_mut(&id) {
                manifest.last_accessed_at = timestamp;
            }
            Ok(())
        })
    }

    fn remove_manifest<'a>(&'a self, id: ManifestId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(manifest) = state.by_id.remove(&id) {
                state.by_uri.remove(&manifest.blob_uri);
            }
            Ok(())
        })
    }

    fn enumerate_all<'a>(&'a self) -> BoxFuture<'a, Result<Vec<Manifest>>> {
        Box::pin(async move { Ok(self.state.read().unwrap().by_id.values().cloned().collect()) })
    }

    fn execute_query<'a>(
        &'a self,
        composite_query: &'a CompositeQuery,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ManifestId>>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut matched: Vec<ManifestId> = state
                .by_id
                .values()
                .filter(|m| query::matches(m, composite_query))
                .map(|m| m.id)
                .collect();
            matched.sort_by_key(|id| id.to_hex());
            matched.truncate(limit);
            Ok(matched)
        })
    }

    fn search<'a>(
        &'a self,
        text: &'a str,
        vector: Option<&'a [f32]>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ManifestId>>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut scored: Vec<Scored> = state
                .by_id
                .values()
                .map(|m| score_text(m, text, vector))
                .filter(|s| s.score > 0.0)
                .collect();
            // Open question (b): descending score, then ascending id, for
            // deterministic pagination across identical repeated calls.
            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.to_hex().cmp(&b.id.to_hex()))
            });
            scored.truncate(limit);
            Ok(scored.into_iter().map(|s| s.id).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_common::policy::Pipeline;
    use kernel_common::Tier;
    use kernel_common::traits::{Logic, Operator, Predicate};
    use std::collections::HashMap;

    fn manifest(owner: &str, size: u64) -> Manifest {
        let id = ManifestId::new();
        Manifest {
            id,
            container_id: "c1".into(),
            blob_uri: format!("file://c1/{}", id.to_hex()),
            size_bytes: size,
            created_at: 1,
            last_accessed_at: 1,
            owner_id: owner.into(),
            checksum: "x".into(),
            etag: "e".into(),
            pipeline: Pipeline::default(),
            tags: HashMap::new(),
            governance_tags: HashMap::new(),
            vector_embedding: None,
            content_summary: Some("hello world".into()),
            current_tier: Tier::Hot,
        }
    }

    #[tokio::test]
    async fn index_then_get_by_id_and_uri() {
        let index = InMemoryIndex::new();
        let m = manifest("alice", 10);
        let id = m.id;
        let uri = m.blob_uri.clone();
        index.index_manifest(m).await.unwrap();

        assert!(index.get_manifest_by_id(id).await.unwrap().is_some());
        let by_name = index
            .get_manifest(uri.rsplit('/').next().unwrap())
            .await
            .unwrap();
        assert!(by_name.is_some());
    }

    #[tokio::test]
    async fn remove_manifest_evicts_both_indices() {
        let index = InMemoryIndex::new();
        let m = manifest("bob", 10);
        let id = m.id;
        index.index_manifest(m).await.unwrap();
        index.remove_manifest(id).await.unwrap();
        assert!(index.get_manifest_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execute_query_filters_by_predicate() {
        let index = InMemoryIndex::new();
        index.index_manifest(manifest("alice", 5)).await.unwrap();
        index.index_manifest(manifest("bob", 50)).await.unwrap();

        let query = CompositeQuery {
            predicates: vec![Predicate {
                field: "sizebytes".into(),
                operator: Operator::Gt,
                value: "20".into(),
            }],
            logic: Logic::And,
        };
        let results = index.execute_query(&query, 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn update_last_access_mutates_the_stored_manifest() {
        let index = InMemoryIndex::new();
        let m = manifest("alice", 5);
        let id = m.id;
        index.index_manifest(m).await.unwrap();
        index.update_last_access(id, 999).await.unwrap();
        let stored = index.get_manifest_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.last_accessed_at, 999);
    }

    #[tokio::test]
    async fn search_is_deterministic_across_repeated_calls() {
        let index = InMemoryIndex::new();
        index.index_manifest(manifest("alice", 5)).await.unwrap();
        index.index_manifest(manifest("bob", 5)).await.unwrap();

        let first = index.search("hello", None, 10).await.unwrap();
        let second = index.search("hello", None, 10).await.unwrap();
        assert_eq!(first, second);
    }
}
