//! End-to-end exercise of `MetadataIndex` against `InMemoryIndex`: index,
//! look up by id/uri, run a predicate query, rank a text search, then
//! remove and confirm the manifest is gone from every lookup path.

use std::collections::HashMap;

use kernel_common::policy::Pipeline;
use kernel_common::traits::{CompositeQuery, Logic, MetadataIndex, Operator, Predicate};
use kernel_common::{Manifest, ManifestId, Tier};
use kernel_index::InMemoryIndex;

fn manifest(container_id: &str, blob_name: &str, tags: &[(&str, &str)]) -> Manifest {
    Manifest {
        id: ManifestId::new(),
        container_id: container_id.to_string(),
        blob_uri: format!("file://{container_id}/{blob_name}"),
        size_bytes: 42,
        created_at: 1,
        last_accessed_at: 1,
        owner_id: "alice".to_string(),
        checksum: "deadbeef".to_string(),
        etag: "e1".to_string(),
        pipeline: Pipeline::default(),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        governance_tags: HashMap::new(),
        vector_embedding: None,
        content_summary: Some("quarterly revenue figures".to_string()),
        current_tier: Tier::Hot,
    }
}

#[tokio::test]
async fn write_query_search_and_remove_round_trip() {
    let index = InMemoryIndex::new();

    let report = manifest("finance", "q3-report.txt", &[("category", "report")]);
    let memo = manifest("finance", "memo.txt", &[("category", "memo")]);
    index.index_manifest(report.clone()).await.unwrap();
    index.index_manifest(memo.clone()).await.unwrap();

    let by_id = index.get_manifest_by_id(report.id).await.unwrap();
    assert_eq!(by_id.unwrap().blob_uri, report.blob_uri);

    let by_uri = index.get_manifest("memo.txt").await.unwrap();
    assert_eq!(by_uri.unwrap().id, memo.id);

    let query = CompositeQuery {
        predicates: vec![Predicate {
            field: "category".to_string(),
            operator: Operator::Eq,
            value: "report".to_string(),
        }],
        logic: Logic::And,
    };
    let matched = index.execute_query(&query, 10).await.unwrap();
    assert_eq!(matched, vec![report.id]);

    let hits = index.search("revenue", None, 10).await.unwrap();
    assert_eq!(hits.len(), 2);

    index.remove_manifest(report.id).await.unwrap();
    assert!(index.get_manifest_by_id(report.id).await.unwrap().is_none());
    let remaining = index.enumerate_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, memo.id);
}
