//! Predicate evaluation shared by both `MetadataIndex` implementations.
//! `spec.md` §4.4: fields project onto [`Manifest`] by exact
//! case-insensitive name; unknown fields evaluate false; numeric
//! comparisons parse both sides as `i64`.

use kernel_common::traits::{CompositeQuery, Logic, Operator, Predicate};
use kernel_common::Manifest;

fn field_value(manifest: &Manifest, field: &str) -> Option<String> {
    match field.to_ascii_lowercase().as_str() {
        "id" => Some(manifest.id.to_hex()),
        "containerid" => Some(manifest.container_id.clone()),
        "bloburi" => Some(manifest.blob_uri.clone()),
        "sizebytes" => Some(manifest.size_bytes.to_string()),
        "createdat" => Some(manifest.created_at.to_string()),
        "lastaccessedat" => Some(manifest.last_accessed_at.to_string()),
        "ownerid" => Some(manifest.owner_id.clone()),
        "checksum" => Some(manifest.checksum.clone()),
        "etag" => Some(manifest.etag.clone()),
        "currenttier" => Some(format!("{:?}", manifest.current_tier)),
        other => manifest.tags.get(other).cloned(),
    }
}

fn eval_predicate(manifest: &Manifest, predicate: &Predicate) -> bool {
    let Some(actual) = field_value(manifest, &predicate.field) else {
        return false;
    };
    match predicate.operator {
        Operator::Eq => actual == predicate.value,
        Operator::Ne => actual != predicate.value,
        Operator::Contains => actual.contains(&predicate.value),
        Operator::Gt | Operator::Lt => {
            let (Ok(lhs), Ok(rhs)) = (actual.parse::<i64>(), predicate.value.parse::<i64>())
            else {
                return false;
            };
            if predicate.operator == Operator::Gt {
                lhs > rhs
            } else {
                lhs < rhs
            }
        }
    }
}

/// Whether `manifest` satisfies `query`. An empty predicate list matches
/// everything (a `CompositeQuery` with no predicates is treated as a
/// full-table scan, matching `EnumerateAll` semantics for degenerate
/// queries).
pub fn matches(manifest: &Manifest, query: &CompositeQuery) -> bool {
    if query.predicates.is_empty() {
        return true;
    }
    let mut results = query.predicates.iter().map(|p| eval_predicate(manifest, p));
    match query.logic {
        Logic::And => results.all(|r| r),
        Logic::Or => results.any(|r| r),
    }
}
