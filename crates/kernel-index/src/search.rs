//! `MetadataIndex::search` scoring. `spec.md` §4.4 leaves ranking semantics
//! implementation-defined but requires determinism; the open-question
//! decision (SPEC_FULL.md §3b) fixes it to term-frequency for text and
//! cosine similarity for vectors.

use kernel_common::{Manifest, ManifestId};

pub struct Scored {
    pub id: ManifestId,
    pub score: f32,
}

fn term_frequency(haystack: &str, query_terms: &[&str]) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let haystack_lower = haystack.to_ascii_lowercase();
    let words: Vec<&str> = haystack_lower.split_whitespace().collect();
    let mut hits = 0usize;
    for term in query_terms {
        hits += words.iter().filter(|w| **w == *term).count();
    }
    hits as f32
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Combines a term-frequency text score against `ContentSummary`/`Tags`
/// with an optional cosine-similarity vector score. A manifest with no
/// `VectorEmbedding` contributes 0 to the vector half rather than
/// disqualifying the match.
pub fn score_text(manifest: &Manifest, query: &str, vector: Option<&[f32]>) -> Scored {
    let query_lower = query.to_ascii_lowercase();
    let query_terms: Vec<&str> = query_lower.split_whitespace().collect();

    let mut text_score = 0.0;
    if let Some(summary) = &manifest.content_summary {
        text_score += term_frequency(summary, &query_terms);
    }
    for value in manifest.tags.values() {
        text_score += term_frequency(value, &query_terms);
    }

    let vector_score = match (vector, &manifest.vector_embedding) {
        (Some(query_vec), Some(stored)) => cosine_similarity(query_vec, stored),
        _ => 0.0,
    };

    Scored {
        id: manifest.id,
        score: text_score + vector_score,
    }
}
