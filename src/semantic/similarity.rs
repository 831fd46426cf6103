//! Cosine similarity and top-K selection over keyword vectors.
//!
//! Brute-force linear scan; the keyword vocabulary is small enough that an
//! approximate index buys nothing.

use std::cmp::Ordering;

use serde::Serialize;

use crate::semantic::context::{Interrupted, SearchContext, CHECK_INTERVAL};

/// A keyword ranked against a query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarKeyword {
    pub keyword: String,
    /// Raw cosine similarity (-1.0 to 1.0)
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// `dot(a, b) / (|a| * |b|)`. A zero-norm operand has similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, RankError> {
    if a.len() != b.len() {
        return Err(RankError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }

    Ok(cosine_with_norm(a, l2_norm(a), b))
}

/// Assumes `a_norm` is precomputed and lengths already checked.
fn cosine_with_norm(a: &[f32], a_norm: f32, b: &[f32]) -> f32 {
    let b_norm = l2_norm(b);
    if a_norm < f32::EPSILON || b_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot_product / (a_norm * b_norm)
}

/// Rank candidates by similarity to `query`.
///
/// Keeps `similarity >= min_similarity`, sorts descending with keyword
/// ascending as the tie-break, and truncates to `top_k`.
pub fn rank<'a, I>(
    query: &[f32],
    candidates: I,
    top_k: usize,
    min_similarity: f32,
) -> Result<Vec<SimilarKeyword>, RankError>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    rank_with_context(query, candidates, top_k, min_similarity, &SearchContext::new())
}

/// Same as [`rank`], polling `ctx` while scanning.
pub fn rank_with_context<'a, I>(
    query: &[f32],
    candidates: I,
    top_k: usize,
    min_similarity: f32,
    ctx: &SearchContext,
) -> Result<Vec<SimilarKeyword>, RankError>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let query_norm = l2_norm(query);
    let mut results = Vec::new();

    for (scanned, (keyword, embedding)) in candidates.into_iter().enumerate() {
        if scanned % CHECK_INTERVAL == 0 {
            ctx.check()?;
        }

        if embedding.len() != query.len() {
            return Err(RankError::DimensionMismatch {
                expected: query.len(),
                got: embedding.len(),
            });
        }

        let similarity = cosine_with_norm(query, query_norm, embedding);
        if similarity >= min_similarity {
            results.push(SimilarKeyword {
                keyword: keyword.to_string(),
                similarity,
            });
        }
    }

    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.keyword.cmp(&b.keyword))
    });
    results.truncate(top_k);

    Ok(results)
}
