//! Semantic search pipeline over the [`Store`] trait.
//!
//! Fetches similarity candidates from the store (threshold and filters
//! applied before the limit), then re-ranks them with the usage ranker.
//! The pipeline is read-only; usage statistics are updated separately by
//! the search tracker.

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use crate::models::SearchFilters;
use crate::rank::{rank, RankContext, RankWeights, RankedMatch};
use crate::store::Store;

/// Tuning for one semantic search invocation.
#[derive(Debug, Clone)]
pub struct SemanticOptions {
    /// Minimum raw similarity for a candidate to count.
    pub threshold: f64,
    /// Maximum results returned after re-ranking.
    pub limit: usize,
    /// Candidates fetched from the store before re-ranking. Kept larger
    /// than `limit` so usage can promote items from below the cut.
    pub candidate_limit: usize,
    pub filters: SearchFilters,
    pub weights: RankWeights,
}

impl Default for SemanticOptions {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            limit: 10,
            candidate_limit: 50,
            filters: SearchFilters::default(),
            weights: RankWeights::default(),
        }
    }
}

/// Run a semantic search: vector scan, then usage-aware re-ranking.
///
/// # Errors
///
/// - `Validation` for an empty query vector.
/// - `InvalidVectorDimension` when the vector length does not match the
///   store's configured dimensionality.
/// - `Cancelled` if the token fires mid-scan; partial results are never
///   returned.
pub async fn semantic_search<S: Store>(
    store: &S,
    query_vec: &[f32],
    opts: &SemanticOptions,
    now: i64,
    cancel: &CancelToken,
) -> Result<Vec<RankedMatch>> {
    if query_vec.is_empty() {
        return Err(EngineError::Validation("query vector is empty".into()));
    }
    opts.weights.validate()?;

    let candidate_limit = opts.candidate_limit.max(opts.limit);
    let candidates = store
        .vector_search(
            query_vec,
            opts.threshold,
            candidate_limit,
            &opts.filters,
            cancel,
        )
        .await?;
    debug!(
        candidates = candidates.len(),
        threshold = opts.threshold,
        "semantic search candidates fetched"
    );

    let ctx = RankContext {
        now,
        classification: opts.filters.classification.clone(),
        tags: opts.filters.tags.clone(),
    };
    let mut ranked = rank(candidates, opts.weights, &ctx)?;
    ranked.truncate(opts.limit);
    Ok(ranked)
}
