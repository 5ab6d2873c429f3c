//! Usage-aware re-ranking of similarity candidates.
//!
//! Converts raw cosine similarity into a composite score that favors
//! chunks which have historically been returned and clicked:
//!
//! ```text
//! recency   = exp(-days_since_last_use / 30)        (0 if never used)
//! frequency = log(usage_count + 1) / log(100)        clamped to [0, 1]
//! usage     = 0.3 × recency + 0.7 × frequency
//! composite = w_sim × similarity + w_usage × usage + w_meta × metadata
//! ```
//!
//! The ranker is read-only: it never mutates store state. Output is
//! stable-sorted descending by composite score, so ties preserve the
//! similarity-search order.

use crate::error::{EngineError, Result};
use crate::models::EmbeddingMatch;

const SECONDS_PER_DAY: f64 = 86_400.0;
const USAGE_RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// Composite score weights. Must sum to 1.0 within `1e-6`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RankWeights {
    pub similarity: f64,
    pub usage: f64,
    pub metadata: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            usage: 0.3,
            metadata: 0.1,
        }
    }
}

impl RankWeights {
    pub fn validate(&self) -> Result<()> {
        let sum = self.similarity + self.usage + self.metadata;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::Configuration(format!(
                "rank weights must sum to 1.0, got {sum}"
            )));
        }
        if self.similarity < 0.0 || self.usage < 0.0 || self.metadata < 0.0 {
            return Err(EngineError::Configuration(
                "rank weights must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Query-side signals the metadata bonus compares against stored documents.
#[derive(Debug, Clone, Default)]
pub struct RankContext {
    /// Current unix time, injected for determinism.
    pub now: i64,
    /// Classification requested by the caller's filters, if any.
    pub classification: Option<String>,
    /// Tags requested by the caller's filters.
    pub tags: Vec<String>,
}

/// A similarity candidate with its composite ranking scores.
#[derive(Debug, Clone)]
pub struct RankedMatch {
    pub hit: EmbeddingMatch,
    pub usage_score: f64,
    pub metadata_score: f64,
    pub composite_score: f64,
}

/// Re-rank similarity candidates by composite score.
///
/// Stable: candidates with equal composite scores keep their incoming
/// (similarity-search) order.
pub fn rank(
    candidates: Vec<EmbeddingMatch>,
    weights: RankWeights,
    ctx: &RankContext,
) -> Result<Vec<RankedMatch>> {
    weights.validate()?;

    let mut ranked: Vec<RankedMatch> = candidates
        .into_iter()
        .map(|hit| {
            let usage_score = usage_score(hit.usage_count, hit.last_used_at, ctx.now);
            let metadata_score = metadata_score(&hit, ctx);
            let composite_score = weights.similarity * hit.similarity
                + weights.usage * usage_score
                + weights.metadata * metadata_score;
            RankedMatch {
                hit,
                usage_score,
                metadata_score,
                composite_score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(ranked)
}

fn usage_score(usage_count: i64, last_used_at: Option<i64>, now: i64) -> f64 {
    let recency = match last_used_at {
        Some(ts) => {
            let days = (now - ts).max(0) as f64 / SECONDS_PER_DAY;
            (-days / USAGE_RECENCY_HALF_LIFE_DAYS).exp()
        }
        None => 0.0,
    };
    let frequency = ((usage_count.max(0) as f64 + 1.0).ln() / 100f64.ln()).clamp(0.0, 1.0);
    0.3 * recency + 0.7 * frequency
}

/// Bounded metadata bonuses, capped at 1.0: document creation recency
/// (up to 0.4), classification match (0.3), tag overlap ratio (up to
/// 0.3).
fn metadata_score(hit: &EmbeddingMatch, ctx: &RankContext) -> f64 {
    let mut score = 0.0;

    let days = (ctx.now - hit.document_created_at).max(0) as f64 / SECONDS_PER_DAY;
    score += 0.4 * (-days / USAGE_RECENCY_HALF_LIFE_DAYS).exp();

    if let Some(ref class) = ctx.classification {
        if hit.classification.as_deref() == Some(class.as_str()) {
            score += 0.3;
        }
    }

    if !ctx.tags.is_empty() {
        let overlap = ctx
            .tags
            .iter()
            .filter(|t| hit.tags.iter().any(|h| h == *t))
            .count();
        score += 0.3 * overlap as f64 / ctx.tags.len() as f64;
    }

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;

    const NOW: i64 = 1_700_000_000;

    fn hit(embedding_id: i64, similarity: f64) -> EmbeddingMatch {
        EmbeddingMatch {
            embedding_id,
            owner_kind: ContentKind::Text,
            owner_id: "owner".into(),
            chunk_index: 0,
            content: String::new(),
            similarity,
            usage_count: 0,
            last_used_at: None,
            document_id: "doc".into(),
            document_created_at: NOW - 365 * 86_400,
            classification: None,
            tags: Vec::new(),
        }
    }

    fn ctx() -> RankContext {
        RankContext {
            now: NOW,
            ..Default::default()
        }
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let bad = RankWeights {
            similarity: 0.5,
            usage: 0.3,
            metadata: 0.1,
        };
        assert!(matches!(
            rank(vec![hit(1, 0.9)], bad, &ctx()),
            Err(EngineError::Configuration(_))
        ));
        assert!(RankWeights::default().validate().is_ok());
    }

    #[test]
    fn test_similarity_monotonic_with_equal_usage() {
        // Identical usage/metadata: higher similarity never ranks lower.
        let ranked = rank(
            vec![hit(1, 0.7), hit(2, 0.95)],
            RankWeights::default(),
            &ctx(),
        )
        .unwrap();
        assert_eq!(ranked[0].hit.embedding_id, 2);
        assert!(ranked[0].composite_score > ranked[1].composite_score);
    }

    #[test]
    fn test_never_used_has_zero_usage_score() {
        let ranked = rank(vec![hit(1, 0.5)], RankWeights::default(), &ctx()).unwrap();
        assert_eq!(ranked[0].usage_score, 0.0);
    }

    #[test]
    fn test_usage_boosts_composite() {
        let mut used = hit(1, 0.8);
        used.usage_count = 50;
        used.last_used_at = Some(NOW - 86_400);
        let fresh = hit(2, 0.8);

        let ranked = rank(vec![fresh, used], RankWeights::default(), &ctx()).unwrap();
        assert_eq!(ranked[0].hit.embedding_id, 1);
        assert!(ranked[0].usage_score > 0.5);
    }

    #[test]
    fn test_frequency_clamped_at_one() {
        let mut heavy = hit(1, 0.0);
        heavy.usage_count = 1_000_000;
        heavy.last_used_at = Some(NOW);
        let ranked = rank(vec![heavy], RankWeights::default(), &ctx()).unwrap();
        assert!(ranked[0].usage_score <= 1.0);
    }

    #[test]
    fn test_ties_preserve_input_order() {
        let ranked = rank(
            vec![hit(7, 0.8), hit(3, 0.8), hit(5, 0.8)],
            RankWeights::default(),
            &ctx(),
        )
        .unwrap();
        let ids: Vec<i64> = ranked.iter().map(|r| r.hit.embedding_id).collect();
        assert_eq!(ids, vec![7, 3, 5]);
    }

    #[test]
    fn test_metadata_bonuses_capped() {
        let mut candidate = hit(1, 0.0);
        candidate.document_created_at = NOW;
        candidate.classification = Some("report".into());
        candidate.tags = vec!["a".into(), "b".into()];

        let full_ctx = RankContext {
            now: NOW,
            classification: Some("report".into()),
            tags: vec!["a".into(), "b".into()],
        };
        let ranked = rank(vec![candidate], RankWeights::default(), &full_ctx).unwrap();
        assert!(ranked[0].metadata_score <= 1.0);
        assert!(ranked[0].metadata_score > 0.9);
    }
}
