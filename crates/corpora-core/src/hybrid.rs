//! Hybrid semantic + lexical result combination.
//!
//! Runs the semantic pipeline and the lexical index independently with a
//! generous internal candidate limit, groups candidates by document, and
//! sums the weighted contributions of each mode:
//!
//! ```text
//! weighted_score = semantic_score × semantic_weight
//!                + lexical_score × text_weight
//! ```
//!
//! A document matched by both modes accumulates both contributions —
//! multi-signal matches are rewarded, not diluted. The weights are
//! independent scales and need not sum to 1. Output order is fully
//! reproducible: score descending, then document id ascending.

use std::collections::HashMap;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use crate::keywords::extract_keywords;
use crate::rank::RankedMatch;
use crate::search::{semantic_search, SemanticOptions};
use crate::store::Store;

/// Independent per-mode weights for hybrid scoring.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HybridWeights {
    pub semantic: f64,
    pub text: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            text: 0.3,
        }
    }
}

impl HybridWeights {
    pub fn validate(&self) -> Result<()> {
        if self.semantic < 0.0 || self.text < 0.0 {
            return Err(EngineError::Configuration(
                "hybrid weights must be non-negative".into(),
            ));
        }
        if self.semantic == 0.0 && self.text == 0.0 {
            return Err(EngineError::Configuration(
                "at least one hybrid weight must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Which retrieval modes contributed to a hybrid group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Semantic,
    Lexical,
}

/// One document-level hybrid result.
#[derive(Debug, Clone)]
pub struct HybridDocMatch {
    pub document_id: String,
    pub weighted_score: f64,
    pub modes: Vec<MatchSource>,
    /// Best composite score among the document's semantic chunks (0 when
    /// the document only matched lexically).
    pub semantic_score: f64,
    /// Lexical rank score (0 when the document only matched
    /// semantically).
    pub lexical_score: f64,
    /// The document's best semantic chunk, for snippet display.
    pub best_chunk: Option<RankedMatch>,
}

/// Options for one hybrid invocation; semantic tuning rides along.
#[derive(Debug, Clone, Default)]
pub struct HybridOptions {
    pub weights: HybridWeights,
    pub semantic: SemanticOptions,
    pub limit: usize,
}

/// Run hybrid search over a store.
///
/// `query_vec` is the embedded query; the lexical side extracts its own
/// keywords from the raw query text. The internal candidate limit is at
/// least three times the requested limit so grouping does not starve
/// either mode.
pub async fn hybrid_search<S: Store>(
    store: &S,
    query: &str,
    query_vec: &[f32],
    opts: &HybridOptions,
    now: i64,
    cancel: &CancelToken,
) -> Result<Vec<HybridDocMatch>> {
    opts.weights.validate()?;
    let limit = if opts.limit == 0 { 10 } else { opts.limit };
    let candidate_limit = (limit * 3).max(opts.semantic.candidate_limit);

    let mut semantic_opts = opts.semantic.clone();
    semantic_opts.limit = candidate_limit;
    semantic_opts.candidate_limit = candidate_limit;
    let semantic = semantic_search(store, query_vec, &semantic_opts, now, cancel).await?;

    let terms = extract_keywords(query);
    let lexical = if terms.is_empty() {
        Vec::new()
    } else {
        store.lexical_search(&terms, candidate_limit, cancel).await?
    };
    debug!(
        semantic = semantic.len(),
        lexical = lexical.len(),
        terms = terms.len(),
        "hybrid candidates fetched"
    );

    // Group semantic chunks by document: MAX composite wins. The input
    // is already sorted by composite, so first-seen is the best chunk.
    let mut groups: HashMap<String, HybridDocMatch> = HashMap::new();
    for m in semantic {
        groups
            .entry(m.hit.document_id.clone())
            .or_insert_with(|| HybridDocMatch {
                document_id: m.hit.document_id.clone(),
                weighted_score: 0.0,
                modes: vec![MatchSource::Semantic],
                semantic_score: m.composite_score,
                lexical_score: 0.0,
                best_chunk: Some(m),
            });
    }

    for l in lexical {
        let entry = groups
            .entry(l.document_id.clone())
            .or_insert_with(|| HybridDocMatch {
                document_id: l.document_id.clone(),
                weighted_score: 0.0,
                modes: Vec::new(),
                semantic_score: 0.0,
                lexical_score: 0.0,
                best_chunk: None,
            });
        entry.lexical_score = l.rank_score;
        entry.modes.push(MatchSource::Lexical);
    }

    let mut merged: Vec<HybridDocMatch> = groups
        .into_values()
        .map(|mut g| {
            g.weighted_score = g.semantic_score * opts.weights.semantic
                + g.lexical_score * opts.weights.text;
            g
        })
        .collect();

    merged.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.document_id.cmp(&b.document_id))
    });
    merged.truncate(limit);
    Ok(merged)
}
