//! Search history recording and engagement analytics.
//!
//! Every executed search can be persisted along with its ranked result
//! snapshot. Click feedback is idempotent per result row, and recording a
//! search is what bumps per-embedding usage counters for the ranker.

use chrono::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{SearchMode, SearchRecord, SearchResultRecord};
use crate::rank::RankedMatch;
use crate::store::{PopularQuery, Store};

/// Persist one search execution and its result snapshot.
///
/// Assigns ranks 1..n in the order the matches were returned, computes
/// min/max/avg over the raw cosine similarities, and increments usage
/// counters for every returned embedding. Returns the stored records.
pub async fn record<S: Store>(
    store: &S,
    query: &str,
    query_vector: Option<&[f32]>,
    mode: SearchMode,
    matches: &[RankedMatch],
    execution_time_ms: i64,
    filters_json: Option<String>,
    options_json: Option<String>,
    now: i64,
) -> Result<(SearchRecord, Vec<SearchResultRecord>)> {
    let sims: Vec<f64> = matches.iter().map(|m| m.hit.similarity).collect();
    let (min, max, avg) = if sims.is_empty() {
        (None, None, None)
    } else {
        let min = sims.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = sims.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = sims.iter().sum::<f64>() / sims.len() as f64;
        (Some(min), Some(max), Some(avg))
    };

    let search = SearchRecord {
        id: Uuid::new_v4().to_string(),
        query: query.to_string(),
        query_vector: query_vector.map(|v| v.to_vec()),
        mode,
        result_count: matches.len() as i64,
        min_similarity: min,
        max_similarity: max,
        avg_similarity: avg,
        execution_time_ms,
        filters_json,
        options_json,
        created_at: now,
    };
    store.insert_search(&search).await?;

    let results: Vec<SearchResultRecord> = matches
        .iter()
        .enumerate()
        .map(|(i, m)| SearchResultRecord {
            id: Uuid::new_v4().to_string(),
            search_id: search.id.clone(),
            embedding_id: m.hit.embedding_id,
            rank: (i + 1) as i64,
            similarity: m.hit.similarity,
            clicked: false,
        })
        .collect();
    store.insert_search_results(&results).await?;

    let ids: Vec<i64> = matches.iter().map(|m| m.hit.embedding_id).collect();
    if !ids.is_empty() {
        store.increment_usage(&ids, now).await?;
    }
    debug!(search_id = %search.id, results = results.len(), "search recorded");
    Ok((search, results))
}

/// Mark a stored result as clicked. Repeat calls on the same result are
/// no-ops; returns whether the state actually changed.
pub async fn mark_clicked<S: Store>(store: &S, result_id: &str) -> Result<bool> {
    store.mark_result_clicked(result_id).await
}

/// Fraction of recorded searches with at least one clicked result, or
/// `None` when no searches exist.
pub async fn click_through_rate<S: Store>(store: &S) -> Result<Option<f64>> {
    store.click_through_rate().await
}

/// Mean execution time across recorded searches.
pub async fn avg_execution_time<S: Store>(store: &S) -> Result<Option<f64>> {
    store.avg_execution_time_ms().await
}

/// Most frequent queries, ordered by count descending.
pub async fn popular_queries<S: Store>(store: &S, limit: usize) -> Result<Vec<PopularQuery>> {
    store.popular_queries(limit).await
}

/// Delete searches that returned zero results. Returns the number of
/// searches removed.
pub async fn cleanup_orphaned<S: Store>(store: &S) -> Result<u64> {
    let removed = store.cleanup_orphaned_searches().await?;
    if removed > 0 {
        debug!(removed, "orphaned searches removed");
    }
    Ok(removed)
}

/// Delete searches older than `age` that attracted no clicks.
pub async fn cleanup_older_than<S: Store>(store: &S, age: Duration, now: i64) -> Result<u64> {
    let cutoff = now - age.num_seconds();
    let removed = store.cleanup_searches_older_than(cutoff).await?;
    if removed > 0 {
        debug!(removed, cutoff, "aged searches removed");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentKind, EmbeddingMatch};
    use crate::rank::RankedMatch;
    use crate::store::memory::MemoryStore;

    fn ranked(embedding_id: i64, similarity: f64) -> RankedMatch {
        RankedMatch {
            hit: EmbeddingMatch {
                embedding_id,
                owner_kind: ContentKind::Text,
                owner_id: "c1".into(),
                chunk_index: 0,
                content: "chunk".into(),
                similarity,
                usage_count: 0,
                last_used_at: None,
                document_id: "d1".into(),
                document_created_at: 0,
                classification: None,
                tags: Vec::new(),
            },
            usage_score: 0.0,
            metadata_score: 0.0,
            composite_score: similarity,
        }
    }

    #[tokio::test]
    async fn test_record_computes_similarity_stats() {
        let store = MemoryStore::new(2);
        let matches = vec![ranked(1, 0.9), ranked(2, 0.7), ranked(3, 0.5)];
        let (search, results) = record(
            &store,
            "test query",
            None,
            SearchMode::Semantic,
            &matches,
            12,
            None,
            None,
            1000,
        )
        .await
        .unwrap();

        assert_eq!(search.result_count, 3);
        assert_eq!(search.min_similarity, Some(0.5));
        assert_eq!(search.max_similarity, Some(0.9));
        assert!((search.avg_similarity.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(
            results.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_record_empty_results_has_no_stats() {
        let store = MemoryStore::new(2);
        let (search, results) = record(
            &store,
            "no hits",
            None,
            SearchMode::Lexical,
            &[],
            3,
            None,
            None,
            1000,
        )
        .await
        .unwrap();
        assert_eq!(search.result_count, 0);
        assert_eq!(search.min_similarity, None);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_click_is_idempotent_for_ctr() {
        let store = MemoryStore::new(2);
        let (_, with_click) = record(
            &store,
            "clicked",
            None,
            SearchMode::Semantic,
            &[ranked(1, 0.9)],
            5,
            None,
            None,
            1000,
        )
        .await
        .unwrap();
        record(
            &store,
            "ignored",
            None,
            SearchMode::Semantic,
            &[ranked(2, 0.8)],
            5,
            None,
            None,
            1001,
        )
        .await
        .unwrap();

        assert!(mark_clicked(&store, &with_click[0].id).await.unwrap());
        // Second click on the same row changes nothing.
        assert!(!mark_clicked(&store, &with_click[0].id).await.unwrap());

        let ctr = click_through_rate(&store).await.unwrap().unwrap();
        assert!((ctr - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cleanup_older_than_spares_clicked() {
        let store = MemoryStore::new(2);
        let (_, old_clicked) = record(
            &store,
            "old but clicked",
            None,
            SearchMode::Semantic,
            &[ranked(1, 0.9)],
            5,
            None,
            None,
            0,
        )
        .await
        .unwrap();
        mark_clicked(&store, &old_clicked[0].id).await.unwrap();
        record(
            &store,
            "old unclicked",
            None,
            SearchMode::Semantic,
            &[ranked(2, 0.8)],
            5,
            None,
            None,
            0,
        )
        .await
        .unwrap();
        let recent_now = 100 * 86_400;
        record(
            &store,
            "recent",
            None,
            SearchMode::Semantic,
            &[ranked(3, 0.7)],
            5,
            None,
            None,
            recent_now,
        )
        .await
        .unwrap();

        let removed = cleanup_older_than(&store, Duration::days(30), recent_now)
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_cleanup_orphaned_removes_zero_result_searches() {
        let store = MemoryStore::new(2);
        record(
            &store,
            "hit",
            None,
            SearchMode::Semantic,
            &[ranked(1, 0.9)],
            5,
            None,
            None,
            10,
        )
        .await
        .unwrap();
        record(
            &store,
            "miss",
            None,
            SearchMode::Semantic,
            &[],
            5,
            None,
            None,
            10,
        )
        .await
        .unwrap();

        assert_eq!(cleanup_orphaned(&store).await.unwrap(), 1);
        assert_eq!(cleanup_orphaned(&store).await.unwrap(), 0);
        assert_eq!(popular_queries(&store, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_increments_usage() {
        let store = MemoryStore::new(2);
        record(
            &store,
            "bump",
            None,
            SearchMode::Semantic,
            &[ranked(1, 0.9)],
            5,
            None,
            None,
            50,
        )
        .await
        .unwrap();
        // Usage bookkeeping for a nonexistent embedding id must not
        // error; real ids are exercised in the engine tests.
        store.increment_usage(&[999], 60).await.unwrap();
    }

    #[tokio::test]
    async fn test_popular_queries_ordered_by_count() {
        let store = MemoryStore::new(2);
        for _ in 0..3 {
            record(
                &store,
                "hot query",
                None,
                SearchMode::Semantic,
                &[],
                1,
                None,
                None,
                10,
            )
            .await
            .unwrap();
        }
        record(
            &store,
            "cold query",
            None,
            SearchMode::Semantic,
            &[],
            1,
            None,
            None,
            10,
        )
        .await
        .unwrap();

        let popular = popular_queries(&store, 5).await.unwrap();
        assert_eq!(popular[0].query, "hot query");
        assert_eq!(popular[0].count, 3);
    }
}
