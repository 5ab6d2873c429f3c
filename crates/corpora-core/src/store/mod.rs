//! Storage abstraction for the retrieval engine.
//!
//! The [`Store`] trait defines every persistence operation the core
//! pipeline needs, enabling pluggable backends (SQLite, in-memory).
//! Implementations must be `Send + Sync` and must uphold one cross-cutting
//! invariant under concurrency: the embedding replace-set for an owner is
//! atomic — readers observe the pre- or post-write state, never a partial
//! set.

pub mod memory;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::models::{
    Content, ContentKind, Document, DocumentStatus, DocumentType, EmbeddingMatch, LexicalMatch,
    NewEmbedding, SearchFilters, SearchRecord, SearchResultRecord,
};

/// Candidate returned by the duplicate detector's similarity tier lookup.
#[derive(Debug, Clone)]
pub struct SimilarCandidate {
    pub id: String,
    pub title: Option<String>,
    /// Combined character length of the document's extracted text.
    pub content_length: usize,
}

/// A query string with its recorded frequency, for search analytics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularQuery {
    pub query: String,
    pub count: i64,
}

/// Abstract storage backend.
///
/// Read operations (`vector_search`, `lexical_search`) take a
/// [`CancelToken`] and must return `Cancelled` instead of a truncated
/// result set when it fires. Filters are applied before the limit, so the
/// limit always returns the best-available matches under the filter.
#[async_trait]
pub trait Store: Send + Sync {
    /// Configured embedding dimensionality for this store.
    fn embedding_dims(&self) -> usize;

    // ── Documents ──────────────────────────────────────────────────────

    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn find_document_by_location(&self, location: &str) -> Result<Option<Document>>;

    async fn find_document_by_file_hash(&self, hash: &str) -> Result<Option<Document>>;

    async fn find_document_by_content_hash(&self, hash: &str) -> Result<Option<Document>>;

    /// Candidates for the duplicate detector's similarity tier: same
    /// location basename and document type.
    async fn find_documents_by_basename(
        &self,
        basename: &str,
        document_type: DocumentType,
    ) -> Result<Vec<SimilarCandidate>>;

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> Result<()>;

    /// Delete a document and cascade to its contents, their embeddings,
    /// and any search results pointing at those embeddings.
    async fn delete_document(&self, id: &str) -> Result<()>;

    // ── Contents ───────────────────────────────────────────────────────

    async fn insert_content(&self, content: &Content) -> Result<()>;

    async fn contents_for_document(&self, document_id: &str) -> Result<Vec<Content>>;

    async fn get_content(&self, kind: ContentKind, id: &str) -> Result<Option<Content>>;

    // ── Embeddings ─────────────────────────────────────────────────────

    /// Replace the full embedding set for one owner atomically: old
    /// entries deleted and new ones inserted in the same transaction
    /// boundary. Never leaves a partial set behind, and never leaves
    /// search results pointing at the replaced entries.
    async fn replace_embeddings(
        &self,
        kind: ContentKind,
        owner_id: &str,
        rows: &[NewEmbedding],
    ) -> Result<()>;

    /// Nearest-neighbor scan. Ordering: similarity desc, then chunk_index
    /// asc, then embedding id asc. Only matches at or above `threshold`
    /// and passing `filters` count toward `limit`.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
        filters: &SearchFilters,
        cancel: &CancelToken,
    ) -> Result<Vec<EmbeddingMatch>>;

    /// Token-weighted full-text search over indexed chunk content,
    /// grouped by document. Terms hit whole tokens only, never
    /// substrings of longer words.
    async fn lexical_search(
        &self,
        terms: &[String],
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<LexicalMatch>>;

    /// Bump `usage_count` and `last_used_at` for the given embeddings.
    /// The only permitted mutation of stored embeddings besides a full
    /// replace.
    async fn increment_usage(&self, embedding_ids: &[i64], now: i64) -> Result<()>;

    // ── Search tracking ────────────────────────────────────────────────

    async fn insert_search(&self, search: &SearchRecord) -> Result<()>;

    async fn insert_search_results(&self, results: &[SearchResultRecord]) -> Result<()>;

    /// Set `clicked` on a search result. Idempotent; returns `true` only
    /// when the flag actually flipped (false for repeats and unknown ids).
    async fn mark_result_clicked(&self, result_id: &str) -> Result<bool>;

    /// Fraction of recorded searches with at least one clicked result.
    /// `None` when no searches have been recorded.
    async fn click_through_rate(&self) -> Result<Option<f64>>;

    /// Mean execution time over recorded searches, in milliseconds.
    async fn avg_execution_time_ms(&self) -> Result<Option<f64>>;

    /// Most frequent query strings, count desc then query asc.
    async fn popular_queries(&self, limit: usize) -> Result<Vec<PopularQuery>>;

    /// Remove searches that returned zero results. Returns the number
    /// removed.
    async fn cleanup_orphaned_searches(&self) -> Result<u64>;

    /// Remove searches created before `cutoff` that have no clicked
    /// result. Returns the number removed.
    async fn cleanup_searches_older_than(&self, cutoff: i64) -> Result<u64>;
}
