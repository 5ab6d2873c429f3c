//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`crate::migrate`]: documents, contents, embeddings (with an FTS5
//! shadow table for lexical search), searches, and search_results.
//! Vector similarity is computed in Rust over fetched BLOBs; document
//! filters are pushed into SQL where the schema allows.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use corpora_core::cancel::CancelToken;
use corpora_core::dedup::location_basename;
use corpora_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use corpora_core::error::{EngineError, Result};
use corpora_core::models::{
    Content, ContentKind, ContentPayload, Document, DocumentMetadata, DocumentStatus, DocumentType,
    EmbeddingMatch, FileMetadata, LexicalMatch, NewEmbedding, SearchFilters, SearchRecord,
    SearchResultRecord,
};
use corpora_core::store::{PopularQuery, SimilarCandidate, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> EngineError {
    EngineError::store(e)
}

fn doc_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| EngineError::store(format!("corrupt metadata_json: {e}")))?;
    let document_type: String = row.get("document_type");
    let status: String = row.get("status");

    Ok(Document {
        id: row.get("id"),
        location: row.get("location"),
        title: row.get("title"),
        document_type: DocumentType::parse(&document_type)?,
        status: DocumentStatus::parse(&status)?,
        file_modified_at: row.get("file_modified_at"),
        metadata,
        file: FileMetadata {
            size: row.get("file_size"),
            hash: row.get("file_hash"),
            mime_type: row.get("mime_type"),
        },
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn content_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Content> {
    let payload_json: String = row.get("payload_json");
    let payload: ContentPayload = serde_json::from_str(&payload_json)
        .map_err(|e| EngineError::store(format!("corrupt payload_json: {e}")))?;
    let chunk_size: i64 = row.get("chunk_size");
    let chunk_overlap: i64 = row.get("chunk_overlap");

    Ok(Content {
        id: row.get("id"),
        document_id: row.get("document_id"),
        payload,
        embedding_model: row.get("embedding_model"),
        chunk_size: chunk_size as usize,
        chunk_overlap: chunk_overlap as usize,
    })
}

const DOC_COLUMNS: &str = "id, location, title, document_type, status, file_modified_at, \
                           file_size, file_hash, mime_type, content_hash, metadata_json, \
                           created_at, updated_at";

impl SqliteStore {
    async fn find_document_where(&self, clause: &str, value: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOC_COLUMNS} FROM documents WHERE {clause} = ?"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(doc_from_row).transpose()
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn embedding_dims(&self) -> usize {
        self.dims
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let metadata_json =
            serde_json::to_string(&doc.metadata).map_err(EngineError::store)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, location, title, document_type, status,
                                   file_modified_at, file_size, file_hash, mime_type,
                                   content_hash, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.location)
        .bind(&doc.title)
        .bind(doc.document_type.as_str())
        .bind(doc.status.as_str())
        .bind(doc.file_modified_at)
        .bind(doc.file.size)
        .bind(&doc.file.hash)
        .bind(&doc.file.mime_type)
        .bind(&doc.content_hash)
        .bind(&metadata_json)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.find_document_where("id", id).await
    }

    async fn find_document_by_location(&self, location: &str) -> Result<Option<Document>> {
        self.find_document_where("location", location).await
    }

    async fn find_document_by_file_hash(&self, hash: &str) -> Result<Option<Document>> {
        self.find_document_where("file_hash", hash).await
    }

    async fn find_document_by_content_hash(&self, hash: &str) -> Result<Option<Document>> {
        self.find_document_where("content_hash", hash).await
    }

    async fn find_documents_by_basename(
        &self,
        basename: &str,
        document_type: DocumentType,
    ) -> Result<Vec<SimilarCandidate>> {
        // Basename extraction happens in Rust; the type filter and a LIKE
        // prefilter keep the scan cheap.
        let rows = sqlx::query(&format!(
            "SELECT {DOC_COLUMNS} FROM documents WHERE document_type = ? AND location LIKE ?"
        ))
        .bind(document_type.as_str())
        .bind(format!("%{basename}"))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut candidates = Vec::new();
        for row in &rows {
            let doc = doc_from_row(row)?;
            if location_basename(&doc.location) != basename {
                continue;
            }
            let contents = self.contents_for_document(&doc.id).await?;
            let content_length = contents
                .iter()
                .map(|c| c.payload_text().chars().count())
                .sum();
            candidates.push(SimilarCandidate {
                id: doc.id,
                title: doc.title,
                content_length,
            });
        }
        Ok(candidates)
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // Search results die with their embedding; there is no FK to
        // enforce it, so the purge is explicit.
        sqlx::query(
            r#"
            DELETE FROM search_results
            WHERE embedding_id IN (
                SELECT e.id FROM embeddings e
                JOIN contents c ON c.id = e.owner_id
                WHERE c.document_id = ?
            )
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query("DELETE FROM embeddings_fts WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        // contents and embeddings go via FK cascade
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn insert_content(&self, content: &Content) -> Result<()> {
        let payload_json =
            serde_json::to_string(&content.payload).map_err(EngineError::store)?;
        sqlx::query(
            r#"
            INSERT INTO contents (id, document_id, kind, payload_json,
                                  embedding_model, chunk_size, chunk_overlap)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&content.document_id)
        .bind(content.kind().as_str())
        .bind(&payload_json)
        .bind(&content.embedding_model)
        .bind(content.chunk_size as i64)
        .bind(content.chunk_overlap as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn contents_for_document(&self, document_id: &str) -> Result<Vec<Content>> {
        let rows = sqlx::query(
            "SELECT id, document_id, payload_json, embedding_model, chunk_size, chunk_overlap \
             FROM contents WHERE document_id = ? ORDER BY id ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(content_from_row).collect()
    }

    async fn get_content(&self, kind: ContentKind, id: &str) -> Result<Option<Content>> {
        let row = sqlx::query(
            "SELECT id, document_id, payload_json, embedding_model, chunk_size, chunk_overlap \
             FROM contents WHERE id = ? AND kind = ?",
        )
        .bind(id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(content_from_row).transpose()
    }

    async fn replace_embeddings(
        &self,
        kind: ContentKind,
        owner_id: &str,
        rows: &[NewEmbedding],
    ) -> Result<()> {
        let document_id: Option<String> =
            sqlx::query_scalar("SELECT document_id FROM contents WHERE id = ?")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        let document_id = document_id.ok_or_else(|| {
            EngineError::Validation(format!("unknown embedding owner: {kind}/{owner_id}"))
        })?;

        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let old_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM embeddings WHERE owner_kind = ? AND owner_id = ?")
                .bind(kind.as_str())
                .bind(owner_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(store_err)?;

        for old_id in &old_ids {
            sqlx::query("DELETE FROM embeddings_fts WHERE embedding_id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            sqlx::query("DELETE FROM search_results WHERE embedding_id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }

        sqlx::query("DELETE FROM embeddings WHERE owner_kind = ? AND owner_id = ?")
            .bind(kind.as_str())
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        for row in rows {
            let blob = vec_to_blob(&row.vector);
            let result = sqlx::query(
                r#"
                INSERT INTO embeddings (owner_kind, owner_id, chunk_index, content, vector)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(kind.as_str())
            .bind(owner_id)
            .bind(row.chunk_index)
            .bind(&row.content)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

            sqlx::query(
                "INSERT INTO embeddings_fts (embedding_id, document_id, content) VALUES (?, ?, ?)",
            )
            .bind(result.last_insert_rowid())
            .bind(&document_id)
            .bind(&row.content)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
        filters: &SearchFilters,
        cancel: &CancelToken,
    ) -> Result<Vec<EmbeddingMatch>> {
        if query_vec.len() != self.dims {
            return Err(EngineError::InvalidVectorDimension {
                got: query_vec.len(),
                want: self.dims,
            });
        }
        cancel.check()?;

        let mut sql = String::from(
            r#"
            SELECT e.id AS embedding_id, e.owner_kind, e.owner_id, e.chunk_index,
                   e.content, e.vector, e.usage_count, e.last_used_at,
                   c.document_id, d.created_at AS document_created_at, d.metadata_json
            FROM embeddings e
            JOIN contents c ON c.id = e.owner_id
            JOIN documents d ON d.id = c.document_id
            WHERE 1 = 1
            "#,
        );
        if filters.owner_kind.is_some() {
            sql.push_str(" AND e.owner_kind = ?");
        }
        if filters.classification.is_some() {
            sql.push_str(" AND json_extract(d.metadata_json, '$.classification') = ?");
        }
        if filters.date_from.is_some() {
            sql.push_str(" AND d.created_at >= ?");
        }
        if filters.date_to.is_some() {
            sql.push_str(" AND d.created_at <= ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(kind) = filters.owner_kind {
            query = query.bind(kind.as_str());
        }
        if let Some(classification) = &filters.classification {
            query = query.bind(classification);
        }
        if let Some(from) = filters.date_from {
            query = query.bind(from);
        }
        if let Some(to) = filters.date_to {
            query = query.bind(to);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        let mut matches = Vec::new();
        for row in &rows {
            cancel.check()?;

            let metadata_json: String = row.get("metadata_json");
            let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
                .map_err(|e| EngineError::store(format!("corrupt metadata_json: {e}")))?;
            // Tag filter stays in Rust; tags live inside metadata_json.
            if !filters.tags.is_empty()
                && !filters.tags.iter().any(|t| metadata.tags.contains(t))
            {
                continue;
            }

            let blob: Vec<u8> = row.get("vector");
            let vector = blob_to_vec(&blob);
            let similarity = cosine_similarity(query_vec, &vector) as f64;
            if similarity < threshold {
                continue;
            }

            let owner_kind: String = row.get("owner_kind");
            matches.push(EmbeddingMatch {
                embedding_id: row.get("embedding_id"),
                owner_kind: ContentKind::parse(&owner_kind)?,
                owner_id: row.get("owner_id"),
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                similarity,
                usage_count: row.get("usage_count"),
                last_used_at: row.get("last_used_at"),
                document_id: row.get("document_id"),
                document_created_at: row.get("document_created_at"),
                classification: metadata.classification,
                tags: metadata.tags,
            });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
                .then(a.embedding_id.cmp(&b.embedding_id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn lexical_search(
        &self,
        terms: &[String],
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<LexicalMatch>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        cancel.check()?;

        // Quote each term so FTS5 treats it literally, OR-joined.
        let match_expr = terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ");

        let rows = sqlx::query(
            r#"
            SELECT document_id, MIN(rank) AS best_rank
            FROM embeddings_fts
            WHERE embeddings_fts MATCH ?
            GROUP BY document_id
            ORDER BY best_rank ASC, document_id ASC
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        cancel.check()?;

        // BM25 rank is an opaque negative weight; map positions onto the
        // normalized (limit - i) / limit scale the combiner expects.
        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, row)| LexicalMatch {
                document_id: row.get("document_id"),
                rank_score: (limit - i) as f64 / limit as f64,
            })
            .collect())
    }

    async fn increment_usage(&self, embedding_ids: &[i64], now: i64) -> Result<()> {
        if embedding_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for id in embedding_ids {
            sqlx::query(
                "UPDATE embeddings SET usage_count = usage_count + 1, last_used_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn insert_search(&self, search: &SearchRecord) -> Result<()> {
        let vector_blob = search.query_vector.as_ref().map(|v| vec_to_blob(v));
        sqlx::query(
            r#"
            INSERT INTO searches (id, query, query_vector, mode, result_count,
                                  min_similarity, max_similarity, avg_similarity,
                                  execution_time_ms, filters_json, options_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&search.id)
        .bind(&search.query)
        .bind(vector_blob)
        .bind(search.mode.as_str())
        .bind(search.result_count)
        .bind(search.min_similarity)
        .bind(search.max_similarity)
        .bind(search.avg_similarity)
        .bind(search.execution_time_ms)
        .bind(&search.filters_json)
        .bind(&search.options_json)
        .bind(search.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn insert_search_results(&self, results: &[SearchResultRecord]) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for r in results {
            sqlx::query(
                r#"
                INSERT INTO search_results (id, search_id, embedding_id, rank, similarity, clicked)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.id)
            .bind(&r.search_id)
            .bind(r.embedding_id)
            .bind(r.rank)
            .bind(r.similarity)
            .bind(r.clicked as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn mark_result_clicked(&self, result_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE search_results SET clicked = 1 WHERE id = ? AND clicked = 0")
                .bind(result_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn click_through_rate(&self) -> Result<Option<f64>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM searches")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        if total == 0 {
            return Ok(None);
        }
        let clicked: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT search_id) FROM search_results WHERE clicked = 1",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(Some(clicked as f64 / total as f64))
    }

    async fn avg_execution_time_ms(&self) -> Result<Option<f64>> {
        let avg: Option<f64> = sqlx::query_scalar("SELECT AVG(execution_time_ms) FROM searches")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(avg)
    }

    async fn popular_queries(&self, limit: usize) -> Result<Vec<PopularQuery>> {
        let rows = sqlx::query(
            r#"
            SELECT query, COUNT(*) AS count
            FROM searches
            GROUP BY query
            ORDER BY count DESC, query ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .iter()
            .map(|row| PopularQuery {
                query: row.get("query"),
                count: row.get("count"),
            })
            .collect())
    }

    async fn cleanup_orphaned_searches(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM searches
            WHERE NOT EXISTS (
                SELECT 1 FROM search_results r WHERE r.search_id = searches.id
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn cleanup_searches_older_than(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM searches
            WHERE created_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM search_results r
                  WHERE r.search_id = searches.id AND r.clicked = 1
              )
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
