//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! State lives in `HashMap`/`Vec` behind `std::sync::RwLock`, giving the
//! read-many/write-one discipline the engine requires. Vector search is a
//! brute-force cosine scan; lexical search counts whole-token term hits
//! per document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::dedup::location_basename;
use crate::embedding::cosine_similarity;
use crate::error::{EngineError, Result};
use crate::models::{
    Content, ContentKind, Document, DocumentStatus, DocumentType, EmbeddingMatch, LexicalMatch,
    NewEmbedding, SearchFilters, SearchRecord, SearchResultRecord,
};

use super::{PopularQuery, SimilarCandidate, Store};

#[derive(Debug, Clone)]
struct StoredEmbedding {
    id: i64,
    owner_kind: ContentKind,
    owner_id: String,
    chunk_index: i64,
    content: String,
    vector: Vec<f32>,
    usage_count: i64,
    last_used_at: Option<i64>,
}

/// In-memory store configured with a fixed embedding dimensionality.
pub struct MemoryStore {
    dims: usize,
    docs: RwLock<HashMap<String, Document>>,
    contents: RwLock<Vec<Content>>,
    embeddings: RwLock<Vec<StoredEmbedding>>,
    next_embedding_id: AtomicI64,
    searches: RwLock<Vec<SearchRecord>>,
    results: RwLock<Vec<SearchResultRecord>>,
}

impl MemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            docs: RwLock::new(HashMap::new()),
            contents: RwLock::new(Vec::new()),
            embeddings: RwLock::new(Vec::new()),
            next_embedding_id: AtomicI64::new(1),
            searches: RwLock::new(Vec::new()),
            results: RwLock::new(Vec::new()),
        }
    }

    fn document_id_for_owner(&self, kind: ContentKind, owner_id: &str) -> Option<String> {
        let contents = self.contents.read().unwrap();
        contents
            .iter()
            .find(|c| c.kind() == kind && c.id == owner_id)
            .map(|c| c.document_id.clone())
    }

    fn passes_filters(doc: &Document, kind: ContentKind, filters: &SearchFilters) -> bool {
        if let Some(want) = filters.owner_kind {
            if kind != want {
                return false;
            }
        }
        if let Some(ref class) = filters.classification {
            if doc.metadata.classification.as_deref() != Some(class.as_str()) {
                return false;
            }
        }
        if !filters.tags.is_empty() {
            let overlap = filters
                .tags
                .iter()
                .any(|t| doc.metadata.tags.iter().any(|d| d == t));
            if !overlap {
                return false;
            }
        }
        if let Some(from) = filters.date_from {
            if doc.created_at < from {
                return false;
            }
        }
        if let Some(to) = filters.date_to {
            if doc.created_at > to {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn embedding_dims(&self) -> usize {
        self.dims
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        if docs.values().any(|d| d.location == doc.location) {
            return Err(EngineError::store(format!(
                "location already exists: {}",
                doc.location
            )));
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().unwrap().get(id).cloned())
    }

    async fn find_document_by_location(&self, location: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.values().find(|d| d.location == location).cloned())
    }

    async fn find_document_by_file_hash(&self, hash: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs
            .values()
            .find(|d| d.file.hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn find_document_by_content_hash(&self, hash: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs
            .values()
            .find(|d| d.content_hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn find_documents_by_basename(
        &self,
        basename: &str,
        document_type: DocumentType,
    ) -> Result<Vec<SimilarCandidate>> {
        let docs = self.docs.read().unwrap();
        let contents = self.contents.read().unwrap();
        let mut out: Vec<SimilarCandidate> = docs
            .values()
            .filter(|d| {
                d.document_type == document_type && location_basename(&d.location) == basename
            })
            .map(|d| {
                let content_length: usize = contents
                    .iter()
                    .filter(|c| c.document_id == d.id)
                    .map(|c| c.payload_text().chars().count())
                    .sum();
                SimilarCandidate {
                    id: d.id.clone(),
                    title: d.title.clone(),
                    content_length,
                }
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        match docs.get_mut(id) {
            Some(doc) => {
                doc.status = status;
                doc.updated_at = chrono::Utc::now().timestamp();
                Ok(())
            }
            None => Err(EngineError::store(format!("no such document: {id}"))),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let owner_ids: Vec<(ContentKind, String)> = {
            let contents = self.contents.read().unwrap();
            contents
                .iter()
                .filter(|c| c.document_id == id)
                .map(|c| (c.kind(), c.id.clone()))
                .collect()
        };

        let removed_embedding_ids: Vec<i64> = {
            let mut embeddings = self.embeddings.write().unwrap();
            let removed: Vec<i64> = embeddings
                .iter()
                .filter(|e| {
                    owner_ids
                        .iter()
                        .any(|(k, oid)| e.owner_kind == *k && e.owner_id == *oid)
                })
                .map(|e| e.id)
                .collect();
            embeddings.retain(|e| !removed.contains(&e.id));
            removed
        };

        self.results
            .write()
            .unwrap()
            .retain(|r| !removed_embedding_ids.contains(&r.embedding_id));
        self.contents
            .write()
            .unwrap()
            .retain(|c| c.document_id != id);
        self.docs.write().unwrap().remove(id);
        Ok(())
    }

    async fn insert_content(&self, content: &Content) -> Result<()> {
        self.contents.write().unwrap().push(content.clone());
        Ok(())
    }

    async fn contents_for_document(&self, document_id: &str) -> Result<Vec<Content>> {
        let contents = self.contents.read().unwrap();
        Ok(contents
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn get_content(&self, kind: ContentKind, id: &str) -> Result<Option<Content>> {
        let contents = self.contents.read().unwrap();
        Ok(contents
            .iter()
            .find(|c| c.kind() == kind && c.id == id)
            .cloned())
    }

    async fn replace_embeddings(
        &self,
        kind: ContentKind,
        owner_id: &str,
        rows: &[NewEmbedding],
    ) -> Result<()> {
        for row in rows {
            if row.vector.len() != self.dims {
                return Err(EngineError::InvalidVectorDimension {
                    got: row.vector.len(),
                    want: self.dims,
                });
            }
        }

        // Single write lock covers delete + insert: readers never see a
        // partial replace-set.
        let mut embeddings = self.embeddings.write().unwrap();
        let replaced_ids: Vec<i64> = embeddings
            .iter()
            .filter(|e| e.owner_kind == kind && e.owner_id == owner_id)
            .map(|e| e.id)
            .collect();
        embeddings.retain(|e| !replaced_ids.contains(&e.id));
        // Search results die with the embedding they point at.
        self.results
            .write()
            .unwrap()
            .retain(|r| !replaced_ids.contains(&r.embedding_id));
        for row in rows {
            let id = self.next_embedding_id.fetch_add(1, Ordering::SeqCst);
            embeddings.push(StoredEmbedding {
                id,
                owner_kind: kind,
                owner_id: owner_id.to_string(),
                chunk_index: row.chunk_index,
                content: row.content.clone(),
                vector: row.vector.clone(),
                usage_count: 0,
                last_used_at: None,
            });
        }
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

        let embeddings = self.embeddings.read().unwrap();
        let docs = self.docs.read().unwrap();

        let mut matches: Vec<EmbeddingMatch> = Vec::new();
        for e in embeddings.iter() {
            cancel.check()?;

            let document_id = match self.document_id_for_owner(e.owner_kind, &e.owner_id) {
                Some(id) => id,
                None => continue,
            };
            let doc = match docs.get(&document_id) {
                Some(d) => d,
                None => continue,
            };
            if !Self::passes_filters(doc, e.owner_kind, filters) {
                continue;
            }

            let similarity = cosine_similarity(query_vec, &e.vector) as f64;
            if similarity < threshold {
                continue;
            }

            matches.push(EmbeddingMatch {
                embedding_id: e.id,
                owner_kind: e.owner_kind,
                owner_id: e.owner_id.clone(),
                chunk_index: e.chunk_index,
                content: e.content.clone(),
                similarity,
                usage_count: e.usage_count,
                last_used_at: e.last_used_at,
                document_id,
                document_created_at: doc.created_at,
                classification: doc.metadata.classification.clone(),
                tags: doc.metadata.tags.clone(),
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

        let embeddings = self.embeddings.read().unwrap();
        let mut doc_hits: HashMap<String, usize> = HashMap::new();

        for e in embeddings.iter() {
            cancel.check()?;
            // Whole-token comparison, mirroring how a full-text index
            // tokenizes: "network" does not hit "networking".
            let text = e.content.to_lowercase();
            let hits: usize = text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|tok| !tok.is_empty())
                .filter(|tok| terms.iter().any(|t| t == tok))
                .count();
            if hits > 0 {
                if let Some(doc_id) = self.document_id_for_owner(e.owner_kind, &e.owner_id) {
                    *doc_hits.entry(doc_id).or_insert(0) += hits;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = doc_hits.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(i, (document_id, _))| LexicalMatch {
                document_id,
                rank_score: (limit - i) as f64 / limit as f64,
            })
            .collect())
    }

    async fn increment_usage(&self, embedding_ids: &[i64], now: i64) -> Result<()> {
        let mut embeddings = self.embeddings.write().unwrap();
        for e in embeddings.iter_mut() {
            if embedding_ids.contains(&e.id) {
                e.usage_count += 1;
                e.last_used_at = Some(now);
            }
        }
        Ok(())
    }

    async fn insert_search(&self, search: &SearchRecord) -> Result<()> {
        self.searches.write().unwrap().push(search.clone());
        Ok(())
    }

    async fn insert_search_results(&self, results: &[SearchResultRecord]) -> Result<()> {
        self.results.write().unwrap().extend_from_slice(results);
        Ok(())
    }

    async fn mark_result_clicked(&self, result_id: &str) -> Result<bool> {
        let mut results = self.results.write().unwrap();
        match results.iter_mut().find(|r| r.id == result_id) {
            Some(r) if !r.clicked => {
                r.clicked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn click_through_rate(&self) -> Result<Option<f64>> {
        let searches = self.searches.read().unwrap();
        if searches.is_empty() {
            return Ok(None);
        }
        let results = self.results.read().unwrap();
        let clicked_searches = searches
            .iter()
            .filter(|s| results.iter().any(|r| r.search_id == s.id && r.clicked))
            .count();
        Ok(Some(clicked_searches as f64 / searches.len() as f64))
    }

    async fn avg_execution_time_ms(&self) -> Result<Option<f64>> {
        let searches = self.searches.read().unwrap();
        if searches.is_empty() {
            return Ok(None);
        }
        let total: i64 = searches.iter().map(|s| s.execution_time_ms).sum();
        Ok(Some(total as f64 / searches.len() as f64))
    }

    async fn popular_queries(&self, limit: usize) -> Result<Vec<PopularQuery>> {
        let searches = self.searches.read().unwrap();
        let mut counts: HashMap<String, i64> = HashMap::new();
        for s in searches.iter() {
            *counts.entry(s.query.clone()).or_insert(0) += 1;
        }
        let mut out: Vec<PopularQuery> = counts
            .into_iter()
            .map(|(query, count)| PopularQuery { query, count })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then(a.query.cmp(&b.query)));
        out.truncate(limit);
        Ok(out)
    }

    async fn cleanup_orphaned_searches(&self) -> Result<u64> {
        // Lock order: searches before results, same as the age cleanup.
        let mut searches = self.searches.write().unwrap();
        let results = self.results.read().unwrap();
        let before = searches.len();
        searches.retain(|s| results.iter().any(|r| r.search_id == s.id));
        Ok((before - searches.len()) as u64)
    }

    async fn cleanup_searches_older_than(&self, cutoff: i64) -> Result<u64> {
        let mut searches = self.searches.write().unwrap();
        let mut results = self.results.write().unwrap();
        let stale: Vec<String> = searches
            .iter()
            .filter(|s| {
                s.created_at < cutoff
                    && !results.iter().any(|r| r.search_id == s.id && r.clicked)
            })
            .map(|s| s.id.clone())
            .collect();
        searches.retain(|s| !stale.contains(&s.id));
        results.retain(|r| !stale.contains(&r.search_id));
        Ok(stale.len() as u64)
    }
}
