//! High-level engine facade: ingestion, processing, and search.
//!
//! The [`Engine`] ties the pipeline together: duplicate-checked document
//! creation, chunk-and-embed content processing with an atomic
//! replace-set per owner, and tracked semantic/hybrid search. It owns
//! the store, the embedding provider, and the configuration.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use corpora_core::cancel::CancelToken;
use corpora_core::chunk::chunk;
use corpora_core::dedup::{normalized_content_hash, DuplicateDecision, DuplicateDetector, IncomingDocument};
use corpora_core::embedding::EmbeddingProvider;
use corpora_core::error::{EngineError, Result};
use corpora_core::hybrid::{hybrid_search, HybridDocMatch, HybridOptions};
use corpora_core::models::{
    Content, ContentKind, ContentPayload, Document, DocumentMetadata, DocumentStatus, DocumentType,
    FileMetadata, NewEmbedding, SearchFilters, SearchMode,
};
use corpora_core::rank::RankedMatch;
use corpora_core::search::{semantic_search, SemanticOptions};
use corpora_core::store::Store;
use corpora_core::tracker;

use crate::config::Config;

/// Request to ingest one document with its content payloads.
#[derive(Debug, Clone)]
pub struct AddDocument {
    pub location: String,
    pub title: Option<String>,
    pub document_type: DocumentType,
    pub file: FileMetadata,
    pub file_modified_at: Option<i64>,
    pub metadata: DocumentMetadata,
    pub payloads: Vec<ContentPayload>,
    /// Skip duplicate detection and create under a disambiguated
    /// location.
    pub force: bool,
}

/// Outcome of [`Engine::add_document`].
#[derive(Debug, Clone)]
pub struct AddDocumentOutcome {
    pub document_id: String,
    /// `true` when an existing document was returned instead of creating
    /// a new one.
    pub duplicate: bool,
    /// Ids of the content rows created (empty for duplicates).
    pub content_ids: Vec<String>,
    /// Next pipeline step the caller must invoke. Ingestion never
    /// triggers processing itself.
    pub followup: Option<Followup>,
}

/// A follow-up step returned to the caller instead of a side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    /// Run [`Engine::process_document`] to chunk and embed the new
    /// document's contents.
    ProcessContent { document_id: String },
}

/// Per-call search options; unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f64>,
    pub filters: SearchFilters,
    /// Record the search and bump usage counters.
    pub track: bool,
}

/// Result of a tracked semantic search.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub matches: Vec<RankedMatch>,
    pub search_id: Option<String>,
    pub execution_time_ms: i64,
}

/// Result of a tracked hybrid search.
#[derive(Debug, Clone)]
pub struct HybridResponse {
    pub results: Vec<HybridDocMatch>,
    pub search_id: Option<String>,
    pub execution_time_ms: i64,
}

/// The retrieval engine facade.
pub struct Engine<S: Store> {
    store: S,
    provider: Box<dyn EmbeddingProvider>,
    config: Config,
    detector: DuplicateDetector,
    /// Owners with a replace-set write in progress. A second writer for
    /// the same owner is rejected rather than queued.
    in_flight: Mutex<HashSet<(ContentKind, String)>>,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, provider: Box<dyn EmbeddingProvider>, config: Config) -> Self {
        let detector = DuplicateDetector::new(config.dedup.length_tolerance);
        Self {
            store,
            provider,
            config,
            detector,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest a document. Runs tiered duplicate detection first; on a
    /// match, the existing document id is returned and nothing is
    /// written.
    pub async fn add_document(&self, req: AddDocument) -> Result<AddDocumentOutcome> {
        let extracted_text = req
            .payloads
            .iter()
            .map(|p| p.payload_text())
            .collect::<Vec<_>>()
            .join("\n");

        let incoming = IncomingDocument {
            location: req.location.clone(),
            title: req.title.clone(),
            document_type: req.document_type,
            file_hash: req.file.hash.clone(),
            extracted_text: extracted_text.clone(),
        };

        let location = match self.detector.detect(&self.store, &incoming, req.force).await? {
            DuplicateDecision::Existing { id, tier } => {
                debug!(document_id = %id, ?tier, "duplicate detected");
                return Ok(AddDocumentOutcome {
                    document_id: id,
                    duplicate: true,
                    content_ids: Vec::new(),
                    followup: None,
                });
            }
            DuplicateDecision::New => req.location.clone(),
            DuplicateDecision::Forced { location } => location,
        };

        let now = Utc::now().timestamp();
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            location,
            title: req.title,
            document_type: req.document_type,
            status: DocumentStatus::Pending,
            file_modified_at: req.file_modified_at,
            metadata: req.metadata,
            file: req.file,
            content_hash: Some(normalized_content_hash(&extracted_text)),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_document(&doc).await?;

        let mut content_ids = Vec::with_capacity(req.payloads.len());
        for payload in req.payloads {
            let content = Content {
                id: Uuid::new_v4().to_string(),
                document_id: doc.id.clone(),
                payload,
                embedding_model: self.provider.model_name().to_string(),
                chunk_size: self.config.chunking.max_tokens,
                chunk_overlap: self.config.chunking.overlap_tokens,
            };
            self.store.insert_content(&content).await?;
            content_ids.push(content.id);
        }

        info!(document_id = %doc.id, contents = content_ids.len(), "document added");
        let followup = Followup::ProcessContent {
            document_id: doc.id.clone(),
        };
        Ok(AddDocumentOutcome {
            document_id: doc.id,
            duplicate: false,
            content_ids,
            followup: Some(followup),
        })
    }

    /// Chunk and embed every content of a document, moving its status
    /// through `processing` to `processed` (or `error`).
    pub async fn process_document(&self, document_id: &str) -> Result<()> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown document: {document_id}")))?;

        self.store
            .update_document_status(&doc.id, DocumentStatus::Processing)
            .await?;

        let contents = self.store.contents_for_document(&doc.id).await?;
        for content in &contents {
            if let Err(e) = self.process_content(content).await {
                warn!(document_id = %doc.id, content_id = %content.id, error = %e, "processing failed");
                self.store
                    .update_document_status(&doc.id, DocumentStatus::Error)
                    .await?;
                return Err(e);
            }
        }

        self.store
            .update_document_status(&doc.id, DocumentStatus::Processed)
            .await?;
        info!(document_id = %doc.id, contents = contents.len(), "document processed");
        Ok(())
    }

    /// Chunk one content's text, embed every chunk, and atomically
    /// replace the owner's embedding set. All vectors are produced and
    /// validated before anything is written.
    pub async fn process_content(&self, content: &Content) -> Result<()> {
        let kind = content.kind();
        let _guard = InFlightGuard::acquire(&self.in_flight, kind, &content.id)?;

        let spans: Vec<_> = chunk(
            content.payload_text(),
            content.chunk_size,
            content.chunk_overlap,
        )?
        .collect();

        if spans.is_empty() {
            return self.store.replace_embeddings(kind, &content.id, &[]).await;
        }

        let texts: Vec<String> = spans.iter().map(|s| s.content.clone()).collect();
        let vectors = self.provider.embed_batch(&texts).await?;
        if vectors.len() != spans.len() {
            return Err(EngineError::Validation(format!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                spans.len()
            )));
        }

        let want = self.store.embedding_dims();
        let rows: Vec<NewEmbedding> = spans
            .iter()
            .zip(vectors)
            .map(|(span, vector)| {
                if vector.len() != want {
                    return Err(EngineError::InvalidVectorDimension {
                        got: vector.len(),
                        want,
                    });
                }
                Ok(NewEmbedding {
                    chunk_index: span.chunk_index as i64,
                    content: span.content.clone(),
                    vector,
                })
            })
            .collect::<Result<_>>()?;

        self.store.replace_embeddings(kind, &content.id, &rows).await?;
        debug!(content_id = %content.id, chunks = rows.len(), "embeddings replaced");
        Ok(())
    }

    /// Embed the query text.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(EngineError::Validation("query is empty".into()));
        }
        let mut vectors = self.provider.embed_batch(&[query.to_string()]).await?;
        if vectors.is_empty() {
            return Err(EngineError::Validation("empty embedding response".into()));
        }
        Ok(vectors.remove(0))
    }

    fn semantic_options(&self, opts: &SearchOptions) -> SemanticOptions {
        SemanticOptions {
            threshold: opts.threshold.unwrap_or(self.config.retrieval.threshold),
            limit: opts.limit.unwrap_or(self.config.retrieval.limit),
            candidate_limit: self.config.retrieval.candidate_k,
            filters: opts.filters.clone(),
            weights: self.config.retrieval.rank_weights(),
        }
    }

    /// Semantic search over the whole corpus.
    pub async fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
        cancel: &CancelToken,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let query_vec = self.embed_query(query).await?;
        let now = Utc::now().timestamp();

        let semantic_opts = self.semantic_options(opts);
        let matches = semantic_search(&self.store, &query_vec, &semantic_opts, now, cancel).await?;
        let execution_time_ms = started.elapsed().as_millis() as i64;

        let search_id = if opts.track {
            let filters_json = serde_json::to_string(&opts.filters).ok();
            let (record, _) = tracker::record(
                &self.store,
                query,
                Some(&query_vec),
                SearchMode::Semantic,
                &matches,
                execution_time_ms,
                filters_json,
                None,
                now,
            )
            .await?;
            Some(record.id)
        } else {
            None
        };

        Ok(SearchResponse {
            matches,
            search_id,
            execution_time_ms,
        })
    }

    /// Hybrid semantic + lexical search, grouped by document.
    pub async fn hybrid_search(
        &self,
        query: &str,
        opts: &SearchOptions,
        cancel: &CancelToken,
    ) -> Result<HybridResponse> {
        let started = Instant::now();
        let query_vec = self.embed_query(query).await?;
        let now = Utc::now().timestamp();

        let hybrid_opts = HybridOptions {
            weights: self.config.hybrid.weights(),
            semantic: self.semantic_options(opts),
            limit: opts.limit.unwrap_or(self.config.retrieval.limit),
        };
        let results = hybrid_search(&self.store, query, &query_vec, &hybrid_opts, now, cancel).await?;
        let execution_time_ms = started.elapsed().as_millis() as i64;

        let search_id = if opts.track {
            let best_chunks: Vec<RankedMatch> = results
                .iter()
                .filter_map(|r| r.best_chunk.clone())
                .collect();
            let filters_json = serde_json::to_string(&opts.filters).ok();
            let (record, _) = tracker::record(
                &self.store,
                query,
                Some(&query_vec),
                SearchMode::Hybrid,
                &best_chunks,
                execution_time_ms,
                filters_json,
                None,
                now,
            )
            .await?;
            Some(record.id)
        } else {
            None
        };

        Ok(HybridResponse {
            results,
            search_id,
            execution_time_ms,
        })
    }

    /// Click feedback on a tracked search result.
    pub async fn mark_result_clicked(&self, result_id: &str) -> Result<bool> {
        tracker::mark_clicked(&self.store, result_id).await
    }
}

/// RAII entry in the engine's per-owner in-flight set.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<(ContentKind, String)>>,
    key: (ContentKind, String),
}

impl<'a> InFlightGuard<'a> {
    fn acquire(
        set: &'a Mutex<HashSet<(ContentKind, String)>>,
        kind: ContentKind,
        owner_id: &str,
    ) -> Result<Self> {
        let key = (kind, owner_id.to_string());
        let mut guard = set
            .lock()
            .map_err(|_| EngineError::store("in-flight lock poisoned"))?;
        if !guard.insert(key.clone()) {
            return Err(EngineError::ConcurrentWrite {
                kind,
                owner_id: owner_id.to_string(),
            });
        }
        Ok(Self { set, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.set.lock() {
            guard.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corpora_core::error::EmbedError;
    use corpora_core::store::memory::MemoryStore;

    /// Deterministic provider: hashes each text onto the 2-d unit
    /// circle so distinct texts get distinct directions.
    struct StubProvider;

    fn stub_vector(text: &str) -> Vec<f32> {
        let h: u32 = text.bytes().map(u32::from).sum();
        let angle = (h % 7) as f32 * 0.2;
        vec![angle.cos(), angle.sin()]
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|t| stub_vector(t)).collect())
        }
    }

    /// Provider that parks on a gate, keeping the caller's in-flight
    /// guard held until the test releases it.
    struct GatedProvider {
        gate: std::sync::Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl EmbeddingProvider for GatedProvider {
        fn model_name(&self) -> &str {
            "gated"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            self.gate.notified().await;
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn test_config() -> Config {
        toml::from_str(
            r#"
            [db]
            path = "/tmp/unused.db"

            [chunking]
            max_tokens = 64
            overlap_tokens = 8
        "#,
        )
        .unwrap()
    }

    fn engine() -> Engine<MemoryStore> {
        Engine::new(MemoryStore::new(2), Box::new(StubProvider), test_config())
    }

    fn text_request(location: &str, body: &str) -> AddDocument {
        AddDocument {
            location: location.into(),
            title: None,
            document_type: DocumentType::Text,
            file: FileMetadata::default(),
            file_modified_at: None,
            metadata: DocumentMetadata::default(),
            payloads: vec![ContentPayload::Text { body: body.into() }],
            force: false,
        }
    }

    #[tokio::test]
    async fn test_add_document_then_duplicate() {
        let engine = engine();
        let first = engine
            .add_document(text_request("/a.txt", "some text"))
            .await
            .unwrap();
        assert!(!first.duplicate);
        assert_eq!(first.content_ids.len(), 1);
        assert_eq!(
            first.followup,
            Some(Followup::ProcessContent {
                document_id: first.document_id.clone()
            })
        );

        let second = engine
            .add_document(text_request("/a.txt", "some text"))
            .await
            .unwrap();
        assert!(second.duplicate);
        assert_eq!(second.document_id, first.document_id);
        assert_eq!(second.followup, None);
    }

    #[tokio::test]
    async fn test_force_creates_fresh_document() {
        let engine = engine();
        let first = engine
            .add_document(text_request("/a.txt", "some text"))
            .await
            .unwrap();
        let mut forced = text_request("/a.txt", "some text");
        forced.force = true;
        let second = engine.add_document(forced).await.unwrap();
        assert!(!second.duplicate);
        assert_ne!(second.document_id, first.document_id);
    }

    #[tokio::test]
    async fn test_process_document_sets_status() {
        let engine = engine();
        let added = engine
            .add_document(text_request("/a.txt", "words to chunk and embed"))
            .await
            .unwrap();
        engine.process_document(&added.document_id).await.unwrap();

        let doc = engine
            .store()
            .get_document(&added.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Processed);
    }

    #[tokio::test]
    async fn test_unknown_document_rejected() {
        let engine = engine();
        let err = engine.process_document("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let engine = engine();
        let err = engine
            .search("   ", &SearchOptions::default(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_finds_processed_content() {
        let engine = engine();
        let added = engine
            .add_document(text_request("/a.txt", "retrieval engines are fun"))
            .await
            .unwrap();
        engine.process_document(&added.document_id).await.unwrap();

        let response = engine
            .search(
                "retrieval engines are fun",
                &SearchOptions::default(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(!response.matches.is_empty());
        assert!(response.search_id.is_none());
    }

    #[tokio::test]
    async fn test_overlapping_writes_for_same_owner_rejected() {
        let gate = std::sync::Arc::new(tokio::sync::Notify::new());
        let engine = Engine::new(
            MemoryStore::new(2),
            Box::new(GatedProvider {
                gate: std::sync::Arc::clone(&gate),
            }),
            test_config(),
        );
        let added = engine
            .add_document(text_request("/a.txt", "contended owner body"))
            .await
            .unwrap();
        let content = engine
            .store()
            .contents_for_document(&added.document_id)
            .await
            .unwrap()
            .remove(0);

        // The first call parks inside the provider with the guard held;
        // the second call for the same owner must fail, not queue.
        let first = engine.process_content(&content);
        let second = async {
            let err = engine.process_content(&content).await.unwrap_err();
            gate.notify_one();
            err
        };
        let (first, err) = tokio::join!(first, second);
        first.unwrap();
        assert!(matches!(
            err,
            EngineError::ConcurrentWrite {
                kind: ContentKind::Text,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_tracked_search_records_and_click() {
        let engine = engine();
        let added = engine
            .add_document(text_request("/a.txt", "tracked search target"))
            .await
            .unwrap();
        engine.process_document(&added.document_id).await.unwrap();

        let opts = SearchOptions {
            track: true,
            ..Default::default()
        };
        let response = engine
            .search("tracked search target", &opts, &CancelToken::new())
            .await
            .unwrap();
        assert!(response.search_id.is_some());
    }
}
