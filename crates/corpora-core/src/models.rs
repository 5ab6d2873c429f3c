//! Core data models for the retrieval engine.
//!
//! These types represent the documents, content payloads, embeddings, and
//! search records that flow through the ingestion and retrieval pipeline.
//! Content ownership is polymorphic over [`ContentKind`]: an embedding
//! references its owner by an explicit `(kind, id)` pair rather than a
//! subtype pointer.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// High-level type of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Text,
    Image,
    Audio,
    Pdf,
    Docx,
    Html,
    Markdown,
    Mixed,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Text => "text",
            DocumentType::Image => "image",
            DocumentType::Audio => "audio",
            DocumentType::Pdf => "pdf",
            DocumentType::Docx => "docx",
            DocumentType::Html => "html",
            DocumentType::Markdown => "markdown",
            DocumentType::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(DocumentType::Text),
            "image" => Ok(DocumentType::Image),
            "audio" => Ok(DocumentType::Audio),
            "pdf" => Ok(DocumentType::Pdf),
            "docx" => Ok(DocumentType::Docx),
            "html" => Ok(DocumentType::Html),
            "markdown" => Ok(DocumentType::Markdown),
            "mixed" => Ok(DocumentType::Mixed),
            other => Err(EngineError::Validation(format!(
                "unknown document type: {other}"
            ))),
        }
    }
}

/// Processing lifecycle of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "processed" => Ok(DocumentStatus::Processed),
            "error" => Ok(DocumentStatus::Error),
            other => Err(EngineError::Validation(format!(
                "unknown document status: {other}"
            ))),
        }
    }
}

/// Discriminant for polymorphic content ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Audio,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ContentKind::Text),
            "image" => Ok(ContentKind::Image),
            "audio" => Ok(ContentKind::Audio),
            other => Err(EngineError::Validation(format!(
                "unknown content kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LLM-derived document metadata.
///
/// Typed with an explicit field allow-list and validated at write time;
/// unknown keys are rejected during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DocumentMetadata {
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub classification: Option<String>,
    pub tags: Vec<String>,
}

/// File-level metadata captured at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileMetadata {
    pub size: Option<i64>,
    /// SHA-256 of the raw bytes, when the source is byte-addressable.
    pub hash: Option<String>,
    pub mime_type: Option<String>,
}

/// A stored document.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Unique source identifier. Force-override creates a disambiguated
    /// location rather than violating uniqueness.
    pub location: String,
    pub title: Option<String>,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub file_modified_at: Option<i64>,
    pub metadata: DocumentMetadata,
    pub file: FileMetadata,
    /// SHA-256 of the normalized extracted text.
    pub content_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Kind-specific content payload. The text used for chunking and
/// embedding depends on the variant: body, generated description, or
/// transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentPayload {
    Text {
        body: String,
    },
    Image {
        description: String,
        width: Option<u32>,
        height: Option<u32>,
    },
    Audio {
        transcript: String,
        duration_secs: Option<f64>,
        sample_rate: Option<u32>,
    },
}

impl ContentPayload {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentPayload::Text { .. } => ContentKind::Text,
            ContentPayload::Image { .. } => ContentKind::Image,
            ContentPayload::Audio { .. } => ContentKind::Audio,
        }
    }

    /// The text that receives embeddings for this payload.
    pub fn payload_text(&self) -> &str {
        match self {
            ContentPayload::Text { body } => body,
            ContentPayload::Image { description, .. } => description,
            ContentPayload::Audio { transcript, .. } => transcript,
        }
    }
}

/// A content item owned 1:N by a document. Destroyed with its document.
#[derive(Debug, Clone)]
pub struct Content {
    pub id: String,
    pub document_id: String,
    pub payload: ContentPayload,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        self.payload.kind()
    }

    pub fn payload_text(&self) -> &str {
        self.payload.payload_text()
    }
}

/// A new embedding row, one per chunk, written as part of an atomic
/// replace-set for a single owner.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub chunk_index: i64,
    pub content: String,
    pub vector: Vec<f32>,
}

/// A candidate returned from the store's vector scan.
///
/// Carries the usage statistics and document metadata the ranker needs,
/// avoiding per-candidate round-trips.
#[derive(Debug, Clone)]
pub struct EmbeddingMatch {
    pub embedding_id: i64,
    pub owner_kind: ContentKind,
    pub owner_id: String,
    pub chunk_index: i64,
    pub content: String,
    /// `1 - cosine_distance`, roughly `[0, 1]` for normalized embeddings.
    pub similarity: f64,
    pub usage_count: i64,
    pub last_used_at: Option<i64>,
    pub document_id: String,
    pub document_created_at: i64,
    pub classification: Option<String>,
    pub tags: Vec<String>,
}

/// A candidate returned from the store's lexical (full-text) search.
#[derive(Debug, Clone)]
pub struct LexicalMatch {
    pub document_id: String,
    /// Normalized `[0, 1]` rank score; `(limit - i) / limit` fallback when
    /// the backend has no native score.
    pub rank_score: f64,
}

/// Document-level filters applied by the store before the limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub owner_kind: Option<ContentKind>,
    pub classification: Option<String>,
    pub tags: Vec<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.owner_kind.is_none()
            && self.classification.is_none()
            && self.tags.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }
}

/// Which retrieval path produced a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Lexical,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Lexical => "lexical",
            SearchMode::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "lexical" => Ok(SearchMode::Lexical),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(EngineError::Validation(format!(
                "unknown search mode: {other}"
            ))),
        }
    }
}

/// A recorded search, including derived similarity statistics.
#[derive(Debug, Clone)]
pub struct SearchRecord {
    pub id: String,
    pub query: String,
    pub query_vector: Option<Vec<f32>>,
    pub mode: SearchMode,
    pub result_count: i64,
    pub min_similarity: Option<f64>,
    pub max_similarity: Option<f64>,
    pub avg_similarity: Option<f64>,
    pub execution_time_ms: i64,
    pub filters_json: Option<String>,
    pub options_json: Option<String>,
    pub created_at: i64,
}

/// One returned item of a recorded search, with later-settable `clicked`.
#[derive(Debug, Clone)]
pub struct SearchResultRecord {
    pub id: String,
    pub search_id: String,
    pub embedding_id: i64,
    pub rank: i64,
    pub similarity: f64,
    pub clicked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [ContentKind::Text, ContentKind::Image, ContentKind::Audio] {
            assert_eq!(ContentKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(ContentKind::parse("video").is_err());
    }

    #[test]
    fn test_payload_text_per_kind() {
        let text = ContentPayload::Text {
            body: "body".into(),
        };
        let image = ContentPayload::Image {
            description: "a cat".into(),
            width: Some(640),
            height: Some(480),
        };
        let audio = ContentPayload::Audio {
            transcript: "hello".into(),
            duration_secs: Some(1.5),
            sample_rate: Some(44_100),
        };
        assert_eq!(text.payload_text(), "body");
        assert_eq!(image.payload_text(), "a cat");
        assert_eq!(audio.payload_text(), "hello");
        assert_eq!(audio.kind(), ContentKind::Audio);
    }

    #[test]
    fn test_metadata_rejects_unknown_fields() {
        let ok: DocumentMetadata =
            serde_json::from_str(r#"{"summary":"s","tags":["a"]}"#).unwrap();
        assert_eq!(ok.summary.as_deref(), Some("s"));

        let bad = serde_json::from_str::<DocumentMetadata>(r#"{"summry":"typo"}"#);
        assert!(bad.is_err());
    }
}
