//! Duplicate detection for incoming documents.
//!
//! Before a new document is created, the detector decides whether it is
//! identical or near-identical to one already stored. Four tiers are
//! checked in priority order, each only when the prior tier found
//! nothing:
//!
//! 1. exact `location` match,
//! 2. SHA-256 of the raw bytes (when the source is byte-addressable),
//! 3. SHA-256 of the normalized extracted text,
//! 4. similarity heuristic: same basename + same document type + same
//!    title (when present) + content length within a configurable
//!    tolerance (default 5%).
//!
//! The detector is a decision function: it always returns an outcome and
//! never errors on ambiguity. Only a missing location is rejected.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::DocumentType;
use crate::store::Store;

/// Default length tolerance for the similarity tier (5%).
pub const DEFAULT_LENGTH_TOLERANCE: f64 = 0.05;

/// Outcome of duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateDecision {
    /// An existing document matched; reuse its id.
    Existing { id: String, tier: MatchTier },
    /// No match; create a new document.
    New,
    /// Forced creation under a disambiguated location.
    Forced { location: String },
}

/// Which tier produced an `Existing` decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Location,
    FileHash,
    ContentHash,
    Similarity,
}

/// Fingerprint of an incoming document before creation.
#[derive(Debug, Clone)]
pub struct IncomingDocument {
    pub location: String,
    pub title: Option<String>,
    pub document_type: DocumentType,
    /// SHA-256 of the raw bytes, when available.
    pub file_hash: Option<String>,
    /// Combined extracted text across all content kinds.
    pub extracted_text: String,
}

/// Tiered duplicate detector.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    length_tolerance: f64,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LENGTH_TOLERANCE)
    }
}

impl DuplicateDetector {
    pub fn new(length_tolerance: f64) -> Self {
        Self { length_tolerance }
    }

    /// Decide what to do with an incoming document.
    ///
    /// With `force`, all tiers are skipped and a unique location is
    /// synthesized (timestamp + random suffix) so the uniqueness
    /// constraint cannot be violated.
    pub async fn detect<S: Store>(
        &self,
        store: &S,
        incoming: &IncomingDocument,
        force: bool,
    ) -> Result<DuplicateDecision> {
        if incoming.location.trim().is_empty() {
            return Err(EngineError::Validation("document location is empty".into()));
        }

        if force {
            let location = disambiguated_location(&incoming.location);
            debug!(original = %incoming.location, forced = %location, "forced document creation");
            return Ok(DuplicateDecision::Forced { location });
        }

        // Tier 1: exact location.
        if let Some(doc) = store.find_document_by_location(&incoming.location).await? {
            return Ok(DuplicateDecision::Existing {
                id: doc.id,
                tier: MatchTier::Location,
            });
        }

        // Tier 2: raw byte hash.
        if let Some(ref hash) = incoming.file_hash {
            if let Some(doc) = store.find_document_by_file_hash(hash).await? {
                return Ok(DuplicateDecision::Existing {
                    id: doc.id,
                    tier: MatchTier::FileHash,
                });
            }
        }

        // Tier 3: normalized content hash.
        let content_hash = normalized_content_hash(&incoming.extracted_text);
        if let Some(doc) = store.find_document_by_content_hash(&content_hash).await? {
            return Ok(DuplicateDecision::Existing {
                id: doc.id,
                tier: MatchTier::ContentHash,
            });
        }

        // Tier 4: similarity heuristic. Length-within-tolerance is known
        // to be weak (same-length different-content collides); preserved
        // as documented pending a stricter comparison.
        let basename = location_basename(&incoming.location);
        let incoming_len = incoming.extracted_text.chars().count();
        let candidates = store
            .find_documents_by_basename(basename, incoming.document_type)
            .await?;
        for cand in candidates {
            if let Some(ref title) = incoming.title {
                if cand.title.as_deref() != Some(title.as_str()) {
                    continue;
                }
            }
            let longer = incoming_len.max(cand.content_length) as f64;
            let diff = incoming_len.abs_diff(cand.content_length) as f64;
            if longer == 0.0 || diff <= self.length_tolerance * longer {
                return Ok(DuplicateDecision::Existing {
                    id: cand.id,
                    tier: MatchTier::Similarity,
                });
            }
        }

        Ok(DuplicateDecision::New)
    }
}

/// SHA-256 of text normalized for comparison: lowercased with collapsed
/// whitespace.
pub fn normalized_content_hash(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of raw bytes, for the file-hash tier.
pub fn file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Final path segment of a location.
pub fn location_basename(location: &str) -> &str {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(location)
}

/// Synthesize a unique location for forced creation.
fn disambiguated_location(location: &str) -> String {
    let ts = chrono::Utc::now().timestamp();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{location}#{ts}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Content, Document, DocumentMetadata, DocumentStatus, FileMetadata};
    use crate::store::memory::MemoryStore;

    fn doc(id: &str, location: &str, title: Option<&str>) -> Document {
        Document {
            id: id.to_string(),
            location: location.to_string(),
            title: title.map(String::from),
            document_type: DocumentType::Pdf,
            status: DocumentStatus::Processed,
            file_modified_at: None,
            metadata: DocumentMetadata::default(),
            file: FileMetadata::default(),
            content_hash: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn incoming(location: &str, text: &str) -> IncomingDocument {
        IncomingDocument {
            location: location.to_string(),
            title: None,
            document_type: DocumentType::Pdf,
            file_hash: None,
            extracted_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_location_rejected() {
        let store = MemoryStore::new(4);
        let detector = DuplicateDetector::default();
        let result = detector.detect(&store, &incoming("  ", "text"), false).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_location_tier_wins() {
        let store = MemoryStore::new(4);
        store.insert_document(&doc("d1", "/a.pdf", None)).await.unwrap();

        let detector = DuplicateDetector::default();
        let decision = detector
            .detect(&store, &incoming("/a.pdf", "anything"), false)
            .await
            .unwrap();
        assert_eq!(
            decision,
            DuplicateDecision::Existing {
                id: "d1".into(),
                tier: MatchTier::Location,
            }
        );
    }

    #[tokio::test]
    async fn test_file_hash_tier() {
        let store = MemoryStore::new(4);
        let mut existing = doc("d1", "/a.pdf", None);
        existing.file.hash = Some("h1".into());
        store.insert_document(&existing).await.unwrap();

        let mut inc = incoming("/b.pdf", "other text");
        inc.file_hash = Some("h1".into());
        let decision = DuplicateDetector::default()
            .detect(&store, &inc, false)
            .await
            .unwrap();
        assert_eq!(
            decision,
            DuplicateDecision::Existing {
                id: "d1".into(),
                tier: MatchTier::FileHash,
            }
        );
    }

    #[tokio::test]
    async fn test_content_hash_tier_across_locations() {
        // Same content hash under a different location still matches.
        let store = MemoryStore::new(4);
        let mut existing = doc("d1", "/a.pdf", None);
        existing.content_hash = Some(normalized_content_hash("Shared   Body\ntext"));
        store.insert_document(&existing).await.unwrap();

        let decision = DuplicateDetector::default()
            .detect(&store, &incoming("/b.pdf", "shared body TEXT"), false)
            .await
            .unwrap();
        assert_eq!(
            decision,
            DuplicateDecision::Existing {
                id: "d1".into(),
                tier: MatchTier::ContentHash,
            }
        );
    }

    #[tokio::test]
    async fn test_similarity_tier_respects_tolerance() {
        let store = MemoryStore::new(4);
        store
            .insert_document(&doc("d1", "/docs/report.pdf", Some("Report")))
            .await
            .unwrap();
        store
            .insert_content(&Content {
                id: "c1".into(),
                document_id: "d1".into(),
                payload: crate::models::ContentPayload::Text {
                    body: "x".repeat(100),
                },
                embedding_model: "m".into(),
                chunk_size: 64,
                chunk_overlap: 8,
            })
            .await
            .unwrap();

        let detector = DuplicateDetector::default();

        let mut close = incoming("/other/report.pdf", &"y".repeat(97));
        close.title = Some("Report".into());
        let decision = detector.detect(&store, &close, false).await.unwrap();
        assert!(matches!(
            decision,
            DuplicateDecision::Existing {
                tier: MatchTier::Similarity,
                ..
            }
        ));

        let mut far = incoming("/other/report.pdf", &"y".repeat(50));
        far.title = Some("Report".into());
        let decision = detector.detect(&store, &far, false).await.unwrap();
        assert_eq!(decision, DuplicateDecision::New);
    }

    #[tokio::test]
    async fn test_force_skips_all_tiers() {
        let store = MemoryStore::new(4);
        store.insert_document(&doc("d1", "/a.pdf", None)).await.unwrap();

        let decision = DuplicateDetector::default()
            .detect(&store, &incoming("/a.pdf", "same"), true)
            .await
            .unwrap();
        match decision {
            DuplicateDecision::Forced { location } => {
                assert!(location.starts_with("/a.pdf#"));
                assert_ne!(location, "/a.pdf");
            }
            other => panic!("expected forced, got {other:?}"),
        }
    }

    #[test]
    fn test_basename() {
        assert_eq!(location_basename("/docs/a.pdf"), "a.pdf");
        assert_eq!(location_basename("a.pdf"), "a.pdf");
        assert_eq!(location_basename("/docs/sub/"), "sub");
    }

    #[test]
    fn test_normalized_hash_ignores_case_and_spacing() {
        assert_eq!(
            normalized_content_hash("Hello   World"),
            normalized_content_hash("hello\nworld")
        );
        assert_ne!(
            normalized_content_hash("hello world"),
            normalized_content_hash("hello worlds")
        );
    }
}
