//! # Corpora
//!
//! **A document retrieval engine with semantic, lexical, and hybrid search.**
//!
//! Corpora ingests documents with polymorphic content payloads (text,
//! image descriptions, audio transcripts), deduplicates them through a
//! four-tier detector, chunks and embeds their text, and serves
//! threshold-filtered vector search, FTS5 lexical search, and a
//! score-additive hybrid combination — with usage-aware ranking and
//! search tracking for engagement analytics.
//!
//! ## Data Flow
//!
//! 1. [`engine::Engine::add_document`] runs duplicate detection and
//!    stores the document with its contents.
//! 2. [`engine::Engine::process_document`] chunks each content, embeds
//!    the chunks via the configured provider, and atomically replaces
//!    the owner's embedding set.
//! 3. [`engine::Engine::search`] / [`engine::Engine::hybrid_search`]
//!    retrieve, rank, and optionally record the search for analytics.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`provider`] | Embedding providers: disabled, OpenAI-compatible |
//! | [`engine`] | Ingestion, processing, and search facade |
//!
//! Pure algorithms (chunking, duplicate detection, ranking, search,
//! tracking) live in the `corpora-core` crate.

pub mod config;
pub mod db;
pub mod engine;
pub mod migrate;
pub mod provider;
pub mod sqlite_store;

pub use corpora_core::cancel::CancelToken;
pub use corpora_core::error::{EmbedError, EngineError};
pub use corpora_core::store::Store;
pub use engine::{AddDocument, AddDocumentOutcome, Engine, Followup, SearchOptions};
pub use sqlite_store::SqliteStore;
