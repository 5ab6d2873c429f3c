//! # Corpora Core
//!
//! Runtime-agnostic logic for Corpora: data models, content chunking,
//! duplicate detection, the store abstraction, ranking, semantic and
//! hybrid search, and search tracking.
//!
//! This crate performs no I/O of its own. Persistence lives behind the
//! [`store::Store`] trait; the bundled [`store::memory::MemoryStore`]
//! backs the unit tests and any embedded use.

pub mod cancel;
pub mod chunk;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod hybrid;
pub mod keywords;
pub mod models;
pub mod rank;
pub mod search;
pub mod store;
pub mod tracker;
