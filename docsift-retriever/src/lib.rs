//! docsift-retriever: incremental document indexing and hybrid retrieval
//!
//! Documents are split into overlapping chunks, embedded, and stored in
//! SQLite. Reindexing is driven by content fingerprints, so unchanged
//! documents are never re-embedded. Queries combine vector distance with
//! FTS5 full-text matches, and filter-driven bulk operations let an
//! administrator preview, export, delete and restore indexed content.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: indexing engine, filters, query planning, search and bulk mutation
//! - **[`storage`]**: the `ChunkStore` abstraction and its SQLite implementation
//! - **[`hashing`]**: content fingerprints and document identities
//! - **[`config`]** / **[`error`]**: engine settings and the error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsift_retriever::config::EngineConfig;
//! use docsift_retriever::retrieval::indexing_engine::IndexingEngine;
//! use docsift_retriever::retrieval::search::SearchService;
//! use docsift_retriever::storage::sqlite_store::SqliteStore;
//! use serde_json::Map;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::new(".docsift.db".into());
//! let store = Arc::new(SqliteStore::from_config(&config).await?);
//! let embedder = docsift_embed::create_provider(&config.embedding).await?;
//!
//! let engine = IndexingEngine::new(config.clone(), store.clone(), embedder.clone());
//! engine.index_document("notes/garden.md", false, &Map::new()).await;
//!
//! let search = SearchService::new(&config, store, embedder);
//! let hits = search.hybrid_search("\"raised beds\" compost", 10, &Map::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Extractor → Chunker → EmbeddingProvider → ChunkStore (SQLite + FTS5)
//!                                               ↑
//!          SearchService / BulkMutationCoordinator
//! ```

pub mod config;
pub mod error;
pub mod hashing;
pub mod retrieval;
pub mod storage;
