//! Storage abstraction for docsift.
//!
//! A *chunk* is the persisted unit: one overlapping slice of a document's
//! text plus its embedding and metadata. A *document* is never stored on its
//! own; it is the group of chunks sharing a `document_id`.
//!
//! ## Key Components
//!
//! - **ChunkStore**: every operation the engine needs from a backend
//! - **SqliteStore**: the sqlx/SQLite implementation
//! - **Data Types**: [`NewChunk`], [`DocumentChunk`], [`DocumentSummary`] and friends
//!
//! ```text
//! IndexingEngine ──┐
//! SearchService  ──┼── ChunkStore ── SqliteStore
//! BulkMutation   ──┘
//! ```

use crate::error::Result;
use crate::retrieval::filter::FilterExpr;
use crate::retrieval::query_planner::LexicalQuery;
use crate::retrieval::scoring::DistanceMetric;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod sqlite_store;

/// Surrogate row id assigned by the store.
pub type ChunkId = i64;

/// A chunk ready to be written for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub chunk_index: usize,
    pub text_content: String,
    pub source_uri: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// A persisted chunk row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub document_id: String,
    pub chunk_index: usize,
    pub text_content: String,
    pub source_uri: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub indexed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the store currently holds for one document id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub document_id: String,
    pub chunk_count: usize,
    /// Metadata of the lowest-index chunk
    pub metadata: Map<String, Value>,
}

impl StoredDocument {
    /// The content fingerprint recorded at the last successful index.
    pub fn file_hash(&self) -> Option<&str> {
        self.metadata.get("file_hash").and_then(Value::as_str)
    }
}

/// One document aggregated from its chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub source_uri: String,
    pub chunk_count: usize,
    /// Metadata of one representative chunk
    pub metadata: Map<String, Value>,
    pub indexed_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// A chunk in self-contained textual form, as produced by export and
/// consumed by restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullChunkRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub text_content: String,
    pub source_uri: String,
    /// Vector as text, e.g. `[0.1,0.2]`
    pub embedding: String,
    pub metadata: Map<String, Value>,
    /// ISO-8601
    pub indexed_at: String,
    /// ISO-8601
    pub updated_at: String,
}

impl From<DocumentChunk> for FullChunkRecord {
    fn from(chunk: DocumentChunk) -> Self {
        Self {
            document_id: chunk.document_id,
            chunk_index: chunk.chunk_index,
            text_content: chunk.text_content,
            source_uri: chunk.source_uri,
            embedding: embedding_to_text(&chunk.embedding),
            metadata: chunk.metadata,
            indexed_at: chunk.indexed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            updated_at: chunk.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// Serialize a vector as `[v0,v1,...]`.
pub fn embedding_to_text(embedding: &[f32]) -> String {
    format!("[{}]", embedding.iter().join(","))
}

/// Parse the `[v0,v1,...]` form written by [`embedding_to_text`].
pub fn embedding_from_text(text: &str) -> Option<Vec<f32>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|v| v.trim().parse::<f32>().ok())
        .collect()
}

/// Aggregate figures for the whole index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub documents_count: usize,
    pub chunks_count: usize,
    pub embedding_dimension: Option<usize>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Operations the engine requires from a chunk store.
///
/// Every `filters` argument is a list of compiled predicates that must all
/// hold; an empty list matches every chunk.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Chunk count and first-chunk metadata for `document_id`, if indexed.
    async fn document_state(&self, document_id: &str) -> Result<Option<StoredDocument>>;

    /// Atomically replace every chunk of `document_id` with `chunks`.
    /// Returns the number of chunks written.
    async fn replace_document(&self, document_id: &str, chunks: Vec<NewChunk>) -> Result<usize>;

    /// Delete every chunk of `document_id`, returning the count removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Up to `limit` chunks nearest to `query`, ordered by increasing distance.
    async fn vector_candidates(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        filters: &[FilterExpr],
        limit: usize,
    ) -> Result<Vec<(DocumentChunk, f32)>>;

    /// Full-text relevance of the given chunks that match `query`, best first.
    /// Larger scores are better.
    async fn lexical_scores(
        &self,
        candidates: &[ChunkId],
        query: &LexicalQuery,
    ) -> Result<Vec<(ChunkId, f64)>>;

    /// Number of distinct documents with at least one matching chunk.
    async fn count_documents(&self, filters: &[FilterExpr]) -> Result<usize>;

    /// Up to `limit` matching documents, most recently updated first.
    async fn sample_documents(
        &self,
        filters: &[FilterExpr],
        limit: usize,
    ) -> Result<Vec<DocumentSummary>>;

    /// Every matching chunk, ordered by document then chunk index.
    async fn export_chunks(&self, filters: &[FilterExpr]) -> Result<Vec<DocumentChunk>>;

    /// Delete every matching chunk in one statement.
    /// Returns `(chunks_deleted, distinct_documents_deleted)`.
    async fn delete_matching(&self, filters: &[FilterExpr]) -> Result<(usize, usize)>;

    /// Insert records, skipping any whose `(document_id, chunk_index)` exists.
    /// Returns the number actually inserted.
    async fn restore_chunks(&self, records: Vec<DocumentChunk>) -> Result<usize>;

    /// Page through all documents ordered by source URI.
    async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentSummary>>;

    async fn stats(&self) -> Result<IndexStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_form() {
        let text = embedding_to_text(&[0.5, -1.25, 3.0]);
        assert_eq!(text, "[0.5,-1.25,3]");
        assert_eq!(embedding_from_text(&text), Some(vec![0.5, -1.25, 3.0]));
        assert_eq!(embedding_from_text(" [ 1 , 2 ] "), Some(vec![1.0, 2.0]));
        assert_eq!(embedding_from_text("[]"), Some(vec![]));
        assert_eq!(embedding_from_text("1,2"), None);
        assert_eq!(embedding_from_text("[1,x]"), None);
    }

    #[test]
    fn test_stored_document_file_hash() {
        let mut metadata = Map::new();
        metadata.insert("file_hash".to_string(), Value::from("00ff"));
        let stored = StoredDocument {
            document_id: "d".to_string(),
            chunk_count: 1,
            metadata,
        };
        assert_eq!(stored.file_hash(), Some("00ff"));
    }
}
