//! Incremental indexing engine.
//!
//! Turns a source URI into a stored chunk set, re-embedding only when the
//! content changed. Each call resolves to exactly one of four states:
//!
//! ```text
//! no stored chunks               -> New             insert
//! stored, same fingerprint       -> Unchanged       no write
//! stored, different fingerprint  -> Changed         replace
//! force_reindex                  -> ForceReindexed  replace
//! ```
//!
//! A replacement deletes and inserts inside one store transaction, so a
//! failed reindex leaves the previous chunk set in place and readers never
//! see a document with zero chunks.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Extractor.fingerprint → compare → Extractor.fetch → Extractor.extract_text
//!     → Chunker → EmbeddingProvider → ChunkStore.replace_document
//! ```

use crate::config::EngineConfig;
use crate::error::{ErrorKind, Result, RetrieverError};
use crate::hashing::{document_identity, fingerprint_bytes};
use crate::retrieval::collaborators::{Chunker, Extractor, FileExtractor, FixedSizeChunker};
use crate::storage::{ChunkStore, DocumentSummary, IndexStats, NewChunk};
use docsift_embed::EmbeddingProvider;
use futures::{StreamExt, future, stream};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Metadata key holding the content fingerprint.
pub const FILE_HASH_KEY: &str = "file_hash";

/// Outcome category of one indexing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Success,
    Skipped,
    Error,
}

/// Why an existing chunk set was (or was not) rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentChange {
    New,
    Unchanged,
    Changed,
    ForceReindexed,
}

/// Result of indexing one document. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexResult {
    pub source_uri: String,
    pub document_id: String,
    pub status: IndexStatus,
    /// Set when skipped; currently always `unchanged`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<DocumentChange>,
    pub chunks: usize,
    pub message: String,
    pub retryable: bool,
}

impl IndexResult {
    fn success(source_uri: &str, document_id: &str, change: DocumentChange, chunks: usize) -> Self {
        Self {
            source_uri: source_uri.to_string(),
            document_id: document_id.to_string(),
            status: IndexStatus::Success,
            reason: None,
            error_type: None,
            change: Some(change),
            chunks,
            message: format!("Indexed {chunks} chunks"),
            retryable: false,
        }
    }

    fn unchanged(source_uri: &str, document_id: &str, chunks: usize) -> Self {
        Self {
            source_uri: source_uri.to_string(),
            document_id: document_id.to_string(),
            status: IndexStatus::Skipped,
            reason: Some("unchanged".to_string()),
            error_type: None,
            change: Some(DocumentChange::Unchanged),
            chunks,
            message: "Content unchanged since last index".to_string(),
            retryable: false,
        }
    }

    fn failure(source_uri: &str, document_id: &str, error: &RetrieverError) -> Self {
        let kind = error.kind();
        Self {
            source_uri: source_uri.to_string(),
            document_id: document_id.to_string(),
            status: IndexStatus::Error,
            reason: None,
            error_type: Some(kind),
            change: None,
            chunks: 0,
            message: error.to_string(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IndexStatus::Success
    }
}

/// Totals for one batch run, with per-document results in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// True when the cancel flag stopped the batch before every document started
    pub cancelled: bool,
    pub results: Vec<IndexResult>,
}

impl BatchSummary {
    fn from_results(total: usize, results: Vec<IndexResult>) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            total,
            succeeded: count(IndexStatus::Success),
            skipped: count(IndexStatus::Skipped),
            failed: count(IndexStatus::Error),
            cancelled: results.len() < total,
            results,
        }
    }
}

/// Indexes documents into a [`ChunkStore`].
pub struct IndexingEngine {
    config: EngineConfig,
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn Extractor>,
    chunker: Arc<dyn Chunker>,
}

impl std::fmt::Debug for IndexingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingEngine")
            .field("config", &self.config)
            .field("embedder", &self.embedder.provider_name())
            .finish_non_exhaustive()
    }
}

impl IndexingEngine {
    /// Engine reading local files, chunked per `config`.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let chunker = FixedSizeChunker::new(config.chunk_size, config.chunk_overlap);
        Self {
            config,
            store,
            embedder,
            extractor: Arc::new(FileExtractor::new()),
            chunker: Arc::new(chunker),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Index one document, reporting the outcome rather than failing.
    pub async fn index_document(
        &self,
        source_uri: &str,
        force_reindex: bool,
        custom_metadata: &Map<String, Value>,
    ) -> IndexResult {
        let document_id = document_identity(source_uri);
        let started = Instant::now();

        match self
            .try_index(source_uri, &document_id, force_reindex, custom_metadata)
            .await
        {
            Ok(result) => {
                debug!(
                    "{} {} ({:?}, {} chunks) in {:?}",
                    source_uri,
                    match result.status {
                        IndexStatus::Skipped => "skipped",
                        _ => "indexed",
                    },
                    result.change,
                    result.chunks,
                    started.elapsed()
                );
                result
            }
            Err(e) => {
                warn!("Failed to index {}: {} ({})", source_uri, e, e.kind());
                IndexResult::failure(source_uri, &document_id, &e)
            }
        }
    }

    async fn try_index(
        &self,
        source_uri: &str,
        document_id: &str,
        force_reindex: bool,
        custom_metadata: &Map<String, Value>,
    ) -> Result<IndexResult> {
        let existing = self.store.document_state(document_id).await?;

        let change = match &existing {
            None => DocumentChange::New,
            Some(_) if force_reindex => DocumentChange::ForceReindexed,
            Some(stored) => {
                let current = self.extractor.fingerprint(source_uri).await?;
                if stored.file_hash() == Some(current.as_str()) {
                    return Ok(IndexResult::unchanged(
                        source_uri,
                        document_id,
                        stored.chunk_count,
                    ));
                }
                DocumentChange::Changed
            }
        };

        // the stored hash must describe the bytes actually embedded
        let bytes = self.extractor.fetch(source_uri).await?;
        let fingerprint = fingerprint_bytes(&bytes);

        let text = self.extractor.extract_text(source_uri, &bytes).await?;
        let pieces = self.chunker.chunk(&text);
        if pieces.is_empty() {
            return Err(RetrieverError::processing(format!(
                "{source_uri} produced no chunks"
            )));
        }

        let embedded = self.embedder.embed_texts(&pieces).await?;
        if embedded.len() != pieces.len() {
            return Err(RetrieverError::processing(format!(
                "Embedding provider returned {} vectors for {} chunks",
                embedded.len(),
                pieces.len()
            )));
        }

        let metadata = chunk_metadata(source_uri, &fingerprint, pieces.len(), custom_metadata);
        let chunks: Vec<NewChunk> = pieces
            .into_iter()
            .zip(embedded.embeddings)
            .enumerate()
            .map(|(chunk_index, (text_content, embedding))| NewChunk {
                chunk_index,
                text_content,
                source_uri: source_uri.to_string(),
                embedding,
                metadata: metadata.clone(),
            })
            .collect();

        let written = self.store.replace_document(document_id, chunks).await?;
        Ok(IndexResult::success(source_uri, document_id, change, written))
    }

    /// Index many documents with at most `max_workers` in flight.
    ///
    /// `cancel` is checked before each document starts; documents already
    /// running finish normally. Results keep input order.
    pub async fn index_batch(
        &self,
        source_uris: Vec<String>,
        force_reindex: bool,
        custom_metadata: &Map<String, Value>,
        cancel: &AtomicBool,
    ) -> BatchSummary {
        let total = source_uris.len();
        let started = Instant::now();
        info!(
            "Indexing {} documents with {} workers",
            total, self.config.max_workers
        );

        let results: Vec<IndexResult> = stream::iter(source_uris)
            .take_while(|_| future::ready(!cancel.load(Ordering::SeqCst)))
            .map(move |uri| async move {
                self.index_document(&uri, force_reindex, custom_metadata)
                    .await
            })
            .buffered(self.config.max_workers.max(1))
            .collect()
            .await;

        let summary = BatchSummary::from_results(total, results);
        info!(
            "Batch finished in {:?}: {} indexed, {} unchanged, {} failed{}",
            started.elapsed(),
            summary.succeeded,
            summary.skipped,
            summary.failed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        summary
    }

    /// Remove one document's chunk set; returns the chunks deleted.
    pub async fn remove_document(&self, source_uri: &str) -> Result<usize> {
        let document_id = document_identity(source_uri);
        let removed = self.store.delete_document(&document_id).await?;
        debug!("Removed {} chunks of {}", removed, source_uri);
        Ok(removed)
    }

    pub async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentSummary>> {
        self.store.list_documents(limit, offset).await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.store.stats().await
    }
}

/// Metadata stamped on every chunk of a document.
///
/// Custom entries override the engine's own, except the fingerprint.
pub fn chunk_metadata(
    source_uri: &str,
    fingerprint: &str,
    chunk_count: usize,
    custom: &Map<String, Value>,
) -> Map<String, Value> {
    let path = Path::new(source_uri.trim());
    let mut metadata = Map::new();

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        metadata.insert("type".to_string(), Value::from(ext.to_lowercase()));
    }
    metadata.insert("file_path".to_string(), Value::from(source_uri));
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        metadata.insert("file_name".to_string(), Value::from(name));
    }
    metadata.insert("chunk_count".to_string(), Value::from(chunk_count));

    for (key, value) in custom {
        metadata.insert(key.clone(), value.clone());
    }
    metadata.insert(FILE_HASH_KEY.to_string(), Value::from(fingerprint));
    metadata
}
