//! Filter-driven bulk administration: preview, export, delete and restore.
//!
//! All four operations compile the same filter map with
//! [`compile_filters`], so a preview reports exactly the documents a delete
//! with the same filters would remove (absent concurrent writers).

use crate::error::{Result, RetrieverError};
use crate::retrieval::filter::compile_filters;
use crate::storage::sqlite_store::parse_timestamp;
use crate::storage::{ChunkStore, DocumentChunk, DocumentSummary, FullChunkRecord, embedding_from_text};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// What a mutation with the given filters would touch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewResult {
    pub document_count: usize,
    /// At most `preview_sample_size` documents, most recently updated first
    pub sample: Vec<DocumentSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub chunks_deleted: usize,
    pub documents_deleted: usize,
}

pub struct BulkMutationCoordinator {
    store: Arc<dyn ChunkStore>,
    preview_sample_size: usize,
}

impl BulkMutationCoordinator {
    pub fn new(store: Arc<dyn ChunkStore>, preview_sample_size: usize) -> Self {
        Self {
            store,
            preview_sample_size,
        }
    }

    /// Count and sample matching documents without changing anything.
    pub async fn preview(&self, filters: &Map<String, Value>) -> Result<PreviewResult> {
        let compiled = compile_filters(filters)?;
        let document_count = self.store.count_documents(&compiled).await?;
        let sample = self
            .store
            .sample_documents(&compiled, self.preview_sample_size)
            .await?;
        Ok(PreviewResult {
            document_count,
            sample,
        })
    }

    /// Every matching chunk in self-contained textual form.
    pub async fn export(&self, filters: &Map<String, Value>) -> Result<Vec<FullChunkRecord>> {
        let compiled = compile_filters(filters)?;
        let chunks = self.store.export_chunks(&compiled).await?;
        info!("Exported {} chunks", chunks.len());
        Ok(chunks.into_iter().map(FullChunkRecord::from).collect())
    }

    /// Delete every matching chunk in one statement.
    ///
    /// An empty filter map is refused before anything reaches the store.
    pub async fn delete(&self, filters: &Map<String, Value>) -> Result<DeleteOutcome> {
        if filters.is_empty() {
            warn!("Refused delete without filters");
            return Err(RetrieverError::validation(
                "Delete requires at least one filter",
            ));
        }
        let compiled = compile_filters(filters)?;
        let (chunks_deleted, documents_deleted) = self.store.delete_matching(&compiled).await?;
        info!(
            "Deleted {} chunks across {} documents",
            chunks_deleted, documents_deleted
        );
        Ok(DeleteOutcome {
            chunks_deleted,
            documents_deleted,
        })
    }

    /// Re-insert exported records, skipping rows that already exist.
    ///
    /// Every record is validated first; one malformed record aborts the
    /// restore with nothing written.
    pub async fn restore(&self, records: Vec<FullChunkRecord>) -> Result<usize> {
        let chunks = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                record_to_chunk(record)
                    .map_err(|e| RetrieverError::validation(format!("Record {i}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let offered = chunks.len();
        let restored = self.store.restore_chunks(chunks).await?;
        info!(
            "Restored {} of {} chunks ({} already present)",
            restored,
            offered,
            offered - restored
        );
        Ok(restored)
    }
}

fn record_to_chunk(record: FullChunkRecord) -> Result<DocumentChunk> {
    if record.document_id.trim().is_empty() {
        return Err(RetrieverError::validation("document_id is empty"));
    }
    let embedding = embedding_from_text(&record.embedding).ok_or_else(|| {
        RetrieverError::validation(format!("unparseable embedding '{}'", record.embedding))
    })?;
    Ok(DocumentChunk {
        // assigned by the store on insert
        id: 0,
        document_id: record.document_id,
        chunk_index: record.chunk_index,
        text_content: record.text_content,
        source_uri: record.source_uri,
        embedding,
        metadata: record.metadata,
        indexed_at: parse_timestamp(&record.indexed_at)?,
        updated_at: parse_timestamp(&record.updated_at)?,
    })
}

/// Parse an export file (a JSON array of records).
pub fn parse_export(raw: &str) -> Result<Vec<FullChunkRecord>> {
    serde_json::from_str(raw)
        .map_err(|e| RetrieverError::validation(format!("Malformed export file: {e}")))
}
