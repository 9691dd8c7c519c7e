//! SQLite implementation of [`ChunkStore`].
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE document_chunks (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     document_id TEXT NOT NULL,
//!     chunk_index INTEGER NOT NULL,
//!     text_content TEXT NOT NULL,
//!     source_uri TEXT NOT NULL,
//!     embedding BLOB NOT NULL,        -- little-endian f32
//!     metadata TEXT NOT NULL,         -- JSON object
//!     indexed_at TEXT NOT NULL,       -- fixed-width ISO-8601 UTC
//!     updated_at TEXT NOT NULL,
//!     UNIQUE(document_id, chunk_index)
//! );
//! -- FTS5 external-content index over text_content, synced by triggers
//! CREATE VIRTUAL TABLE document_chunks_fts USING fts5(...);
//! ```
//!
//! Vector distances are computed in process over the filtered rows. Lexical
//! ranking uses FTS5 `bm25()`. Filter expressions are rendered with
//! [`QueryBuilder`]: variant tags choose fixed SQL fragments and every value
//! goes through `push_bind`.

use super::{
    ChunkId, ChunkStore, DocumentChunk, DocumentSummary, IndexStats, NewChunk, StoredDocument,
};
use crate::config::EngineConfig;
use crate::error::{Result, RetrieverError};
use crate::retrieval::filter::{FilterExpr, FilterValue, PatternTarget};
use crate::retrieval::query_planner::LexicalQuery;
use crate::retrieval::scoring::DistanceMetric;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, text_content, source_uri, embedding, metadata, indexed_at, updated_at";

/// Metadata fields that hold an alternate location for a chunk's source.
const LOCATION_METADATA_PATHS: &[&str] = &["$.file_path", "$.original_path"];

/// Format used for every stored timestamp; fixed width so text order is time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RetrieverError::validation(format!("Invalid timestamp '{raw}': {e}")))
}

/// SQLite-backed chunk store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file in WAL mode.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_secs(5))
                    .create_if_missing(true),
            )
            .await?;
        Self::new_with_pool(pool).await
    }

    /// In-memory database for tests.
    ///
    /// Each SQLite connection to `:memory:` sees its own database, so the
    /// pool holds exactly one connection that never expires.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::new_with_pool(pool).await
    }

    /// Open the database named by `config`, or an in-memory one if none is set.
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        match &config.database_path {
            Some(path) => Self::open(path).await,
            None => Self::open_memory().await,
        }
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text_content TEXT NOT NULL,
                source_uri TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                indexed_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CONSTRAINT unique_document_chunk UNIQUE(document_id, chunk_index)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_document_chunks_source ON document_chunks(source_uri)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS document_chunks_fts USING fts5(
                text_content,
                content='document_chunks',
                content_rowid='id'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS document_chunks_fts_insert
            AFTER INSERT ON document_chunks BEGIN
                INSERT INTO document_chunks_fts(rowid, text_content)
                VALUES (new.id, new.text_content);
            END
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS document_chunks_fts_delete
            AFTER DELETE ON document_chunks BEGIN
                INSERT INTO document_chunks_fts(document_chunks_fts, rowid, text_content)
                VALUES ('delete', old.id, old.text_content);
            END
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS document_chunks_fts_update
            AFTER UPDATE OF text_content ON document_chunks BEGIN
                INSERT INTO document_chunks_fts(document_chunks_fts, rowid, text_content)
                VALUES ('delete', old.id, old.text_content);
                INSERT INTO document_chunks_fts(rowid, text_content)
                VALUES (new.id, new.text_content);
            END
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_summaries(
        &self,
        filters: &[FilterExpr],
        order: SummaryOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentSummary>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"SELECT document_id,
                MIN(source_uri) AS source_uri,
                COUNT(*) AS chunk_count,
                (SELECT c.metadata FROM document_chunks c
                  WHERE c.document_id = document_chunks.document_id
                  ORDER BY c.chunk_index LIMIT 1) AS metadata,
                MIN(indexed_at) AS indexed_at,
                MAX(updated_at) AS last_updated
            FROM document_chunks"#,
        );
        push_where(&mut builder, filters);
        builder.push(" GROUP BY document_id ORDER BY ");
        builder.push(order.as_sql());
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
        builder.push(" OFFSET ");
        builder.push_bind(offset as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(summary_from_row).collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum SummaryOrder {
    RecentlyUpdated,
    SourceUri,
}

impl SummaryOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            SummaryOrder::RecentlyUpdated => "last_updated DESC, document_id",
            SummaryOrder::SourceUri => "source_uri, document_id",
        }
    }
}

/// SQL expression normalizing path separators in `column` the way
/// [`normalize_separators`](crate::retrieval::filter::normalize_separators)
/// does.
///
/// Runs of any length collapse in three fixed passes: every `/` becomes the
/// pair `char(1) char(2)`, the joints `char(2) char(1)` between neighbours
/// are removed, and each surviving pair turns back into one `/`.
fn normalized_location_sql(column: &str) -> String {
    let separators = format!(
        "REPLACE(REPLACE(REPLACE({column}, char(92), '/'), char(9), '/'), char(10), '/')"
    );
    let marked = format!("REPLACE({separators}, '/', char(1) || char(2))");
    let joined = format!("REPLACE({marked}, char(2) || char(1), '')");
    format!("LOWER(REPLACE({joined}, char(1) || char(2), '/'))")
}

fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &FilterValue) {
    match value {
        FilterValue::Text(s) => builder.push_bind(s.clone()),
        FilterValue::Integer(i) => builder.push_bind(*i),
        FilterValue::Real(r) => builder.push_bind(*r),
        // JSON booleans come back from json_extract as 1 / 0
        FilterValue::Bool(b) => builder.push_bind(i64::from(*b)),
    };
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, expr: &FilterExpr) {
    match expr {
        FilterExpr::Equals { column, value } => {
            builder.push(column.as_sql());
            builder.push(" = ");
            push_value(builder, value);
        }
        FilterExpr::MetadataEquals { key, value } => {
            builder.push("json_extract(metadata, '$.' || json_quote(");
            builder.push_bind(key.clone());
            builder.push(")) = ");
            push_value(builder, value);
        }
        FilterExpr::PatternMatch {
            target: PatternTarget::Location,
            pattern,
        } => {
            let mut columns = vec!["source_uri".to_string()];
            columns.extend(
                LOCATION_METADATA_PATHS
                    .iter()
                    .map(|path| format!("json_extract(metadata, '{path}')")),
            );
            builder.push("(");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push(normalized_location_sql(column));
                builder.push(" LIKE LOWER(");
                builder.push_bind(pattern.clone());
                builder.push(")");
            }
            builder.push(")");
        }
    }
}

fn push_where(builder: &mut QueryBuilder<'_, Sqlite>, filters: &[FilterExpr]) {
    builder.push(" WHERE 1 = 1");
    for expr in filters {
        builder.push(" AND ");
        push_filter(builder, expr);
    }
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % std::mem::size_of::<f32>() != 0 {
        return Err(RetrieverError::processing(format!(
            "Stored embedding has {} bytes, not a whole number of f32 values",
            bytes.len()
        )));
    }
    // blobs carry no alignment guarantee, so copy rather than cast in place
    Ok(bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
}

fn decode_metadata(raw: &str) -> Result<Map<String, Value>> {
    Ok(serde_json::from_str(raw)?)
}

fn chunk_from_row(row: &SqliteRow) -> Result<DocumentChunk> {
    let embedding_bytes: Vec<u8> = row.try_get("embedding")?;
    let metadata: String = row.try_get("metadata")?;
    let indexed_at: String = row.try_get("indexed_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;

    Ok(DocumentChunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: chunk_index as usize,
        text_content: row.try_get("text_content")?,
        source_uri: row.try_get("source_uri")?,
        embedding: decode_embedding(&embedding_bytes)?,
        metadata: decode_metadata(&metadata)?,
        indexed_at: parse_timestamp(&indexed_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<DocumentSummary> {
    let chunk_count: i64 = row.try_get("chunk_count")?;
    let metadata: String = row.try_get("metadata")?;
    let indexed_at: String = row.try_get("indexed_at")?;
    let last_updated: String = row.try_get("last_updated")?;

    Ok(DocumentSummary {
        document_id: row.try_get("document_id")?,
        source_uri: row.try_get("source_uri")?,
        chunk_count: chunk_count as usize,
        metadata: decode_metadata(&metadata)?,
        indexed_at: parse_timestamp(&indexed_at)?,
        last_updated: parse_timestamp(&last_updated)?,
    })
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn document_state(&self, document_id: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS chunk_count,
                   (SELECT metadata FROM document_chunks
                     WHERE document_id = ?1 ORDER BY chunk_index LIMIT 1) AS metadata
            FROM document_chunks WHERE document_id = ?1
            "#,
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;

        let chunk_count: i64 = row.try_get("chunk_count")?;
        if chunk_count == 0 {
            return Ok(None);
        }
        let metadata: Option<String> = row.try_get("metadata")?;
        Ok(Some(StoredDocument {
            document_id: document_id.to_string(),
            chunk_count: chunk_count as usize,
            metadata: match metadata {
                Some(raw) => decode_metadata(&raw)?,
                None => Map::new(),
            },
        }))
    }

    async fn replace_document(&self, document_id: &str, chunks: Vec<NewChunk>) -> Result<usize> {
        let now = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        // the first statement writes, so the transaction takes the write lock
        // up front; the original first-index time survives the replacement
        let previous: Vec<String> = sqlx::query_scalar(
            "DELETE FROM document_chunks WHERE document_id = ?1 RETURNING indexed_at",
        )
        .bind(document_id)
        .fetch_all(&mut *tx)
        .await?;
        let removed = previous.len();
        let indexed_at = previous.into_iter().min().unwrap_or_else(|| now.clone());

        let written = chunks.len();
        for chunk in chunks {
            let metadata = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (document_id, chunk_index, text_content, source_uri, embedding, metadata, indexed_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(document_id)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.text_content)
            .bind(&chunk.source_uri)
            .bind(bytemuck::cast_slice::<f32, u8>(&chunk.embedding))
            .bind(metadata)
            .bind(&indexed_at)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Replaced document {}: {} chunks removed, {} written",
            document_id, removed, written
        );
        Ok(written)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn vector_candidates(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        filters: &[FilterExpr],
        limit: usize,
    ) -> Result<Vec<(DocumentChunk, f32)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {CHUNK_COLUMNS} FROM document_chunks"));
        push_where(&mut builder, filters);
        builder.push(" ORDER BY id");
        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = chunk_from_row(row)?;
            let distance = metric.distance(query, &chunk.embedding);
            if distance.is_finite() {
                scored.push((chunk, distance));
            }
        }

        // stable: equal distances keep row-id order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn lexical_scores(
        &self,
        candidates: &[ChunkId],
        query: &LexicalQuery,
    ) -> Result<Vec<(ChunkId, f64)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT rowid AS id, bm25(document_chunks_fts) AS rank \
             FROM document_chunks_fts WHERE document_chunks_fts MATCH ",
        );
        builder.push_bind(query.to_fts5());
        builder.push(" AND rowid IN (");
        let mut ids = builder.separated(", ");
        for id in candidates {
            ids.push_bind(*id);
        }
        builder.push(") ORDER BY rank, rowid");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let rank: f64 = row.try_get("rank")?;
                // bm25() is negative and smaller is better
                Ok((id, -rank))
            })
            .collect()
    }

    async fn count_documents(&self, filters: &[FilterExpr]) -> Result<usize> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(DISTINCT document_id) FROM document_chunks");
        push_where(&mut builder, filters);
        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn sample_documents(
        &self,
        filters: &[FilterExpr],
        limit: usize,
    ) -> Result<Vec<DocumentSummary>> {
        self.fetch_summaries(filters, SummaryOrder::RecentlyUpdated, limit, 0)
            .await
    }

    async fn export_chunks(&self, filters: &[FilterExpr]) -> Result<Vec<DocumentChunk>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {CHUNK_COLUMNS} FROM document_chunks"));
        push_where(&mut builder, filters);
        builder.push(" ORDER BY document_id, chunk_index");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn delete_matching(&self, filters: &[FilterExpr]) -> Result<(usize, usize)> {
        if filters.is_empty() {
            return Err(RetrieverError::validation(
                "Refusing to delete without filters",
            ));
        }

        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM document_chunks");
        push_where(&mut builder, filters);
        builder.push(" RETURNING document_id");
        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut documents = HashSet::new();
        for row in &rows {
            let document_id: String = row.try_get("document_id")?;
            documents.insert(document_id);
        }
        Ok((rows.len(), documents.len()))
    }

    async fn restore_chunks(&self, records: Vec<DocumentChunk>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut restored = 0u64;

        for record in records {
            let metadata = serde_json::to_string(&record.metadata)?;
            restored += sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (document_id, chunk_index, text_content, source_uri, embedding, metadata, indexed_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(document_id, chunk_index) DO NOTHING
                "#,
            )
            .bind(&record.document_id)
            .bind(record.chunk_index as i64)
            .bind(&record.text_content)
            .bind(&record.source_uri)
            .bind(bytemuck::cast_slice::<f32, u8>(&record.embedding))
            .bind(metadata)
            .bind(format_timestamp(&record.indexed_at))
            .bind(format_timestamp(&record.updated_at))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(restored as usize)
    }

    async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentSummary>> {
        self.fetch_summaries(&[], SummaryOrder::SourceUri, limit, offset)
            .await
    }

    async fn stats(&self) -> Result<IndexStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT document_id) AS documents_count,
                   COUNT(*) AS chunks_count,
                   MAX(updated_at) AS last_updated,
                   (SELECT length(embedding) FROM document_chunks LIMIT 1) AS embedding_bytes
            FROM document_chunks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let documents_count: i64 = row.try_get("documents_count")?;
        let chunks_count: i64 = row.try_get("chunks_count")?;
        let last_updated: Option<String> = row.try_get("last_updated")?;
        let embedding_bytes: Option<i64> = row.try_get("embedding_bytes")?;

        Ok(IndexStats {
            documents_count: documents_count as usize,
            chunks_count: chunks_count as usize,
            embedding_dimension: embedding_bytes
                .map(|bytes| bytes as usize / std::mem::size_of::<f32>()),
            last_updated: last_updated.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::filter::compile_filters;
    use crate::retrieval::query_planner::{LexicalQuery, parse_query};
    use serde_json::json;

    fn metadata(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn chunk(index: usize, text: &str, source: &str, embedding: Vec<f32>, meta: Value) -> NewChunk {
        NewChunk {
            chunk_index: index,
            text_content: text.to_string(),
            source_uri: source.to_string(),
            embedding,
            metadata: metadata(meta),
        }
    }

    async fn seeded_store() -> Result<SqliteStore> {
        let store = SqliteStore::open_memory().await?;
        store
            .replace_document(
                "doc-a",
                vec![
                    chunk(0, "solar panel wiring guide", "C:\\Docs\\Solar\\Guide.txt", vec![1.0, 0.0], json!({"type": "txt", "file_hash": "aa"})),
                    chunk(1, "battery bank sizing", "C:\\Docs\\Solar\\Guide.txt", vec![0.9, 0.1], json!({"type": "txt", "file_hash": "aa"})),
                ],
            )
            .await?;
        store
            .replace_document(
                "doc-b",
                vec![chunk(0, "rain water harvesting barrel", "/srv/water/rain.md", vec![0.0, 1.0], json!({"type": "md", "file_hash": "bb", "author": "ann"}))],
            )
            .await?;
        Ok(store)
    }

    #[tokio::test]
    async fn test_document_state_and_replace() -> Result<()> {
        let store = seeded_store().await?;

        let state = store.document_state("doc-a").await?.expect("doc-a indexed");
        assert_eq!(state.chunk_count, 2);
        assert_eq!(state.file_hash(), Some("aa"));
        assert!(store.document_state("missing").await?.is_none());

        let first = store.export_chunks(&compile_filters(&metadata(json!({"document_id": "doc-a"})))?).await?;
        store
            .replace_document(
                "doc-a",
                vec![chunk(0, "rewritten", "C:\\Docs\\Solar\\Guide.txt", vec![1.0, 1.0], json!({"file_hash": "cc"}))],
            )
            .await?;
        let after = store.export_chunks(&compile_filters(&metadata(json!({"document_id": "doc-a"})))?).await?;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].text_content, "rewritten");
        assert_eq!(after[0].indexed_at, first[0].indexed_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_chunk_index_rolls_back() -> Result<()> {
        let store = seeded_store().await?;
        let err = store
            .replace_document(
                "doc-b",
                vec![
                    chunk(0, "one", "/srv/water/rain.md", vec![0.0, 1.0], json!({})),
                    chunk(0, "two", "/srv/water/rain.md", vec![0.0, 1.0], json!({})),
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConstraintViolation);

        // the failed replacement left the old chunk set in place
        let state = store.document_state("doc-b").await?.expect("doc-b intact");
        assert_eq!(state.chunk_count, 1);
        assert_eq!(state.file_hash(), Some("bb"));
        Ok(())
    }

    #[tokio::test]
    async fn test_vector_candidates_order_and_filters() -> Result<()> {
        let store = seeded_store().await?;

        let hits = store
            .vector_candidates(&[1.0, 0.0], DistanceMetric::Cosine, &[], 10)
            .await?;
        let order: Vec<(&str, usize)> = hits
            .iter()
            .map(|(c, _)| (c.document_id.as_str(), c.chunk_index))
            .collect();
        assert_eq!(order, vec![("doc-a", 0), ("doc-a", 1), ("doc-b", 0)]);
        assert!(hits[0].1.abs() < 1e-6);

        let filters = compile_filters(&metadata(json!({"type": "md"})))?;
        let hits = store
            .vector_candidates(&[1.0, 0.0], DistanceMetric::L2, &filters, 10)
            .await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.document_id, "doc-b");
        Ok(())
    }

    #[tokio::test]
    async fn test_pattern_filter_normalizes_separators_and_case() -> Result<()> {
        let store = seeded_store().await?;

        let filters = compile_filters(&metadata(json!({"source_uri_like": "c:/docs//solar/*.TXT"})))?;
        assert_eq!(store.count_documents(&filters).await?, 1);

        let filters = compile_filters(&metadata(json!({"source_uri_like": "water"})))?;
        let docs = store.sample_documents(&filters, 10).await?;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].document_id, "doc-b");
        Ok(())
    }

    #[tokio::test]
    async fn test_pattern_filter_collapses_long_separator_runs() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        let source = format!("/srv{}deep{}file.txt", "/".repeat(40), "\\".repeat(25));
        store
            .replace_document("doc-r", vec![chunk(0, "runs", &source, vec![1.0], json!({}))])
            .await?;

        let filters = compile_filters(&metadata(json!({"source_uri_like": "/srv/deep/file.txt"})))?;
        assert_eq!(store.count_documents(&filters).await?, 1);
        let filters = compile_filters(&metadata(json!({"source_uri_like": "srv//deep"})))?;
        assert_eq!(store.count_documents(&filters).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_pattern_filter_matches_metadata_location() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .replace_document(
                "doc-m",
                vec![chunk(0, "mail body", "mailbox://inbox/42", vec![1.0], json!({"original_path": "D:\\Archive\\Mail\\note.eml"}))],
            )
            .await?;
        let filters = compile_filters(&metadata(json!({"path_like": "archive/mail"})))?;
        assert_eq!(store.count_documents(&filters).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_metadata_filter_values_are_bound() -> Result<()> {
        let store = seeded_store().await?;
        let filters = compile_filters(&metadata(json!({"metadata.author": "ann"})))?;
        assert_eq!(store.count_documents(&filters).await?, 1);

        let hostile = compile_filters(&metadata(json!({"metadata.author": "x' OR '1'='1"})))?;
        assert_eq!(store.count_documents(&hostile).await?, 0);

        let hostile_key = compile_filters(&metadata(json!({"metadata.a') OR 1=1 --": "x"})))?;
        assert_eq!(store.count_documents(&hostile_key).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_lexical_scores_phrase_and_terms() -> Result<()> {
        let store = seeded_store().await?;
        let all_ids: Vec<ChunkId> = store
            .export_chunks(&[])
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let query = LexicalQuery::from_parsed(&parse_query("\"battery bank\"")).expect("query");
        let hits = store.lexical_scores(&all_ids, &query).await?;
        assert_eq!(hits.len(), 1);

        let query = LexicalQuery::from_parsed(&parse_query("\"bank battery\"")).expect("query");
        assert!(store.lexical_scores(&all_ids, &query).await?.is_empty());

        let query = LexicalQuery::from_parsed(&parse_query("rain barrel")).expect("query");
        let hits = store.lexical_scores(&all_ids, &query).await?;
        assert_eq!(hits.len(), 1);

        // candidates outside the given set are ignored
        let hits = store.lexical_scores(&all_ids[..1], &query).await?;
        assert!(hits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_matching_is_filtered_and_counts_documents() -> Result<()> {
        let store = seeded_store().await?;
        assert!(store.delete_matching(&[]).await.is_err());

        let filters = compile_filters(&metadata(json!({"type": "txt"})))?;
        assert_eq!(store.delete_matching(&filters).await?, (2, 1));
        assert_eq!(store.stats().await?.documents_count, 1);

        // deleted rows are gone from the full-text index as well
        let query = LexicalQuery::from_parsed(&parse_query("battery")).expect("query");
        let remaining: Vec<ChunkId> = store.export_chunks(&[]).await?.into_iter().map(|c| c.id).collect();
        assert!(store.lexical_scores(&remaining, &query).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_skips_existing_rows() -> Result<()> {
        let store = seeded_store().await?;
        let backup = store.export_chunks(&[]).await?;

        assert_eq!(store.restore_chunks(backup.clone()).await?, 0);

        store.delete_document("doc-b").await?;
        assert_eq!(store.restore_chunks(backup.clone()).await?, 1);
        assert_eq!(store.restore_chunks(backup).await?, 0);
        assert_eq!(store.stats().await?.chunks_count, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_and_listing() -> Result<()> {
        let store = seeded_store().await?;
        let stats = store.stats().await?;
        assert_eq!(stats.documents_count, 2);
        assert_eq!(stats.chunks_count, 3);
        assert_eq!(stats.embedding_dimension, Some(2));
        assert!(stats.last_updated.is_some());

        let docs = store.list_documents(10, 0).await?;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].document_id, "doc-b");
        assert_eq!(docs[1].chunk_count, 2);
        assert_eq!(store.list_documents(10, 1).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.db");
        {
            let store = SqliteStore::open(&path).await?;
            store
                .replace_document("doc", vec![chunk(0, "kept", "/a.txt", vec![0.5], json!({}))])
                .await?;
            store.pool().close().await;
        }
        let reopened = SqliteStore::open(&path).await?;
        assert_eq!(reopened.stats().await?.chunks_count, 1);
        Ok(())
    }
}
