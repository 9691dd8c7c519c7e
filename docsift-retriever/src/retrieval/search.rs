//! Semantic and hybrid search over a [`ChunkStore`].

use crate::config::EngineConfig;
use crate::error::{Result, RetrieverError};
use crate::retrieval::filter::compile_filters;
use crate::retrieval::query_planner::{HybridQueryPlanner, dense_ranks};
use crate::retrieval::scoring::{DistanceMetric, relevance_score};
use crate::storage::{ChunkId, ChunkStore, DocumentChunk};
use docsift_embed::EmbeddingProvider;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub chunk_index: usize,
    pub source_uri: String,
    pub text_content: String,
    pub metadata: Map<String, Value>,
    /// Raw metric distance to the query vector
    pub distance: f64,
    /// Distance normalized onto `[0, 1]`
    pub relevance_score: f64,
    /// Fused rank score; hybrid search only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_score: Option<f64>,
}

impl SearchResult {
    fn from_chunk(
        chunk: DocumentChunk,
        distance: f32,
        metric: DistanceMetric,
        combined_score: Option<f64>,
    ) -> Self {
        let distance = f64::from(distance);
        Self {
            document_id: chunk.document_id,
            chunk_index: chunk.chunk_index,
            source_uri: chunk.source_uri,
            text_content: chunk.text_content,
            metadata: chunk.metadata,
            distance,
            relevance_score: relevance_score(distance, metric),
            combined_score,
        }
    }
}

/// Read-only query side of the engine.
pub struct SearchService {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    metric: DistanceMetric,
    planner: HybridQueryPlanner,
    candidate_multiplier: usize,
}

impl SearchService {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            embedder,
            metric: config.distance_metric,
            planner: HybridQueryPlanner::new(config.hybrid_alpha),
            candidate_multiplier: config.candidate_multiplier.max(1),
        }
    }

    pub fn planner(&self) -> &HybridQueryPlanner {
        &self.planner
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RetrieverError::validation("Search query is empty"));
        }
        Ok(self.embedder.embed_text(text).await?)
    }

    /// Nearest chunks by embedding distance.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        filters: &Map<String, Value>,
    ) -> Result<Vec<SearchResult>> {
        let compiled = compile_filters(filters)?;
        let vector = self.embed_query(query).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .store
            .vector_candidates(&vector, self.metric, &compiled, limit)
            .await?;
        debug!("Semantic search returned {} chunks", candidates.len());

        Ok(candidates
            .into_iter()
            .map(|(chunk, distance)| SearchResult::from_chunk(chunk, distance, self.metric, None))
            .collect())
    }

    /// Vector neighbours re-ranked with full-text matches.
    ///
    /// The candidate pool is the `limit * candidate_multiplier` nearest
    /// chunks; candidates matching the lexical expression always come first.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        filters: &Map<String, Value>,
    ) -> Result<Vec<SearchResult>> {
        let compiled = compile_filters(filters)?;
        let plan = self.planner.plan(query);
        let vector = self.embed_query(&plan.embedding_text).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let pool_size = limit.saturating_mul(self.candidate_multiplier);
        let candidates = self
            .store
            .vector_candidates(&vector, self.metric, &compiled, pool_size)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let distances: Vec<f32> = candidates.iter().map(|(_, d)| *d).collect();
        let vector_ranks = dense_ranks(&distances);

        let mut lexical_ranks = HashMap::new();
        if let Some(lexical) = &plan.lexical {
            let ids: Vec<ChunkId> = candidates.iter().map(|(c, _)| c.id).collect();
            let mut scored = self.store.lexical_scores(&ids, lexical).await?;
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));

            let positions: HashMap<ChunkId, usize> =
                ids.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
            let scores: Vec<f64> = scored.iter().map(|(_, s)| *s).collect();
            for ((id, _), rank) in scored.iter().zip(dense_ranks(&scores)) {
                if let Some(&position) = positions.get(id) {
                    lexical_ranks.insert(position, rank);
                }
            }
        }
        debug!(
            "Hybrid search over {} candidates, {} lexical matches",
            candidates.len(),
            lexical_ranks.len()
        );

        let fused = self.planner.fuse(&vector_ranks, &lexical_ranks);
        let mut slots: Vec<Option<(DocumentChunk, f32)>> =
            candidates.into_iter().map(Some).collect();

        Ok(fused
            .into_iter()
            .take(limit)
            .filter_map(|candidate| {
                slots[candidate.position].take().map(|(chunk, distance)| {
                    SearchResult::from_chunk(chunk, distance, self.metric, Some(candidate.combined))
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::retrieval::query_planner::EXACT_MATCH_BOOST;
    use crate::storage::NewChunk;
    use crate::storage::sqlite_store::SqliteStore;
    use docsift_embed::{EmbedConfig, HashEmbedProvider};
    use serde_json::json;

    fn provider() -> HashEmbedProvider {
        HashEmbedProvider::new(EmbedConfig::hash(64))
    }

    fn chunk(text: &str, embedding: Vec<f32>, kind: &str) -> NewChunk {
        let mut metadata = Map::new();
        metadata.insert("type".to_string(), json!(kind));
        NewChunk {
            chunk_index: 0,
            text_content: text.to_string(),
            source_uri: format!("/docs/{}.{kind}", text.len()),
            embedding,
            metadata,
        }
    }

    /// Document "near" embeds like the query but shares no words with it;
    /// document "far" contains the query words but embeds elsewhere.
    async fn service() -> SearchService {
        let embed = provider();
        let store = Arc::new(SqliteStore::open_memory().await.unwrap());
        store
            .replace_document(
                "near",
                vec![chunk("pumpkin lantern carving", embed.embed_sync("solar inverter"), "txt")],
            )
            .await
            .unwrap();
        store
            .replace_document(
                "far",
                vec![chunk(
                    "manual for the solar inverter",
                    embed.embed_sync("zebra quilt marmalade"),
                    "md",
                )],
            )
            .await
            .unwrap();

        SearchService::new(&EngineConfig::in_memory(), store, Arc::new(embed))
    }

    #[tokio::test]
    async fn test_semantic_search_orders_by_distance() {
        let search = service().await;
        let results = search
            .semantic_search("solar inverter", 5, &Map::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "near");
        assert!(results[0].relevance_score > 0.99);
        assert!(results[0].relevance_score >= results[1].relevance_score);
        assert!(results.iter().all(|r| r.combined_score.is_none()));
    }

    #[tokio::test]
    async fn test_hybrid_lexical_match_outranks_nearer_vector() {
        let search = service().await;
        let results = search
            .hybrid_search("\"solar inverter\"", 5, &Map::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "far");
        assert!(results[0].combined_score.unwrap() > EXACT_MATCH_BOOST);
        assert_eq!(results[1].document_id, "near");
        assert!(results[1].combined_score.unwrap() < 1.0);
    }

    #[tokio::test]
    async fn test_hybrid_without_lexical_matches_follows_vector_order() {
        let search = service().await;
        let results = search
            .hybrid_search("solar inverter warranty", 5, &Map::new())
            .await
            .unwrap();
        // bag-of-words needs every term, so nothing matches lexically
        assert_eq!(results[0].document_id, "near");
        assert!(results.iter().all(|r| r.combined_score.unwrap() < 1.0));
    }

    #[tokio::test]
    async fn test_filters_and_limits() {
        let search = service().await;
        let filters = match json!({"type": "md"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let results = search
            .semantic_search("solar inverter", 5, &filters)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "far");

        let results = search
            .hybrid_search("solar", 1, &Map::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(search.semantic_search("solar", 0, &Map::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let search = service().await;
        let err = search.semantic_search("   ", 5, &Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let bad_filter = match json!({"nope": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let err = search.hybrid_search("solar", 5, &bad_filter).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
