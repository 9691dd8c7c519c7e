//! Engine configuration.
//!
//! Settings are plain values passed into constructors; nothing here is
//! global. A configuration can be built in code with the `with_*` methods or
//! loaded from TOML, where every key is optional:
//!
//! ```toml
//! database_path = "/var/lib/docsift/index.db"
//! chunk_size = 1000
//! chunk_overlap = 200
//! hybrid_alpha = 0.5
//! distance_metric = "cosine"
//!
//! [embedding]
//! provider = "fast_embed"
//! model_name = "all-minilm-l6-v2"
//! ```

use crate::error::{Result, RetrieverError};
use crate::retrieval::scoring::DistanceMetric;
use docsift_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration shared by the indexing engine, search and bulk operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file; `None` keeps the index in memory
    pub database_path: Option<PathBuf>,
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,
    /// Weight of the vector rank in hybrid fusion, in `[0, 1]`
    pub hybrid_alpha: f64,
    /// Vector candidates fetched per requested hybrid result
    pub candidate_multiplier: usize,
    /// Metric used for vector ordering and relevance scores
    pub distance_metric: DistanceMetric,
    /// Documents indexed concurrently by batch operations
    pub max_workers: usize,
    /// Documents listed in a bulk-mutation preview
    pub preview_sample_size: usize,
    /// Embedding provider settings
    pub embedding: EmbedConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            chunk_size: 1000,
            chunk_overlap: 200,
            hybrid_alpha: 0.5,
            candidate_multiplier: 4,
            distance_metric: DistanceMetric::Cosine,
            max_workers: 4,
            preview_sample_size: 10,
            embedding: EmbedConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration persisting to `database_path`.
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            database_path: Some(database_path),
            ..Self::default()
        }
    }

    /// In-memory configuration, mostly for tests.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load and validate a TOML configuration file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate TOML configuration text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| RetrieverError::config(format!("Invalid TOML configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_hybrid_alpha(mut self, alpha: f64) -> Self {
        self.hybrid_alpha = alpha;
        self
    }

    pub fn with_distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RetrieverError::config("chunk_size must be at least 1"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RetrieverError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.hybrid_alpha) {
            return Err(RetrieverError::config(format!(
                "hybrid_alpha must be within [0, 1], got {}",
                self.hybrid_alpha
            )));
        }
        if self.candidate_multiplier == 0 || self.max_workers == 0 {
            return Err(RetrieverError::config(
                "candidate_multiplier and max_workers must be at least 1",
            ));
        }
        self.embedding
            .validate()
            .map_err(|e| RetrieverError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsift_embed::ProviderKind;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preview_sample_size, 10);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_toml_overrides() -> Result<()> {
        let config = EngineConfig::from_toml_str(
            r#"
            database_path = "/tmp/index.db"
            chunk_size = 500
            chunk_overlap = 50
            hybrid_alpha = 0.7
            distance_metric = "l2"

            [embedding]
            provider = "hash"
            dimension = 32
            "#,
        )?;
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/index.db")));
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.distance_metric, DistanceMetric::L2);
        assert_eq!(config.embedding.provider, ProviderKind::Hash);
        assert_eq!(config.max_workers, 4);
        Ok(())
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let config = EngineConfig::default().with_chunking(100, 100);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RetrieverError::Config { .. }));
    }

    #[test]
    fn test_alpha_out_of_range_rejected() {
        assert!(EngineConfig::from_toml_str("hybrid_alpha = 1.5").is_err());
    }

    #[test]
    fn test_loads_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("docsift.toml");
        std::fs::write(&path, "max_workers = 2\n")?;
        let config = EngineConfig::from_toml_file(&path)?;
        assert_eq!(config.max_workers, 2);
        Ok(())
    }
}
