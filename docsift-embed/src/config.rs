//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local ONNX models through fastembed
    #[default]
    FastEmbed,
    /// Deterministic feature hashing, no model download
    Hash,
}

/// Configuration for embedding providers.
///
/// Deserializable from the `[embedding]` table of the engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Backend used to produce vectors
    pub provider: ProviderKind,
    /// fastembed model name, e.g. `all-minilm-l6-v2`
    pub model_name: String,
    /// Directory where fastembed caches downloaded models
    pub cache_dir: Option<PathBuf>,
    /// Maximum number of texts sent to the model at once
    pub batch_size: usize,
    /// Output dimension of the hash provider (ignored by fastembed)
    pub dimension: usize,
    /// Whether to L2-normalize every vector
    pub normalize: bool,
    /// Show download progress bars when fetching models
    pub show_download_progress: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model_name: "all-minilm-l6-v2".to_string(),
            cache_dir: None,
            batch_size: 32,
            dimension: 384,
            normalize: true,
            show_download_progress: false,
        }
    }
}

impl EmbedConfig {
    /// Configuration for the deterministic hash provider with the given dimension.
    pub fn hash(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hash,
            model_name: "xxhash-features".to_string(),
            dimension,
            ..Self::default()
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Set the model cache directory (builder style)
    pub fn with_cache_dir<P: Into<PathBuf>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..self
        }
    }

    /// Get the model name
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Check the configuration for values no provider can work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }
        if self.provider == ProviderKind::Hash && self.dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hash provider dimension must be at least 1",
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_name must not be empty"));
        }
        Ok(())
    }
}
