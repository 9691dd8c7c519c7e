//! Embedding provider implementations

use crate::config::{EmbedConfig, ProviderKind};
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::hash::Hasher;
use std::sync::{Arc, Mutex};
use twox_hash::XxHash64;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result; the dimension is taken from the first vector.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Implementations must be order preserving: position `i` of the output of
/// [`embed_texts`](Self::embed_texts) is the vector for input `i`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Build the provider described by `config`.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    match config.provider {
        ProviderKind::FastEmbed => Ok(Arc::new(FastEmbedProvider::create(config.clone()).await?)),
        ProviderKind::Hash => Ok(Arc::new(HashEmbedProvider::new(config.clone()))),
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Map a configured model name onto a built-in fastembed model.
    pub fn resolve_model(name: &str) -> Result<EmbeddingModel> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                Ok(EmbeddingModel::AllMiniLML6V2)
            }
            "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
            "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
                Ok(EmbeddingModel::NomicEmbedTextV15)
            }
            other => Err(EmbedError::invalid_config(format!(
                "Unsupported fastembed model: {other}"
            ))),
        }
    }

    /// Load the configured model on a blocking thread and probe its dimension.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let model_kind = Self::resolve_model(config.model_name())?;
        tracing::info!("Loading fastembed model: {}", config.model_name());

        let load_config = config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let mut init_options = InitOptions::new(model_kind)
                    .with_show_download_progress(load_config.show_download_progress);
                if let Some(cache_dir) = &load_config.cache_dir {
                    init_options = init_options.with_cache_dir(cache_dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);
                if dimension == 0 {
                    return Err(EmbedError::invalid_config(
                        "Model produced an empty probe embedding",
                    ));
                }
                Ok((model, dimension))
            })
            .await??;

        tracing::info!("Model loaded successfully. Dimension: {}", dimension);
        Ok(Self {
            config,
            model: Arc::new(Mutex::new(model)),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let model = Arc::clone(&self.model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut model_guard = model.lock().map_err(|_| EmbedError::LockPoisoned)?;
                model_guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            for mut embedding in batch_embeddings {
                if embedding.len() != self.dimension {
                    return Err(EmbedError::DimensionMismatch {
                        expected: self.dimension,
                        actual: embedding.len(),
                    });
                }
                if self.config.normalize {
                    l2_normalize(&mut embedding);
                }
                all_embeddings.push(embedding);
            }
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                actual: all_embeddings.len(),
            });
        }
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

/// Deterministic bag-of-tokens embedding built from xxHash64 feature hashing.
///
/// Every lowercased alphanumeric token is hashed into one bucket of a fixed
/// size vector. Texts sharing tokens land close together under cosine
/// distance, which is enough for offline use and for tests.
#[derive(Debug, Clone)]
pub struct HashEmbedProvider {
    config: EmbedConfig,
}

impl HashEmbedProvider {
    pub fn new(config: EmbedConfig) -> Self {
        Self { config }
    }

    /// Embed one text synchronously.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let dimension = self.config.dimension.max(1);
        let mut vector = vec![0.0f32; dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.to_lowercase().as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        if self.config.normalize {
            l2_normalize(&mut vector);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult::new(
            texts.iter().map(|text| self.embed_sync(text)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension.max(1)
    }

    fn provider_name(&self) -> &str {
        "xxhash"
    }
}
