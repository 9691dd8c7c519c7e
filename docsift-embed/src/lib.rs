//! # docsift-embed
//!
//! Text embedding providers for docsift. The indexing engine treats an
//! embedder as a black box turning an ordered batch of texts into an equally
//! ordered batch of fixed-dimension vectors; this crate defines that contract
//! and ships two implementations:
//!
//! - [`FastEmbedProvider`]: local ONNX models through fastembed, loaded on a
//!   blocking thread and shared behind a mutex.
//! - [`HashEmbedProvider`]: deterministic xxHash64 feature hashing. No model
//!   download, useful offline and in tests.
//!
//! ```no_run
//! use docsift_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> docsift_embed::Result<()> {
//! let provider = create_provider(&EmbedConfig::hash(384)).await?;
//! let result = provider.embed_texts(&["Hello world".to_string()]).await?;
//! assert_eq!(result.dimension, 384);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod provider;

pub use config::{EmbedConfig, ProviderKind};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingResult, FastEmbedProvider, HashEmbedProvider, create_provider,
};
