//! Error types for the embedding system

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration problems, model loading failures and runtime failures
/// while generating vectors. Errors raised by fastembed arrive as
/// [`anyhow::Error`] and are wrapped in [`EmbedError::External`].
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The provider returned a different number of vectors than inputs
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// A vector did not have the provider's declared dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The shared model handle was poisoned by a panicking batch
    #[error("Embedding model lock poisoned")]
    LockPoisoned,

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Wrap an error raised while loading a model.
    pub fn model_init<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ModelInitialization {
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
