//! Error types for the embedding system

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// `EmptyInput`, `InputTooLong` and `TooManyTokens` describe a bad input text
/// and carry the position of the offending text inside the batch, so callers
/// can map it back to the chunk it came from. They are fatal for that text: a
/// provider never substitutes a zero vector or silently truncates.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Input text is empty or only whitespace
    #[error("Input text at position {index} is empty")]
    EmptyInput { index: usize },

    /// Input text exceeds the provider's hard length ceiling
    #[error("Input text at position {index} is {length} bytes, over the limit of {limit}")]
    InputTooLong {
        index: usize,
        length: usize,
        limit: usize,
    },

    /// Input text tokenizes past the model's maximum sequence length
    #[error("Input text at position {index} is {tokens} tokens, over the model limit of {limit}")]
    TooManyTokens {
        index: usize,
        tokens: usize,
        limit: usize,
    },

    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO errors when preparing the model cache directory
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

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
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Position of the offending text for input errors.
    pub fn input_index(&self) -> Option<usize> {
        match self {
            Self::EmptyInput { index }
            | Self::InputTooLong { index, .. }
            | Self::TooManyTokens { index, .. } => Some(*index),
            _ => None,
        }
    }
}
