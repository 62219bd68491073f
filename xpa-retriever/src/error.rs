//! Error types for building, persisting and querying an index.

use std::path::PathBuf;
use xpa_context::ChunkingError;
use xpa_embed::EmbedError;

pub type Result<T> = std::result::Result<T, RetrieverError>;

/// Everything that can go wrong in the retrieval core.
///
/// Build errors (`Embedding`, `DimensionMismatch`, `EmptyCorpus`,
/// `DuplicateDocument`, `DuplicateChunk`) abort the whole build. `InvalidQuery`
/// and `QueryEmbedding` concern a single query and leave the index untouched.
/// `IndexLoad` means the persisted artifact cannot be trusted and the index has
/// to be rebuilt.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// `chunk_index` is `None` when the provider failed for the whole document.
    #[error("failed to embed {} of document '{document_id}': {source}", chunk_label(.chunk_index))]
    Embedding {
        document_id: String,
        chunk_index: Option<usize>,
        #[source]
        source: EmbedError,
    },

    #[error("failed to embed query: {0}")]
    QueryEmbedding(#[source] EmbedError),

    #[error("embedding dimension mismatch for {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("cannot load index from {}: {reason}", path.display())]
    IndexLoad { path: PathBuf, reason: String },

    #[error("cannot save index to {}: {source}", path.display())]
    IndexSave {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cannot build an index from an empty corpus")]
    EmptyCorpus,

    #[error("document id '{document_id}' appears more than once")]
    DuplicateDocument { document_id: String },

    #[error("chunk {chunk_index} of document '{document_id}' appears more than once")]
    DuplicateChunk {
        document_id: String,
        chunk_index: usize,
    },

    #[error("index was built with model '{index_model}' but the embedder is '{provider_model}'")]
    ModelMismatch {
        index_model: String,
        provider_model: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("{}:{line}: {reason}", path.display())]
    Corpus {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrieverError {
    pub(crate) fn index_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn index_save<E>(path: impl Into<PathBuf>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::IndexSave {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the caller should rebuild the index rather than retry.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, Self::IndexLoad { .. } | Self::ModelMismatch { .. })
    }
}

fn chunk_label(chunk_index: &Option<usize>) -> String {
    match chunk_index {
        Some(index) => format!("chunk {index}"),
        None => "chunks".to_string(),
    }
}
