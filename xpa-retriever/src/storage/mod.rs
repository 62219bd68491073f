//! Persistence layer for xpa-retriever
//!
//! An index is persisted as a single artifact per corpus version. The artifact
//! carries an [`IndexManifest`] describing how it was built, in particular the
//! fingerprint of the embedding model, so that loading it with a different
//! model is refused instead of producing meaningless similarity scores.
//!
//! ## Key Components
//!
//! - **EmbeddingModelMetadata**: Identity of the model that produced the vectors
//! - **IndexManifest**: Header stored alongside the vectors
//! - **IndexStore**: Save/load interface for whole indexes
//! - **SqliteIndexStore**: SQLite implementation with atomic replacement
//!
//! ## Architecture
//!
//! ```text
//! VectorIndex ── IndexStore ── SqliteIndexStore ── <index>.sqlite
//!                                  │
//!                          temp file + rename
//! ```

use crate::error::Result;
use crate::retrieval::chunking_strategy::ChunkingConfig;
use crate::retrieval::vector_index::VectorIndex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use xpa_embed::EmbeddingProvider;

pub mod sqlite_store;

pub use sqlite_store::SqliteIndexStore;

/// Version of the on-disk layout. Artifacts with another version are rejected.
pub const FORMAT_VERSION: i64 = 1;

/// Metadata about the embedding model used for generating embeddings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelMetadata {
    /// Name of the embedding model (e.g., "paraphrase-multilingual-MiniLM-L12-v2")
    pub model_name: String,
    /// Provider of the embedding model (e.g., "fastembed")
    pub provider: String,
    /// Dimension of the embedding vectors
    pub dimension: usize,
    /// Version/revision of the model
    pub model_version: String,
    /// Whether embeddings are normalized
    pub normalized: bool,
}

impl EmbeddingModelMetadata {
    pub fn new(
        provider: impl Into<String>,
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            provider: provider.into(),
            dimension,
            model_version: model_version.into(),
            normalized: true,
        }
    }

    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Describes the model behind a provider.
    pub fn from_provider(provider: &dyn EmbeddingProvider) -> Self {
        Self {
            model_name: provider.model_name().to_string(),
            provider: provider.provider_name().to_string(),
            dimension: provider.embedding_dimension(),
            model_version: provider.model_version().to_string(),
            normalized: provider.is_normalized(),
        }
    }

    /// Create a unique identifier for this model configuration
    pub fn model_id(&self) -> String {
        let normalized_part = if self.normalized { "norm" } else { "raw" };
        format!(
            "{}:{}:{}:{}:{}",
            self.provider, self.model_name, self.model_version, self.dimension, normalized_part
        )
    }
}

/// Header persisted with every index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: i64,
    /// Version of xpa-retriever that wrote the artifact
    pub retriever_version: String,
    /// Unix timestamp of the save
    pub created_at: i64,
    pub embedding_model: EmbeddingModelMetadata,
    /// Chunking policy the corpus went through, when known
    pub chunking: Option<ChunkingConfig>,
    pub document_count: usize,
    pub chunk_count: usize,
    pub dimension: usize,
    /// Hex blake3 digest of the canonical entry stream
    pub content_hash: String,
}

impl IndexManifest {
    pub fn for_index(index: &VectorIndex) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            retriever_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().timestamp(),
            embedding_model: index.model().clone(),
            chunking: index.chunking().cloned(),
            document_count: index.document_count(),
            chunk_count: index.len(),
            dimension: index.dimension(),
            content_hash: index.content_hash(),
        }
    }

    pub fn created_at_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp(self.created_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| self.created_at.to_string())
    }
}

/// Whole-index persistence. There is no partial update: an index is written
/// and read as a unit.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Persist the index, replacing any previous artifact atomically
    async fn save(&self, index: &VectorIndex) -> Result<IndexManifest>;

    /// Load the index, refusing artifacts built with another model than `expected_model`
    async fn load(&self, expected_model: &EmbeddingModelMetadata) -> Result<VectorIndex>;

    /// Read only the manifest
    async fn manifest(&self) -> Result<IndexManifest>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpa_embed::HashingEmbedProvider;

    #[test]
    fn test_model_id() {
        let model = EmbeddingModelMetadata::new(
            "fastembed",
            "paraphrase-multilingual-MiniLM-L12-v2",
            "1",
            384,
        );
        assert_eq!(
            model.model_id(),
            "fastembed:paraphrase-multilingual-MiniLM-L12-v2:1:384:norm"
        );
        assert_eq!(
            model.with_normalized(false).model_id(),
            "fastembed:paraphrase-multilingual-MiniLM-L12-v2:1:384:raw"
        );
    }

    #[test]
    fn test_model_from_provider() {
        let provider = HashingEmbedProvider::new(32).with_model_version("2");
        let model = EmbeddingModelMetadata::from_provider(&provider);
        assert_eq!(model.model_id(), "hashing:fnv1a-word-trigram:2:32:norm");
    }
}
