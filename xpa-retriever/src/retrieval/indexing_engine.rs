//! Offline indexing pipeline that turns a corpus into a [`VectorIndex`].
//!
//! The engine runs once per corpus version. It validates the document list,
//! chunks every document, embeds the chunks and assembles the index. Nothing
//! is persisted here; saving is the job of an
//! [`IndexStore`](crate::storage::IndexStore).
//!
//! ## Pipeline Flow
//!
//! ```text
//! Documents → ChunkingStrategy → EmbeddingProvider → VectorIndex::build
//!                    ↑                   ↑                  ↑
//!           TextContextBuilder   one batch per document   serial
//!                                 (bounded concurrency)
//! ```
//!
//! ## Failure
//!
//! The build is all or nothing. The first chunk that cannot be embedded aborts
//! it with [`RetrieverError::Embedding`], naming the document and chunk. There
//! are no retries and no partially built index.

use crate::error::{Result, RetrieverError};
use crate::storage::EmbeddingModelMetadata;
use futures::{StreamExt, TryStreamExt, stream};
use itertools::Itertools;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use xpa_context::{Document, TextChunk};
use xpa_embed::{EmbedError, EmbeddingProvider};

use super::chunking_strategy::{ChunkingConfig, ChunkingStrategy};
use super::vector_index::{IndexEntry, VectorIndex};

/// Configuration for the indexing engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingEngineConfig {
    /// Chunking configuration
    pub chunking_config: ChunkingConfig,
    /// Documents embedded concurrently
    pub max_concurrent_batches: usize,
}

impl Default for IndexingEngineConfig {
    fn default() -> Self {
        Self {
            chunking_config: ChunkingConfig::default(),
            max_concurrent_batches: 4,
        }
    }
}

impl IndexingEngineConfig {
    pub fn new(chunking_config: ChunkingConfig) -> Self {
        Self {
            chunking_config,
            ..Self::default()
        }
    }

    /// Set how many documents may be embedded at the same time.
    ///
    /// Each in-flight document is one call to the embedding provider. Values
    /// below one are treated as one.
    pub fn with_max_concurrent_batches(mut self, batches: usize) -> Self {
        self.max_concurrent_batches = batches;
        self
    }

    /// Set the maximum size for text chunks in bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunking_config = self.chunking_config.with_max_chunk_length(size);
        self
    }

    pub fn with_chunk_overlap(mut self, overlap: usize) -> Self {
        self.chunking_config = self.chunking_config.with_chunk_overlap(overlap);
        self
    }
}

/// Result of processing a single document
#[derive(Debug)]
pub struct DocumentProcessingResult {
    pub document_id: String,
    pub entries: Vec<IndexEntry>,
    pub processing_time: Duration,
}

/// Builds indexes from documents with one embedding provider.
#[derive(Clone)]
pub struct IndexingEngine {
    config: IndexingEngineConfig,
    chunking_strategy: ChunkingStrategy,
    embedding_provider: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for IndexingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingEngine")
            .field("config", &self.config)
            .field("provider", &self.embedding_provider.provider_name())
            .field("model", &self.embedding_provider.model_name())
            .finish()
    }
}

impl IndexingEngine {
    /// Create a new indexing engine.
    ///
    /// # Errors
    /// `InvalidConfig` when the chunking configuration is rejected.
    pub fn new(
        config: IndexingEngineConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let chunking_strategy = ChunkingStrategy::new(config.chunking_config.clone())?;
        info!(
            "Initializing IndexingEngine with {} model {} ({} dimensions)",
            embedding_provider.provider_name(),
            embedding_provider.model_name(),
            embedding_provider.embedding_dimension()
        );

        Ok(Self {
            config,
            chunking_strategy,
            embedding_provider,
        })
    }

    pub fn config(&self) -> &IndexingEngineConfig {
        &self.config
    }

    /// Fingerprint of the model every vector of the next index comes from
    pub fn model_metadata(&self) -> EmbeddingModelMetadata {
        EmbeddingModelMetadata::from_provider(self.embedding_provider.as_ref())
    }

    /// Chunk, embed and index a whole corpus.
    ///
    /// # Errors
    /// - `EmptyCorpus` when `documents` is empty
    /// - `DuplicateDocument` when two documents share an id
    /// - `Embedding` when any chunk fails to embed
    /// - `DimensionMismatch` when the provider returns vectors of the wrong size
    pub async fn index(&self, documents: &[Document]) -> Result<VectorIndex> {
        let start_time = Instant::now();

        if documents.is_empty() {
            return Err(RetrieverError::EmptyCorpus);
        }
        if let Some(duplicate) = documents.iter().map(|d| &d.id).duplicates().next() {
            return Err(RetrieverError::DuplicateDocument {
                document_id: duplicate.clone(),
            });
        }

        info!(
            "Indexing {} documents ({} concurrent batches)",
            documents.len(),
            self.config.max_concurrent_batches.max(1)
        );

        let processed: Vec<DocumentProcessingResult> = stream::iter(documents)
            .map(|document| self.process_document(document))
            .buffered(self.config.max_concurrent_batches.max(1))
            .try_collect()
            .await?;

        let entries: Vec<IndexEntry> = processed
            .into_iter()
            .flat_map(|result| {
                debug!(
                    "Embedded {} chunks of {} in {:?}",
                    result.entries.len(),
                    result.document_id,
                    result.processing_time
                );
                result.entries
            })
            .collect();

        let index = VectorIndex::build(self.model_metadata(), entries)?
            .with_chunking(self.config.chunking_config.clone());

        info!(
            "Indexed {} documents into {} chunks in {:?}",
            index.document_count(),
            index.len(),
            start_time.elapsed()
        );

        Ok(index)
    }

    /// Chunk and embed a single document
    async fn process_document(&self, document: &Document) -> Result<DocumentProcessingResult> {
        let start_time = Instant::now();
        debug!("Processing document: {}", document.id);

        let chunks = self.chunking_strategy.chunk_document(document);
        let passages: Vec<String> = chunks.iter().map(TextChunk::passage).collect();

        let embedding_result = self
            .embedding_provider
            .embed_texts(&passages, Some(document.language))
            .await
            .map_err(|source| RetrieverError::Embedding {
                document_id: document.id.clone(),
                chunk_index: source.input_index(),
                source,
            })?;

        if embedding_result.len() != chunks.len() {
            return Err(RetrieverError::Embedding {
                document_id: document.id.clone(),
                chunk_index: None,
                source: EmbedError::EmbeddingGeneration {
                    source: format!(
                        "provider returned {} embeddings for {} chunks",
                        embedding_result.len(),
                        chunks.len()
                    )
                    .into(),
                },
            });
        }

        let entries = chunks
            .iter()
            .zip(embedding_result.embeddings)
            .map(|(chunk, embedding)| IndexEntry::from_chunk(chunk, &document.source_url, embedding))
            .collect();

        Ok(DocumentProcessingResult {
            document_id: document.id.clone(),
            entries,
            processing_time: start_time.elapsed(),
        })
    }
}
