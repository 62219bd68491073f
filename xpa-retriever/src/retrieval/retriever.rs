use crate::error::{Result, RetrieverError};
use crate::storage::{EmbeddingModelMetadata, IndexStore, SqliteIndexStore};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use xpa_embed::{EmbedError, EmbeddingProvider};

use super::vector_index::{RetrievalResult, VectorIndex};

/// Query side of the retrieval core: an index plus the embedder that built it.
///
/// Cloning is cheap and every clone shares the same index, so one retriever can
/// be handed to as many tasks as there are concurrent questions.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("model", &self.index.model().model_id())
            .field("chunks", &self.index.len())
            .finish()
    }
}

impl Retriever {
    /// Pairs an index with a provider.
    ///
    /// # Errors
    /// `ModelMismatch` when the provider is not the model the index was built with.
    pub fn new(index: Arc<VectorIndex>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let provider_model = EmbeddingModelMetadata::from_provider(provider.as_ref()).model_id();
        let index_model = index.model().model_id();
        if provider_model != index_model {
            return Err(RetrieverError::ModelMismatch {
                index_model,
                provider_model,
            });
        }
        Ok(Self { index, provider })
    }

    /// Loads the index persisted at `path`, checking it against `provider`.
    pub async fn open(path: impl AsRef<Path>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let expected = EmbeddingModelMetadata::from_provider(provider.as_ref());
        let index = SqliteIndexStore::new(path.as_ref()).load(&expected).await?;
        Self::new(Arc::new(index), provider)
    }

    /// Returns the `k` chunks most similar to `query`, best first.
    ///
    /// # Errors
    /// - `InvalidQuery` for an empty query or one longer than the embedder accepts
    /// - `QueryEmbedding` when the embedder fails for another reason
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Err(RetrieverError::InvalidQuery {
                reason: "query is empty".to_string(),
            });
        }
        let limit = self.provider.max_input_length();
        if query.len() > limit {
            return Err(RetrieverError::InvalidQuery {
                reason: format!("query is {} bytes, over the limit of {limit}", query.len()),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        // Language hint is left out: the question may be in either language.
        let embedding = self
            .provider
            .embed_text(query, None)
            .await
            .map_err(|e| match e {
                EmbedError::EmptyInput { .. }
                | EmbedError::InputTooLong { .. }
                | EmbedError::TooManyTokens { .. } => {
                    RetrieverError::InvalidQuery {
                        reason: e.to_string(),
                    }
                }
                other => RetrieverError::QueryEmbedding(other),
            })?;

        let results = self.index.search_embedding(&embedding, k)?;
        debug!("Query returned {} of {} chunks", results.len(), self.index.len());
        Ok(results)
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::indexing_engine::{IndexingEngine, IndexingEngineConfig};
    use xpa_context::{Document, Language};
    use xpa_embed::HashingEmbedProvider;

    async fn retriever() -> Retriever {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedProvider::new(128));
        let engine = IndexingEngine::new(IndexingEngineConfig::default(), provider.clone()).unwrap();
        let index = engine
            .index(&[
                Document::new(
                    "glossary::en::ab",
                    "A/B testing",
                    Language::En,
                    "A/B testing compares two variants of a page on live traffic.",
                    "",
                ),
                Document::new(
                    "glossary::en::bandit",
                    "Multi-armed bandit",
                    Language::En,
                    "A bandit algorithm shifts traffic toward the better arm while learning.",
                    "",
                ),
            ])
            .await
            .unwrap();
        Retriever::new(Arc::new(index), provider).unwrap()
    }

    #[tokio::test]
    async fn test_search() {
        let retriever = retriever().await;
        let results = retriever.search("What is A/B testing?", 3).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "glossary::en::ab");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_invalid_queries() {
        let retriever = retriever().await;

        assert!(matches!(
            retriever.search("  \t", 3).await,
            Err(RetrieverError::InvalidQuery { .. })
        ));
        let long = "test ".repeat(2000);
        assert!(matches!(
            retriever.search(&long, 3).await,
            Err(RetrieverError::InvalidQuery { .. })
        ));
        assert!(retriever.search("bandit", 0).await.unwrap().is_empty());
        assert_eq!(retriever.search("bandit", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_model_mismatch() {
        let retriever = retriever().await;
        let other: Arc<dyn EmbeddingProvider> =
            Arc::new(HashingEmbedProvider::new(128).with_model_version("2"));

        let err = Retriever::new(retriever.index().clone(), other).unwrap_err();
        assert!(matches!(err, RetrieverError::ModelMismatch { .. }));
    }

    /// Hashing embedder with a word-count limit standing in for a tokenizer.
    struct WordLimitedProvider {
        inner: HashingEmbedProvider,
        max_words: usize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for WordLimitedProvider {
        async fn embed_texts(
            &self,
            texts: &[String],
            language: Option<Language>,
        ) -> xpa_embed::Result<xpa_embed::EmbeddingResult> {
            for (index, text) in texts.iter().enumerate() {
                let tokens = text.split_whitespace().count();
                if tokens > self.max_words {
                    return Err(EmbedError::TooManyTokens {
                        index,
                        tokens,
                        limit: self.max_words,
                    });
                }
            }
            self.inner.embed_texts(texts, language).await
        }

        fn embedding_dimension(&self) -> usize {
            self.inner.embedding_dimension()
        }

        fn provider_name(&self) -> &str {
            self.inner.provider_name()
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        fn model_version(&self) -> &str {
            self.inner.model_version()
        }

        fn max_input_length(&self) -> usize {
            self.inner.max_input_length()
        }

        fn is_normalized(&self) -> bool {
            self.inner.is_normalized()
        }
    }

    #[tokio::test]
    async fn test_query_over_token_limit_is_invalid() {
        let retriever = retriever().await;
        let limited: Arc<dyn EmbeddingProvider> = Arc::new(WordLimitedProvider {
            inner: HashingEmbedProvider::new(128),
            max_words: 8,
        });
        let retriever = Retriever::new(retriever.index().clone(), limited).unwrap();

        // Short in bytes, long in tokens.
        let query = "a b c d e f g h i j";
        assert!(query.len() < retriever.provider().max_input_length());
        let err = retriever.search(query, 3).await.unwrap_err();
        assert!(matches!(err, RetrieverError::InvalidQuery { .. }), "got {err:?}");

        assert_eq!(retriever.search("bandit arm", 1).await.unwrap().len(), 1);
    }
}
