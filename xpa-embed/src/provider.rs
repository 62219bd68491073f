//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};
use xpa_context::Language;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Wraps a batch of embeddings; the dimension is read from the first one
    /// (0 for an empty batch).
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Capability to turn text into fixed-length vectors.
///
/// Implementations must be pure functions of the text: the same input gives
/// the same vector, and embedding a text alone or inside a batch gives the
/// same result. The language hint lets a provider pick language-specific
/// preprocessing; a multilingual model is free to ignore it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str, language: Option<Language>) -> Result<Vec<f16>> {
        let texts = [text.to_string()];
        let result = self.embed_texts(&texts, language).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(
        &self,
        texts: &[String],
        language: Option<Language>,
    ) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn model_version(&self) -> &str;

    /// Longest accepted input, in bytes
    fn max_input_length(&self) -> usize;

    /// Whether vectors come out with unit length
    fn is_normalized(&self) -> bool;
}

/// Checks every text of a batch against the provider's input rules.
///
/// Empty or whitespace-only texts and texts longer than `max_input_length`
/// bytes are rejected with the position of the first offender.
pub fn validate_input(texts: &[String], max_input_length: usize) -> Result<()> {
    for (index, text) in texts.iter().enumerate() {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput { index });
        }
        if text.len() > max_input_length {
            return Err(EmbedError::InputTooLong {
                index,
                length: text.len(),
                limit: max_input_length,
            });
        }
    }
    Ok(())
}

/// Converts to f16, scaling to unit length first when `normalize` is set.
pub fn to_f16(embedding: &[f32], normalize: bool) -> Vec<f16> {
    let scale = if normalize {
        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 { 1.0 / norm } else { 1.0 }
    } else {
        1.0
    };
    embedding
        .iter()
        .map(|&x| f16::from_f32(x * scale))
        .collect()
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_cache() -> Result<std::sync::MutexGuard<'static, HashMap<String, ModelCacheEntry>>> {
    get_model_cache()
        .lock()
        .map_err(|_| EmbedError::invalid_config("model cache lock poisoned"))
}

/// Maps a configured model name to the fastembed model it designates.
///
/// Only sentence models trained for multilingual paraphrase are accepted:
/// a monolingual model would silently break French/English retrieval, and
/// instruction models such as e5 expect `query: `/`passage: ` prefixes that
/// this provider does not add.
pub fn resolve_model(model_name: &str) -> Result<EmbeddingModel> {
    let name = model_name
        .strip_prefix("sentence-transformers/")
        .unwrap_or(model_name);
    match name {
        "paraphrase-multilingual-MiniLM-L12-v2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        "paraphrase-multilingual-MiniLM-L12-v2-q" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2Q),
        "paraphrase-multilingual-mpnet-base-v2" => Ok(EmbeddingModel::ParaphraseMLMpnetBaseV2),
        other => Err(EmbedError::invalid_config(format!(
            "unsupported embedding model '{other}'"
        ))),
    }
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates an uninitialized provider; call [`initialize`](Self::initialize) before embedding.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 0,
        }
    }

    /// Loads the model (downloading it on first use), reusing a cached instance
    /// when another provider already loaded the same configuration.
    pub async fn initialize(&mut self) -> Result<()> {
        self.config.validate()?;
        let model_kind = resolve_model(&self.config.model_name)?;

        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );

        let cache_key = self.create_cache_key()?;

        let cached_data = {
            let cache = lock_cache()?;
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((cached_model, cached_dimension)) = cached_data {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return self.validate_model().await;
        }

        if let Some(dir) = &self.config.cache_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let mut init_options = InitOptions::new(model_kind)
                    .with_show_download_progress(config.show_download_progress);
                if let Some(dir) = config.cache_dir.clone() {
                    init_options = init_options.with_cache_dir(dir);
                }

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::ModelInitialization { source: e.into() })?;

                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(|e| EmbedError::ModelInitialization { source: e.into() })?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        lock_cache()?.insert(cache_key, (Arc::clone(&model_arc), dimension));

        self.model = Some(model_arc);
        self.dimension = dimension;

        self.validate_model().await
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    // Settings that only affect how texts are fed to the model (batch size,
    // input ceiling) share a cached model instance.
    fn create_cache_key(&self) -> Result<String> {
        let identity = serde_json::json!({
            "model_name": self.config.model_name,
            "model_version": self.config.model_version,
            "cache_dir": self.config.cache_dir,
        });
        let identity = serde_json::to_string(&identity)
            .map_err(|e| EmbedError::External { source: e.into() })?;

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(identity.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    async fn validate_model(&self) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EmbedError::invalid_config("Model not initialized"))?;

        let model_clone = Arc::clone(model);
        let validation_result = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut model_guard = model_clone
                .lock()
                .map_err(|_| EmbedError::invalid_config("model lock poisoned"))?;
            model_guard
                .embed(vec!["validation test".to_string()], None)
                .map_err(|e| EmbedError::EmbeddingGeneration { source: e.into() })
        })
        .await??;

        let embedding = validation_result.first().ok_or_else(|| {
            EmbedError::invalid_config("Model validation failed: no embeddings generated")
        })?;

        if embedding.is_empty() || embedding.len() != self.dimension {
            return Err(EmbedError::invalid_config(format!(
                "Model validation failed: expected dimension {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name());
        Ok(())
    }
}

/// Rejects texts the model's tokenizer would cut.
///
/// fastembed truncates every input to the tokenizer's maximum sequence length,
/// which would embed only a prefix of the text. `offset` is the position of
/// `texts[0]` in the caller's batch.
fn check_token_budget(model: &TextEmbedding, texts: &[String], offset: usize) -> Result<()> {
    let Some(limit) = model.tokenizer.get_truncation().map(|t| t.max_length) else {
        return Ok(());
    };

    for (i, text) in texts.iter().enumerate() {
        let encoding = model
            .tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| EmbedError::EmbeddingGeneration { source: e })?;
        if !encoding.get_overflowing().is_empty() {
            let tokens = encoding.len()
                + encoding
                    .get_overflowing()
                    .iter()
                    .map(|overflow| overflow.len())
                    .sum::<usize>();
            return Err(EmbedError::TooManyTokens {
                index: offset + i,
                tokens,
                limit,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(
        &self,
        texts: &[String],
        _language: Option<Language>,
    ) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }
        validate_input(texts, self.config.max_input_length)?;

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for (batch_idx, batch) in texts.chunks(self.config.batch_size).enumerate() {
            let batch = batch.to_vec();
            let expected = batch.len();
            let offset = batch_idx * self.config.batch_size;
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut model_guard = model_clone
                    .lock()
                    .map_err(|_| EmbedError::invalid_config("model lock poisoned"))?;
                check_token_budget(&model_guard, &batch, offset)?;
                model_guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::EmbeddingGeneration { source: e.into() })
            })
            .await??;

            if batch_embeddings.len() != expected {
                return Err(EmbedError::invalid_config(format!(
                    "model returned {} embeddings for {} texts",
                    batch_embeddings.len(),
                    expected
                )));
            }

            all_embeddings.extend(
                batch_embeddings
                    .iter()
                    .map(|embedding| to_f16(embedding, self.config.normalize)),
            );
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn model_version(&self) -> &str {
        &self.config.model_version
    }

    fn max_input_length(&self) -> usize {
        self.config.max_input_length
    }

    fn is_normalized(&self) -> bool {
        self.config.normalize
    }
}
