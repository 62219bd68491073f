//! TOML configuration for the retriever binary.
//!
//! Every key is optional; missing keys take the defaults below. Command line
//! flags override whatever the file says.
//!
//! ```toml
//! index_path = "data/xpa_index.sqlite"
//! retrieval_k = 3
//!
//! [chunking]
//! max_chunk_length = 900
//! chunk_overlap = 150
//!
//! [embedding]
//! provider = "fastembed"
//! model_name = "paraphrase-multilingual-MiniLM-L12-v2"
//! ```

use crate::error::{Result, RetrieverError};
use crate::retrieval::chunking_strategy::ChunkingConfig;
use crate::retrieval::indexing_engine::IndexingEngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use xpa_embed::{
    DEFAULT_HASHING_DIMENSION, DEFAULT_MODEL_NAME, EmbedConfig, EmbeddingProvider,
    FastEmbedProvider, HashingEmbedProvider,
};

pub const DEFAULT_INDEX_PATH: &str = "xpa_index.sqlite";
pub const DEFAULT_RETRIEVAL_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub index_path: PathBuf,
    /// Passages returned per question
    pub retrieval_k: usize,
    pub max_concurrent_batches: usize,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingSettings,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            retrieval_k: DEFAULT_RETRIEVAL_K,
            max_concurrent_batches: 4,
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl RetrieverConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RetrieverError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            RetrieverError::InvalidConfig { message } => {
                RetrieverError::invalid_config(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval_k == 0 {
            return Err(RetrieverError::invalid_config(
                "retrieval_k must be at least 1",
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(RetrieverError::invalid_config(
                "max_concurrent_batches must be at least 1",
            ));
        }
        self.chunking.validate()?;
        self.embedding.validate()
    }

    pub fn indexing_engine_config(&self) -> IndexingEngineConfig {
        IndexingEngineConfig::new(self.chunking.clone())
            .with_max_concurrent_batches(self.max_concurrent_batches)
    }
}

/// Which embedding backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    FastEmbed,
    Hashing,
}

impl std::str::FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fastembed" => Ok(EmbedderKind::FastEmbed),
            "hashing" => Ok(EmbedderKind::Hashing),
            _ => Err(format!("Invalid embedder: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbedderKind,
    pub model_name: String,
    pub model_version: String,
    pub cache_dir: Option<PathBuf>,
    pub batch_size: usize,
    pub max_input_length: usize,
    /// Only used by the hashing embedder
    pub hashing_dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbedderKind::default(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_version: "1".to_string(),
            cache_dir: None,
            batch_size: 16,
            max_input_length: 4096,
            hashing_dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.provider == EmbedderKind::Hashing && self.hashing_dimension == 0 {
            return Err(RetrieverError::invalid_config(
                "embedding.hashing_dimension must be at least 1",
            ));
        }
        self.embed_config()?
            .validate()
            .map_err(|e| RetrieverError::invalid_config(format!("embedding: {e}")))
    }

    pub fn embed_config(&self) -> Result<EmbedConfig> {
        EmbedConfig::builder()
            .model_name(self.model_name.clone())
            .model_version(self.model_version.clone())
            .cache_dir(self.cache_dir.clone())
            .batch_size(self.batch_size)
            .max_input_length(self.max_input_length)
            .build()
            .map_err(|e| RetrieverError::invalid_config(e.to_string()))
    }

    /// Instantiates the configured embedder, loading the model if needed.
    pub async fn create_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.provider {
            EmbedderKind::FastEmbed => {
                let provider = FastEmbedProvider::create(self.embed_config()?)
                    .await
                    .map_err(|e| RetrieverError::invalid_config(format!("embedding model: {e}")))?;
                Ok(Arc::new(provider))
            }
            EmbedderKind::Hashing => Ok(Arc::new(
                HashingEmbedProvider::new(self.hashing_dimension)
                    .with_model_version(self.model_version.clone())
                    .with_max_input_length(self.max_input_length),
            )),
        }
    }
}
