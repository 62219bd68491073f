use crate::error::{Result, RetrieverError};
use serde::{Deserialize, Serialize};
use xpa_context::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_MAX_CHUNK_LENGTH, Document, TextChunk, TextContextBuilder,
};

/// Configuration for chunking documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum size of each chunk in bytes, overlap included
    pub max_chunk_length: usize,
    /// Bytes of preceding text repeated at the start of each chunk
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chunk_length: usize, chunk_overlap: usize) -> Self {
        Self {
            max_chunk_length,
            chunk_overlap,
        }
    }

    pub fn with_max_chunk_length(mut self, max_chunk_length: usize) -> Self {
        self.max_chunk_length = max_chunk_length;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_length == 0 {
            return Err(RetrieverError::invalid_config(
                "chunking.max_chunk_length must be greater than zero",
            ));
        }
        if self.chunk_overlap.saturating_mul(2) > self.max_chunk_length {
            return Err(RetrieverError::invalid_config(format!(
                "chunking.chunk_overlap ({}) must be at most half of chunking.max_chunk_length ({})",
                self.chunk_overlap, self.max_chunk_length
            )));
        }
        Ok(())
    }
}

/// Strategy for chunking documents - delegates entirely to xpa-context
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    config: ChunkingConfig,
    builder: TextContextBuilder,
}

impl ChunkingStrategy {
    /// Create a new chunking strategy with the given configuration
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        let builder = TextContextBuilder::with_limits(config.max_chunk_length, config.chunk_overlap)?;
        Ok(Self { config, builder })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk a document's text
    pub fn chunk_document(&self, document: &Document) -> Vec<TextChunk> {
        let chunks = self.builder.chunk_document(document);

        tracing::debug!(
            "Chunked {} into {} chunks (max length: {}, overlap: {})",
            document.id,
            chunks.len(),
            self.builder.max_chunk_length(),
            self.builder.chunk_overlap()
        );

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpa_context::{Language, normalize_text};

    #[test]
    fn test_chunking_strategy() {
        let strategy = ChunkingStrategy::new(ChunkingConfig::new(200, 40)).unwrap();

        let text = "La puissance statistique est la probabilité de rejeter l'hypothèse nulle \
                    lorsqu'elle est fausse. Elle dépend de la taille de l'échantillon.\n\n\
                    Un test sous-dimensionné manque des effets réels. Un test \
                    sur-dimensionné gaspille du trafic. Le calcul de puissance se fait \
                    avant le lancement de l'expérience.";
        let doc = Document::new(
            "wiki::fr::Puissance statistique",
            "Puissance statistique",
            Language::Fr,
            text,
            "https://fr.wikipedia.org/wiki/Puissance_statistique",
        );
        let chunks = strategy.chunk_document(&doc);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.language == Language::Fr));
        assert!(chunks.iter().all(|c| c.chunk_text.len() <= 200));

        let reconstructed: String = chunks.iter().map(|c| c.own_text()).collect();
        assert_eq!(reconstructed, normalize_text(text));
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkingConfig::default().validate().is_ok());
        assert!(ChunkingConfig::new(0, 0).validate().is_err());
        assert!(matches!(
            ChunkingStrategy::new(ChunkingConfig::new(100, 51)),
            Err(RetrieverError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_config_from_toml() {
        let config: ChunkingConfig = toml::from_str("max_chunk_length = 500").unwrap();
        assert_eq!(config, ChunkingConfig::new(500, DEFAULT_CHUNK_OVERLAP));
    }
}
