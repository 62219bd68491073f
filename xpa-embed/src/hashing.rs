//! Deterministic, offline embedding provider based on feature hashing.
//!
//! Vectors are built from word unigrams and character trigrams hashed with
//! FNV-1a into a fixed number of signed buckets. There is no model to load,
//! the output is bit-identical across runs and platforms, and texts sharing
//! vocabulary score high against each other. French and English only meet
//! where they share surface forms ("test", "A/B", "bandit"), so this provider
//! suits tests and offline smoke runs rather than real cross-lingual search.

use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingResult, to_f16, validate_input};
use async_trait::async_trait;
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;
use xpa_context::Language;

pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const TRIGRAM_WEIGHT: f32 = 0.5;

const FRENCH_ELISIONS: &[&str] = &[
    "qu", "l", "d", "j", "n", "s", "c", "m", "t", "jusqu", "lorsqu", "puisqu",
];

const FRENCH_STOP_WORDS: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "de", "du", "et", "est", "en", "que", "qui", "ce",
    "cette", "ces", "pour", "par", "sur", "dans", "au", "aux", "il", "elle", "on", "ne", "pas",
    "plus", "ou", "son", "sa", "ses", "se", "a", "y", "avec", "sont", "comme", "mais",
];

const ENGLISH_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "of", "and", "to", "in", "for", "on", "what", "which",
    "how", "it", "its", "this", "that", "by", "with", "as", "be", "or", "at", "from", "can",
];

/// Feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedProvider {
    dimension: usize,
    model_version: String,
    max_input_length: usize,
}

impl HashingEmbedProvider {
    pub const PROVIDER_NAME: &'static str = "hashing";
    pub const MODEL_NAME: &'static str = "fnv1a-word-trigram";

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_version: "1".to_string(),
            max_input_length: 4096,
        }
    }

    pub fn with_model_version(self, model_version: impl Into<String>) -> Self {
        Self {
            model_version: model_version.into(),
            ..self
        }
    }

    pub fn with_max_input_length(self, max_input_length: usize) -> Self {
        Self {
            max_input_length,
            ..self
        }
    }

    /// Embeds one text without input validation.
    pub fn embed_one(&self, text: &str, language: Option<Language>) -> Vec<f16> {
        let mut buckets = vec![0f32; self.dimension];

        for token in tokenize(text, language) {
            self.add_feature(&mut buckets, b"w:", token.as_bytes(), 1.0);

            let padded: Vec<char> = format!(" {token} ").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut buckets, b"t:", trigram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        to_f16(&buckets, true)
    }

    fn add_feature(&self, buckets: &mut [f32], kind: &[u8], feature: &[u8], weight: f32) {
        let mut hasher = FnvHasher::default();
        hasher.write(kind);
        hasher.write(feature);
        let hash = hasher.finish();

        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        buckets[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

/// Lowercased, accent-folded content words of `text`.
///
/// French elisions (`qu'`, `l'`, `d'`, ...) and English possessives are
/// stripped. Stop words of the hinted language are dropped, or of both
/// languages when there is no hint. A slash inside a word is kept so that
/// "A/B" stays one token.
pub fn tokenize(text: &str, language: Option<Language>) -> Vec<String> {
    let folded = fold(text);
    folded
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '/'))
        .filter_map(|raw| {
            let mut word = raw.trim_matches(|c| c == '\'' || c == '/');
            if let Some((head, tail)) = word.split_once('\'') {
                if FRENCH_ELISIONS.contains(&head) {
                    word = tail;
                } else if tail == "s" {
                    word = head;
                }
            }
            let word = word.trim_matches(|c| c == '\'' || c == '/');
            (!word.is_empty() && !is_stop_word(word, language)).then(|| word.to_string())
        })
        .collect()
}

fn is_stop_word(word: &str, language: Option<Language>) -> bool {
    match language {
        Some(Language::Fr) => FRENCH_STOP_WORDS.contains(&word),
        Some(Language::En) => ENGLISH_STOP_WORDS.contains(&word),
        None => FRENCH_STOP_WORDS.contains(&word) || ENGLISH_STOP_WORDS.contains(&word),
    }
}

fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'à' | 'â' | 'ä' | 'á' => out.push('a'),
            'ç' => out.push('c'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'î' | 'ï' | 'í' => out.push('i'),
            'ô' | 'ö' | 'ó' => out.push('o'),
            'ù' | 'û' | 'ü' | 'ú' => out.push('u'),
            'ÿ' => out.push('y'),
            'œ' => out.push_str("oe"),
            'æ' => out.push_str("ae"),
            '’' | 'ʼ' | '`' => out.push('\''),
            other => out.push(other),
        }
    }
    out
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedProvider {
    async fn embed_texts(
        &self,
        texts: &[String],
        language: Option<Language>,
    ) -> Result<EmbeddingResult> {
        validate_input(texts, self.max_input_length)?;
        let embeddings = texts
            .iter()
            .map(|text| self.embed_one(text, language))
            .collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        Self::PROVIDER_NAME
    }

    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn max_input_length(&self) -> usize {
        self.max_input_length
    }

    fn is_normalized(&self) -> bool {
        true
    }
}
