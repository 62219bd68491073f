//! # xpa-embed
//!
//! Text embeddings for the experiment assistant's retrieval core.
//!
//! Everything that turns text into vectors goes through the
//! [`EmbeddingProvider`] trait. Two providers ship with the crate:
//!
//! - [`FastEmbedProvider`] runs a multilingual sentence model locally through
//!   ONNX (default `paraphrase-multilingual-MiniLM-L12-v2`), so that a French
//!   question and an English passage with the same meaning end up close.
//! - [`HashingEmbedProvider`] hashes words and character trigrams. It needs no
//!   model download and is bit-for-bit deterministic, which makes it the
//!   embedder of choice for tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use xpa_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//! use xpa_context::Language;
//!
//! # async fn example() -> xpa_embed::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let texts = vec!["What is A/B testing?".to_string()];
//! let result = provider.embed_texts(&texts, Some(Language::En)).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Input rules
//!
//! Empty inputs and inputs over the provider's `max_input_length` fail with
//! [`EmbedError::EmptyInput`] and [`EmbedError::InputTooLong`]. The FastEmbed
//! provider also tokenizes every input and fails with
//! [`EmbedError::TooManyTokens`] when the model would have cut it. Providers
//! never truncate: an over-long chunk means the chunker is misconfigured, and
//! the caller has to know.
//!
//! ## Memory Usage
//!
//! Embeddings are stored as half-precision (f16) values. Models are cached
//! globally so that several providers with the same configuration share one
//! loaded instance.

pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

pub use config::{DEFAULT_MODEL_NAME, EmbedConfig, EmbedConfigBuilder};
pub use error::{EmbedError, Result};
pub use hashing::{DEFAULT_HASHING_DIMENSION, HashingEmbedProvider};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
