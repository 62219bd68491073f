//! xpa-retriever: retrieval core of the bilingual experiment assistant
//!
//! This crate turns a curated corpus of French and English documents into a
//! searchable vector index, persists it, and answers questions with the most
//! relevant passages and their provenance. Generation, curation and any web
//! surface live elsewhere; this crate stops at ranked passages.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Chunking strategy, indexing engine, vector index and retriever
//! - **[`storage`]**: Index artifact persistence with SQLite
//! - **[`config`]**: TOML configuration and embedder selection
//! - **[`corpus`]**: JSON Lines document reader
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xpa_embed::HashingEmbedProvider;
//! use xpa_retriever::retrieval::{
//!     indexing_engine::{IndexingEngine, IndexingEngineConfig},
//!     retriever::Retriever,
//! };
//! use xpa_retriever::storage::{IndexStore, SqliteIndexStore};
//!
//! # async fn example(documents: Vec<xpa_context::Document>) -> xpa_retriever::Result<()> {
//! let provider = Arc::new(HashingEmbedProvider::default());
//! let engine = IndexingEngine::new(IndexingEngineConfig::default(), provider.clone())?;
//!
//! let index = engine.index(&documents).await?;
//! SqliteIndexStore::new("xpa_index.sqlite").save(&index).await?;
//!
//! let retriever = Retriever::open("xpa_index.sqlite", provider).await?;
//! for hit in retriever.search("Qu'est-ce qu'un test A/B ?", 3).await? {
//!     println!("{} [{}] {:.3}", hit.title, hit.language, hit.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Documents → Chunking → Embeddings → VectorIndex → SqliteIndexStore
//!                                         ↓
//!                  question → Retriever → ranked passages
//! ```

pub mod config;
pub mod corpus;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use error::{Result, RetrieverError};
pub use retrieval::retriever::Retriever;
pub use retrieval::vector_index::{RetrievalResult, VectorIndex};
