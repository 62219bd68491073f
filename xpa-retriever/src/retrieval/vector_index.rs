//! In-memory vector index with exact cosine search.
//!
//! A [`VectorIndex`] holds every chunk of one corpus version together with its
//! embedding and attribution metadata. It is immutable once built: queries take
//! `&self`, so an index behind an `Arc` can serve any number of concurrent
//! searches. Rebuilding is the only way to change it.
//!
//! Entries are kept in canonical `(document_id, chunk_index)` order. Search
//! ranks by cosine similarity; scores are snapped to a grid of
//! [`SCORE_TOLERANCE`] so that near-equal scores compare equal and fall back to
//! the canonical order, which makes rankings reproducible across runs and
//! across a save/load cycle.

use crate::error::{Result, RetrieverError};
use crate::retrieval::chunking_strategy::ChunkingConfig;
use crate::storage::EmbeddingModelMetadata;
use half::f16;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use xpa_context::{Language, TextChunk};

/// Scores closer than this are treated as ties.
pub const SCORE_TOLERANCE: f64 = 1e-6;

/// Attribution carried by every indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub chunk_index: usize,
    pub title: String,
    pub language: Language,
    pub source_url: String,
}

/// One chunk as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub metadata: ChunkMetadata,
    /// Chunk text including its overlap prefix
    pub text: String,
    pub embedding: Vec<f16>,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &TextChunk, source_url: impl Into<String>, embedding: Vec<f16>) -> Self {
        Self {
            metadata: ChunkMetadata {
                document_id: chunk.document_id.clone(),
                chunk_index: chunk.chunk_index,
                title: chunk.title.clone(),
                language: chunk.language,
                source_url: source_url.into(),
            },
            text: chunk.chunk_text.clone(),
            embedding,
        }
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// 1-based position in the result list
    pub rank: usize,
    /// Cosine similarity, higher is more relevant
    pub score: f32,
    pub document_id: String,
    pub chunk_index: usize,
    pub title: String,
    pub language: Language,
    pub source_url: String,
    pub chunk_text: String,
}

impl RetrievalResult {
    /// First `max_chars` characters of the chunk on a single line.
    pub fn snippet(&self, max_chars: usize) -> String {
        let flat = self.chunk_text.split_whitespace().join(" ");
        match flat.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &flat[..cut]),
            None => flat,
        }
    }
}

/// Summary of an index, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub dimension: usize,
    pub chunks_per_language: BTreeMap<Language, usize>,
    pub model_id: String,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: EmbeddingModelMetadata,
    chunking: Option<ChunkingConfig>,
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
}

impl VectorIndex {
    /// Builds an index from embedded chunks, in any order.
    ///
    /// Fails on an empty input, on an embedding whose length differs from
    /// `model.dimension`, and on a repeated `(document_id, chunk_index)` pair.
    pub fn build(model: EmbeddingModelMetadata, mut entries: Vec<IndexEntry>) -> Result<Self> {
        if model.dimension == 0 {
            return Err(RetrieverError::invalid_config(
                "embedding model reports a dimension of zero",
            ));
        }
        if entries.is_empty() {
            return Err(RetrieverError::EmptyCorpus);
        }

        if let Some(bad) = entries
            .iter()
            .find(|entry| entry.embedding.len() != model.dimension)
        {
            return Err(RetrieverError::DimensionMismatch {
                expected: model.dimension,
                found: bad.embedding.len(),
                context: format!(
                    "chunk {} of document '{}'",
                    bad.metadata.chunk_index, bad.metadata.document_id
                ),
            });
        }

        entries.sort_by(|a, b| canonical_order(&a.metadata, &b.metadata));
        if let Some((a, _)) = entries
            .iter()
            .tuple_windows()
            .find(|(a, b)| canonical_order(&a.metadata, &b.metadata) == Ordering::Equal)
        {
            return Err(RetrieverError::DuplicateChunk {
                document_id: a.metadata.document_id.clone(),
                chunk_index: a.metadata.chunk_index,
            });
        }

        let norms = entries.iter().map(|entry| norm(&entry.embedding)).collect();

        Ok(Self {
            model,
            chunking: None,
            entries,
            norms,
        })
    }

    /// Records the chunking policy the entries went through.
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = Some(chunking);
        self
    }

    /// Ranks every chunk against a query vector and returns the best `k`.
    pub fn search_embedding(&self, query: &[f16], k: usize) -> Result<Vec<RetrievalResult>> {
        if query.len() != self.dimension() {
            return Err(RetrieverError::DimensionMismatch {
                expected: self.dimension(),
                found: query.len(),
                context: "query vector".to_string(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = norm(query);
        let mut scored: Vec<(i64, usize)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(position, (entry, &entry_norm))| {
                let score = cosine(query, query_norm, &entry.embedding, entry_norm);
                (quantize(score), position)
            })
            .collect();

        // Entries are stored in canonical order, so a smaller position means a
        // smaller (document_id, chunk_index).
        let ranking = |a: &(i64, usize), b: &(i64, usize)| b.0.cmp(&a.0).then(a.1.cmp(&b.1));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, ranking);
            scored.truncate(k);
        }
        scored.sort_unstable_by(ranking);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (key, position))| {
                let entry = &self.entries[position];
                RetrievalResult {
                    rank: i + 1,
                    score: dequantize(key),
                    document_id: entry.metadata.document_id.clone(),
                    chunk_index: entry.metadata.chunk_index,
                    title: entry.metadata.title.clone(),
                    language: entry.metadata.language,
                    source_url: entry.metadata.source_url.clone(),
                    chunk_text: entry.text.clone(),
                }
            })
            .collect())
    }

    /// Hex blake3 digest over the model id and every entry in canonical order.
    ///
    /// Two indexes with the same digest return the same results for every query.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        update_field(&mut hasher, self.model.model_id().as_bytes());
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            let meta = &entry.metadata;
            update_field(&mut hasher, meta.document_id.as_bytes());
            hasher.update(&(meta.chunk_index as u64).to_le_bytes());
            update_field(&mut hasher, meta.title.as_bytes());
            update_field(&mut hasher, meta.language.as_str().as_bytes());
            update_field(&mut hasher, meta.source_url.as_bytes());
            update_field(&mut hasher, entry.text.as_bytes());
            update_field(&mut hasher, bytemuck::cast_slice(entry.embedding.as_slice()));
        }
        hex::encode(hasher.finalize().as_bytes())
    }

    pub fn stats(&self) -> IndexStats {
        let chunks_per_language = self
            .entries
            .iter()
            .map(|entry| entry.metadata.language)
            .counts()
            .into_iter()
            .collect();

        IndexStats {
            document_count: self.document_count(),
            chunk_count: self.len(),
            dimension: self.dimension(),
            chunks_per_language,
            model_id: self.model.model_id(),
        }
    }

    pub fn model(&self) -> &EmbeddingModelMetadata {
        &self.model
    }

    pub fn chunking(&self) -> Option<&ChunkingConfig> {
        self.chunking.as_ref()
    }

    /// Entries in canonical `(document_id, chunk_index)` order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension
    }

    pub fn document_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| &entry.metadata.document_id)
            .dedup()
            .count()
    }
}

fn canonical_order(a: &ChunkMetadata, b: &ChunkMetadata) -> Ordering {
    a.document_id
        .cmp(&b.document_id)
        .then(a.chunk_index.cmp(&b.chunk_index))
}

fn update_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn norm(vector: &[f16]) -> f32 {
    vector
        .iter()
        .map(|v| {
            let v = v.to_f32();
            v * v
        })
        .sum::<f32>()
        .sqrt()
}

fn cosine(a: &[f16], a_norm: f32, b: &[f16], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x.to_f32() * y.to_f32()).sum();
    dot / (a_norm * b_norm)
}

fn quantize(score: f32) -> i64 {
    if score.is_finite() {
        (f64::from(score) / SCORE_TOLERANCE).round() as i64
    } else {
        i64::MIN
    }
}

fn dequantize(key: i64) -> f32 {
    if key == i64::MIN {
        f32::NEG_INFINITY
    } else {
        (key as f64 * SCORE_TOLERANCE) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(dimension: usize) -> EmbeddingModelMetadata {
        EmbeddingModelMetadata::new("test", "unit", "1", dimension)
    }

    fn entry(document_id: &str, chunk_index: usize, embedding: &[f32]) -> IndexEntry {
        IndexEntry {
            metadata: ChunkMetadata {
                document_id: document_id.to_string(),
                chunk_index,
                title: format!("Title of {document_id}"),
                language: if document_id.starts_with("fr") {
                    Language::Fr
                } else {
                    Language::En
                },
                source_url: format!("https://example.org/{document_id}"),
            },
            text: format!("{document_id} chunk {chunk_index}"),
            embedding: embedding.iter().copied().map(f16::from_f32).collect(),
        }
    }

    fn vector(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    #[test]
    fn test_search_orders_by_score() {
        let index = VectorIndex::build(
            model(2),
            vec![
                entry("en-a", 0, &[1.0, 0.0]),
                entry("en-b", 0, &[0.0, 1.0]),
                entry("en-c", 0, &[0.6, 0.8]),
            ],
        )
        .unwrap();

        let results = index.search_embedding(&vector(&[1.0, 0.0]), 3).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["en-a", "en-c", "en-b"]);
        assert_eq!(
            results.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!((results[0].score - 1.0).abs() < 1e-3);
        assert!(results[2].score.abs() < 1e-3);
    }

    #[test]
    fn test_ties_break_on_document_then_chunk() {
        let same = [0.5, 0.5];
        let index = VectorIndex::build(
            model(2),
            vec![
                entry("en-b", 1, &same),
                entry("en-a", 2, &same),
                entry("en-b", 0, &same),
                entry("en-a", 0, &same),
            ],
        )
        .unwrap();

        let results = index.search_embedding(&vector(&[1.0, 0.0]), 4).unwrap();
        let order: Vec<_> = results
            .iter()
            .map(|r| (r.document_id.as_str(), r.chunk_index))
            .collect();
        assert_eq!(
            order,
            vec![("en-a", 0), ("en-a", 2), ("en-b", 0), ("en-b", 1)]
        );

        let top_two = index.search_embedding(&vector(&[1.0, 0.0]), 2).unwrap();
        assert_eq!(top_two, results[..2].to_vec());
    }

    #[test]
    fn test_k_bounds() {
        let index = VectorIndex::build(
            model(2),
            vec![entry("en-a", 0, &[1.0, 0.0]), entry("fr-a", 0, &[0.0, 1.0])],
        )
        .unwrap();

        assert!(index.search_embedding(&vector(&[1.0, 1.0]), 0).unwrap().is_empty());
        assert_eq!(index.search_embedding(&vector(&[1.0, 1.0]), 10).unwrap().len(), 2);
    }

    #[test]
    fn test_build_rejects_bad_input() {
        assert!(matches!(
            VectorIndex::build(model(2), Vec::new()),
            Err(RetrieverError::EmptyCorpus)
        ));

        let err = VectorIndex::build(
            model(2),
            vec![entry("en-a", 0, &[1.0, 0.0]), entry("en-b", 3, &[1.0, 0.0, 0.0])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::DimensionMismatch {
                expected: 2,
                found: 3,
                ..
            }
        ));

        let err = VectorIndex::build(
            model(2),
            vec![entry("en-a", 1, &[1.0, 0.0]), entry("en-a", 1, &[0.0, 1.0])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::DuplicateChunk { chunk_index: 1, .. }
        ));
    }

    #[test]
    fn test_query_dimension_is_checked() {
        let index = VectorIndex::build(model(2), vec![entry("en-a", 0, &[1.0, 0.0])]).unwrap();
        assert!(matches!(
            index.search_embedding(&vector(&[1.0, 0.0, 0.0]), 1),
            Err(RetrieverError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_content_hash_ignores_insertion_order() {
        let a = VectorIndex::build(
            model(2),
            vec![entry("en-a", 0, &[1.0, 0.0]), entry("fr-a", 0, &[0.0, 1.0])],
        )
        .unwrap();
        let b = VectorIndex::build(
            model(2),
            vec![entry("fr-a", 0, &[0.0, 1.0]), entry("en-a", 0, &[1.0, 0.0])],
        )
        .unwrap();
        let c = VectorIndex::build(
            model(2),
            vec![entry("fr-a", 0, &[0.0, 1.0]), entry("en-a", 0, &[0.9, 0.1])],
        )
        .unwrap();

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_stats() {
        let index = VectorIndex::build(
            model(2),
            vec![
                entry("en-a", 0, &[1.0, 0.0]),
                entry("en-a", 1, &[1.0, 0.0]),
                entry("fr-a", 0, &[0.0, 1.0]),
            ],
        )
        .unwrap();

        let stats = index.stats();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.chunks_per_language[&Language::En], 2);
        assert_eq!(stats.chunks_per_language[&Language::Fr], 1);
        assert_eq!(stats.model_id, "test:unit:1:2:norm");
    }

    #[test]
    fn test_snippet() {
        let mut result = RetrievalResult {
            rank: 1,
            score: 0.5,
            document_id: "en-a".to_string(),
            chunk_index: 0,
            title: "A".to_string(),
            language: Language::En,
            source_url: String::new(),
            chunk_text: "A/B testing\n\ncompares two variants".to_string(),
        };
        assert_eq!(result.snippet(11), "A/B testing...");
        assert_eq!(result.snippet(200), "A/B testing compares two variants");

        result.chunk_text = "Épreuve".to_string();
        assert_eq!(result.snippet(3), "Épr...");
    }
}
