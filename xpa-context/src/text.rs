//! Turns documents into bounded, overlapping passages for the embedder.
//!
//! Chunking happens in three steps:
//!
//! 1. [`normalize_text`] makes whitespace canonical so that the same article
//!    always yields the same byte sequence, whatever editor or scraper it
//!    went through.
//! 2. The normalized text is split recursively on a list of delimiters, from
//!    the most significant (paragraph breaks) to the least significant (any
//!    whitespace). A piece keeps the delimiter that ends it, so sentences stay
//!    whole and no piece starts with punctuation. Only when no delimiter is
//!    left does the splitter cut inside a word, and then always on a character
//!    boundary.
//! 3. Pieces are packed greedily into chunks. Every chunk after the first is
//!    prefixed with the tail of the text before it (at most `chunk_overlap`
//!    bytes, starting on a word) so that a thought cut at a boundary is still
//!    visible on both sides.
//!
//! The part of a chunk that is not overlap is its *own* text. Concatenating the
//! own text of every chunk of a document in order gives back the normalized
//! document exactly.
//!
//! ```
//! use xpa_context::{Document, Language, TextContextBuilder, normalize_text};
//!
//! let builder = TextContextBuilder::with_limits(120, 30).unwrap();
//! let doc = Document::new(
//!     "wiki::en::A/B testing",
//!     "A/B testing",
//!     Language::En,
//!     "A/B testing compares two variants of a page.\n\n\
//!      Users are randomly assigned to a variant. The conversion rates are \
//!      then compared with a statistical test. A sequential design allows \
//!      stopping early.",
//!     "https://en.wikipedia.org/wiki/A/B_testing",
//! );
//!
//! let chunks = builder.chunk_document(&doc);
//! assert!(chunks.len() > 1);
//!
//! let own: String = chunks.iter().map(|c| c.own_text()).collect();
//! assert_eq!(own, normalize_text(&doc.text));
//! for chunk in &chunks {
//!     assert!(chunk.chunk_text.len() <= 120);
//! }
//! ```
use crate::document::{Document, Language};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::LazyLock;

/// Default budget for a whole chunk, overlap included, in bytes.
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 900;

/// Default amount of preceding text repeated at the start of a chunk, in bytes.
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Delimiters for encyclopedic prose, most significant first.
///
/// - `\n{2,}`: paragraph breaks
/// - `\n`: line breaks (list items, headings)
/// - sentence ends, including French `…` and closing quotes or brackets
/// - clause separators `;` and `:`
/// - commas
/// - any whitespace
pub const PROSE_DELIMITERS: &[&str] = &[
    r"\n{2,}",
    r"\n",
    r#"[.!?…]+["'»”’)\]]*\s+"#,
    r"[;:]\s+",
    r",\s+",
    r"\s+",
];

static HORIZONTAL_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("static pattern"));
static EXTRA_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static pattern"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkingError {
    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid delimiter pattern '{pattern}': {reason}")]
    InvalidDelimiter { pattern: String, reason: String },
}

/// Canonical form of a document body.
///
/// Line endings become `\n`, runs of horizontal whitespace (including the
/// non-breaking spaces French typography puts before `:` and `?`) become a
/// single space, lines are trimmed, more than one blank line becomes a single
/// paragraph break, and the whole text is trimmed.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| HORIZONTAL_WHITESPACE.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    EXTRA_NEWLINES.replace_all(&joined, "\n\n").trim().to_string()
}

/// Splits documents into [`TextChunk`]s.
///
/// Holds the compiled delimiters and the size limits. Building one is cheap
/// enough to do per corpus, and chunking never mutates it, so a single builder
/// can be shared across threads.
#[derive(Debug, Clone)]
pub struct TextContextBuilder {
    delimiters: Vec<Regex>,
    max_chunk_length: usize,
    chunk_overlap: usize,
}

/// A contiguous slice of a document's normalized text, ready to embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub document_id: String,
    pub title: String,
    pub language: Language,
    /// Position of this chunk within its document (0-indexed).
    pub chunk_index: usize,
    /// Overlap prefix followed by the chunk's own text.
    pub chunk_text: String,
    /// Number of leading bytes of `chunk_text` repeated from the previous chunk.
    pub overlap_len: usize,
    /// Byte range of the own text inside the normalized document.
    pub span: Range<usize>,
}

impl TextContextBuilder {
    /// Creates a builder from delimiter patterns and limits (both in bytes).
    ///
    /// Fails if a pattern does not compile, if `max_chunk_length` is zero, or if
    /// the overlap would take more than half of a chunk.
    pub fn new(
        delimiter_patterns: &[&str],
        max_chunk_length: usize,
        chunk_overlap: usize,
    ) -> Result<Self, ChunkingError> {
        validate_limits(max_chunk_length, chunk_overlap)?;

        let delimiters = delimiter_patterns
            .iter()
            .map(|&pattern| {
                Regex::new(pattern).map_err(|e| ChunkingError::InvalidDelimiter {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            delimiters,
            max_chunk_length,
            chunk_overlap,
        })
    }

    /// Prose delimiters with the given limits.
    pub fn with_limits(max_chunk_length: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        Self::new(PROSE_DELIMITERS, max_chunk_length, chunk_overlap)
    }

    /// Prose delimiters, 900-byte chunks, 150-byte overlap.
    pub fn with_defaults() -> Self {
        let delimiters = PROSE_DELIMITERS
            .iter()
            .map(|&pattern| Regex::new(pattern).expect("prose delimiters are valid"))
            .collect();
        Self {
            delimiters,
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }

    pub fn max_chunk_length(&self) -> usize {
        self.max_chunk_length
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Chunks a document.
    ///
    /// A document whose normalized text fits in `max_chunk_length` yields
    /// exactly one chunk holding the whole text, even when that text is empty.
    pub fn chunk_document(&self, document: &Document) -> Vec<TextChunk> {
        let normalized = normalize_text(&document.text);
        let spans = self.pack_spans(&normalized);

        spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| {
                let start = if chunk_index == 0 {
                    span.start
                } else {
                    overlap_start(&normalized, span.start, self.chunk_overlap)
                };
                TextChunk {
                    document_id: document.id.clone(),
                    title: document.title.clone(),
                    language: document.language,
                    chunk_index,
                    chunk_text: normalized[start..span.end].to_string(),
                    overlap_len: span.start - start,
                    span,
                }
            })
            .collect()
    }

    /// Byte ranges of the own text of each chunk, covering `text` exactly.
    pub fn pack_spans(&self, text: &str) -> Vec<Range<usize>> {
        if text.len() <= self.max_chunk_length {
            return vec![0..text.len()];
        }

        let budget = self.max_chunk_length - self.chunk_overlap;
        let segments = self.split_recursively_into_segments(text, 0, budget, 0);

        let mut spans: Vec<Range<usize>> = Vec::new();
        let mut current: Option<Range<usize>> = None;

        for segment in segments {
            current = match current {
                Some(open) if segment.end - open.start > budget => {
                    spans.push(open);
                    Some(segment)
                }
                Some(open) => Some(open.start..segment.end),
                None => Some(segment),
            };
        }
        spans.extend(current);

        spans
    }

    // Returns consecutive ranges (offsets into the full text) that each fit in
    // `budget`, except single characters wider than the budget itself.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        budget: usize,
        offset: usize,
    ) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }

        if text.len() <= budget {
            return vec![offset..offset + text.len()];
        }

        let Some(delimiter) = self.delimiters.get(delimiter_idx) else {
            return split_on_char_boundaries(text, budget, offset);
        };

        let mut pieces: Vec<Range<usize>> = Vec::new();
        let mut piece_start = 0;
        for mat in delimiter.find_iter(text) {
            if mat.end() > piece_start {
                pieces.push(piece_start..mat.end());
                piece_start = mat.end();
            }
        }
        if piece_start < text.len() {
            pieces.push(piece_start..text.len());
        }

        pieces
            .into_iter()
            .flat_map(|piece| {
                self.split_recursively_into_segments(
                    &text[piece.clone()],
                    delimiter_idx + 1,
                    budget,
                    offset + piece.start,
                )
            })
            .collect()
    }
}

impl Default for TextContextBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn validate_limits(max_chunk_length: usize, chunk_overlap: usize) -> Result<(), ChunkingError> {
    if max_chunk_length == 0 {
        return Err(ChunkingError::InvalidConfig(
            "max_chunk_length must be greater than zero".to_string(),
        ));
    }
    if chunk_overlap.saturating_mul(2) > max_chunk_length {
        return Err(ChunkingError::InvalidConfig(format!(
            "chunk_overlap ({chunk_overlap}) must be at most half of max_chunk_length ({max_chunk_length})"
        )));
    }
    Ok(())
}

fn split_on_char_boundaries(text: &str, budget: usize, offset: usize) -> Vec<Range<usize>> {
    let mut segments = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + budget).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character wider than the budget still has to go somewhere.
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        segments.push(offset + start..offset + end);
        start = end;
    }
    segments
}

// Start of the overlap prefix for a chunk whose own text begins at `span_start`.
fn overlap_start(text: &str, span_start: usize, overlap: usize) -> usize {
    if overlap == 0 || span_start == 0 {
        return span_start;
    }

    let mut start = span_start.saturating_sub(overlap);
    while !text.is_char_boundary(start) {
        start += 1;
    }

    let mid_word = text[..start]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace());
    if mid_word {
        // Text without any whitespace (URLs, formulas) keeps the cut as is.
        if let Some(pos) = text[start..span_start].find(char::is_whitespace) {
            start += pos;
        }
    }

    span_start - text[start..span_start].trim_start().len()
}

impl TextChunk {
    /// The part of the chunk that is not repeated from the previous one.
    pub fn own_text(&self) -> &str {
        &self.chunk_text[self.overlap_len..]
    }

    /// Text handed to the embedder: the document title, a blank line, then the chunk.
    ///
    /// An empty chunk renders as an empty passage so that the embedder rejects
    /// it instead of indexing a title with no content.
    pub fn passage(&self) -> String {
        if self.chunk_text.is_empty() || self.title.trim().is_empty() {
            self.chunk_text.clone()
        } else {
            format!("{}\n\n{}", self.title, self.chunk_text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(text: &str) -> Document {
        Document::new("doc-1", "Title", Language::En, text, "https://example.org")
    }

    fn reconstruct(chunks: &[TextChunk]) -> String {
        chunks.iter().map(|c| c.own_text()).collect()
    }

    #[test]
    fn test_normalize_text() {
        let raw = "  Le test A/B\u{a0}:  une   méthode.\r\n\r\n\r\n\r\nDeuxième\tparagraphe.  \n";
        assert_eq!(
            normalize_text(raw),
            "Le test A/B : une méthode.\n\nDeuxième paragraphe."
        );
        assert_eq!(normalize_text(" \n\t "), "");
    }

    #[test]
    fn test_get_chunks_basic() {
        let text = (0..100)
            .map(|_| "This is a test sentence. ")
            .collect::<String>();
        let builder = TextContextBuilder::with_limits(500, 100).unwrap();
        let chunks = builder.chunk_document(&doc(&text));

        let normalized = normalize_text(&text);
        // About 2500 bytes with a 400-byte budget per chunk.
        assert!(chunks.len() >= normalized.len() / 400);
        assert!(chunks.len() <= normalized.len() / 400 + 2);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.document_id, "doc-1");
            assert!(chunk.chunk_text.len() <= 500);
            assert!(chunk.overlap_len <= 100);
            // Sentences are never severed.
            assert!(chunk.own_text().starts_with("This"));
        }
        assert_eq!(chunks[0].overlap_len, 0);
        assert!(chunks[1].overlap_len > 0);
        assert_eq!(reconstruct(&chunks), normalized);
    }

    #[test]
    fn test_get_chunks_single_chunk() {
        let text = "A very short article.";
        let builder = TextContextBuilder::default();
        assert_eq!(builder.max_chunk_length(), DEFAULT_MAX_CHUNK_LENGTH);
        assert_eq!(builder.chunk_overlap(), DEFAULT_CHUNK_OVERLAP);
        let chunks = builder.chunk_document(&doc(text));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, text);
        assert_eq!(chunks[0].span, 0..text.len());
        assert_eq!(chunks[0].passage(), "Title\n\nA very short article.");
    }

    #[test]
    fn test_get_chunks_empty_content() {
        let chunks = TextContextBuilder::default().chunk_document(&doc("   "));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, "");
        assert_eq!(chunks[0].passage(), "");
    }

    #[test]
    fn test_paragraphs_are_preferred_boundaries() {
        let first = "Premier paragraphe sur la puissance statistique. ".repeat(3);
        let second = "Second paragraph about sequential testing. ".repeat(3);
        let text = format!("{}\n\n{}", first.trim(), second.trim());
        let builder = TextContextBuilder::with_limits(200, 0).unwrap();

        let chunks = builder.chunk_document(&doc(&text));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chunk_text.starts_with("Premier"));
        assert!(chunks[0].chunk_text.ends_with("\n\n"));
        assert!(chunks[1].chunk_text.starts_with("Second"));
    }

    #[test]
    fn test_overlap_starts_on_a_word() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi";
        let builder = TextContextBuilder::with_limits(30, 12).unwrap();
        let chunks = builder.chunk_document(&doc(text));

        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let overlap = &pair[1].chunk_text[..pair[1].overlap_len];
            assert!(pair[0].chunk_text.ends_with(overlap));
            assert!(!overlap.starts_with(' '));
            let words: Vec<&str> = text.split(' ').collect();
            if let Some(word) = overlap.split(' ').next().filter(|w| !w.is_empty()) {
                assert!(words.contains(&word));
            }
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_long_word_is_split_on_char_boundaries() {
        let text = "é".repeat(50);
        let builder = TextContextBuilder::with_limits(15, 0).unwrap();
        let chunks = builder.chunk_document(&doc(&text));

        assert!(chunks.iter().all(|c| c.chunk_text.len() <= 15));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "Bandits manchots. ".repeat(200);
        let builder = TextContextBuilder::default();
        assert_eq!(
            builder.chunk_document(&doc(&text)),
            builder.chunk_document(&doc(&text))
        );
    }

    #[test]
    fn test_invalid_limits() {
        assert!(matches!(
            TextContextBuilder::with_limits(0, 0),
            Err(ChunkingError::InvalidConfig(_))
        ));
        assert!(matches!(
            TextContextBuilder::with_limits(100, 60),
            Err(ChunkingError::InvalidConfig(_))
        ));
        assert!(matches!(
            TextContextBuilder::new(&["("], 100, 10),
            Err(ChunkingError::InvalidDelimiter { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_own_text_covers_normalized_document(
            text in "[a-zA-Zàéèç ,.;:?!\n]{0,2000}",
            max_chunk_length in 16usize..400,
            overlap_ratio in 0usize..=50,
        ) {
            let chunk_overlap = max_chunk_length * overlap_ratio / 100;
            let builder = TextContextBuilder::with_limits(max_chunk_length, chunk_overlap).unwrap();
            let chunks = builder.chunk_document(&doc(&text));

            prop_assert!(!chunks.is_empty());
            prop_assert_eq!(reconstruct(&chunks), normalize_text(&text));
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.chunk_index, i);
                prop_assert!(chunk.chunk_text.len() <= max_chunk_length);
                prop_assert!(chunk.overlap_len <= chunk_overlap);
            }
        }
    }
}
