//! Documents, languages and the chunking policy for the experiment assistant.

pub mod document;
pub mod text;

pub use document::{Document, Language, ParseLanguageError};
pub use text::{
    ChunkingError, DEFAULT_CHUNK_OVERLAP, DEFAULT_MAX_CHUNK_LENGTH, PROSE_DELIMITERS,
    TextChunk, TextContextBuilder, normalize_text,
};
