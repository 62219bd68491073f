//! Reading curated documents from JSON Lines.
//!
//! Each non-blank line is one [`Document`] record. Fields the retriever does
//! not use (`source_type`, `year`, `topics`, ...) are ignored, and `url` is
//! accepted in place of `source_url`.

use crate::error::{Result, RetrieverError};
use std::path::Path;
use tracing::info;
use xpa_context::Document;

pub async fn read_documents_jsonl(path: &Path) -> Result<Vec<Document>> {
    let content = tokio::fs::read_to_string(path).await?;
    let documents = parse_documents_jsonl(&content, path)?;
    info!("Read {} documents from {}", documents.len(), path.display());
    Ok(documents)
}

/// Parses JSON Lines content. `path` is only used in error messages.
pub fn parse_documents_jsonl(content: &str, path: &Path) -> Result<Vec<Document>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<Document>(line).map_err(|e| RetrieverError::Corpus {
                path: path.to_path_buf(),
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}
