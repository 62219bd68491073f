//! SQLite artifact store for vector indexes
//!
//! Each index is written as one self-contained SQLite file. Saves go to a
//! temporary file in the staging directory (by default the destination's own
//! directory, so the final rename stays on one filesystem) and replace the
//! destination with a single rename once the transaction is committed and the
//! connection closed. Readers therefore see either the old artifact or the new
//! one, never a mix.
//!
//! ## Database Schema
//!
//! ```sql
//! -- Single row: layout version plus the JSON IndexManifest
//! CREATE TABLE manifest (
//!     id INTEGER PRIMARY KEY CHECK (id = 1),
//!     format_version INTEGER NOT NULL,
//!     body TEXT NOT NULL
//! );
//!
//! -- Attribution metadata, one row per chunk in canonical order
//! CREATE TABLE chunks (
//!     position INTEGER PRIMARY KEY,
//!     document_id TEXT NOT NULL,
//!     chunk_index INTEGER NOT NULL,
//!     title TEXT NOT NULL,
//!     language TEXT NOT NULL,
//!     source_url TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     UNIQUE (document_id, chunk_index)
//! );
//!
//! -- f16 embedding blobs keyed like chunks
//! CREATE TABLE vectors (
//!     position INTEGER PRIMARY KEY REFERENCES chunks(position),
//!     embedding BLOB NOT NULL
//! );
//! ```
//!
//! Loading re-validates everything against the manifest, including the blake3
//! content hash, and fails with [`RetrieverError::IndexLoad`] rather than
//! returning a partial index.

use super::{EmbeddingModelMetadata, FORMAT_VERSION, IndexManifest, IndexStore};
use crate::error::{Result, RetrieverError};
use crate::retrieval::vector_index::{ChunkMetadata, IndexEntry, VectorIndex};
use async_trait::async_trait;
use half::f16;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xpa_context::Language;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE manifest (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        format_version INTEGER NOT NULL,
        body TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE chunks (
        position INTEGER PRIMARY KEY,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        title TEXT NOT NULL,
        language TEXT NOT NULL,
        source_url TEXT NOT NULL,
        content TEXT NOT NULL,
        CONSTRAINT unique_chunk UNIQUE (document_id, chunk_index)
    )
    "#,
    r#"
    CREATE TABLE vectors (
        position INTEGER PRIMARY KEY,
        embedding BLOB NOT NULL,
        FOREIGN KEY (position) REFERENCES chunks(position)
    )
    "#,
];

/// Index persistence in a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteIndexStore {
    path: PathBuf,
    staging_dir: Option<PathBuf>,
}

impl SqliteIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            staging_dir: None,
        }
    }

    /// Write temporary files to `dir` instead of next to the artifact.
    ///
    /// `dir` must be on the same filesystem as the artifact for the final
    /// rename to be atomic.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_dir(&self) -> PathBuf {
        if let Some(dir) = &self.staging_dir {
            return dir.clone();
        }
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    async fn open_read_only(&self) -> Result<SqlitePool> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| RetrieverError::index_load(&self.path, e.to_string()))?;
        if !exists {
            return Err(RetrieverError::index_load(&self.path, "file does not exist"));
        }
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&self.path)
                    .read_only(true)
                    .create_if_missing(false),
            )
            .await
            .map_err(|e| RetrieverError::index_load(&self.path, e.to_string()))
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn save(&self, index: &VectorIndex) -> Result<IndexManifest> {
        let manifest = IndexManifest::for_index(index);
        let staging_dir = self.staging_dir();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RetrieverError::index_save(&self.path, e))?;
        }

        // Removed on drop unless persisted.
        let temp_path = tempfile::Builder::new()
            .prefix(".xpa-index-")
            .suffix(".tmp")
            .tempfile_in(&staging_dir)
            .map_err(|e| RetrieverError::index_save(&self.path, e))?
            .into_temp_path();
        debug!("Writing index to staging file {}", temp_path.display());

        write_artifact(&temp_path, index, &manifest)
            .await
            .map_err(|e| RetrieverError::index_save(&self.path, e))?;

        temp_path
            .persist(&self.path)
            .map_err(|e| RetrieverError::index_save(&self.path, e.error))?;

        info!(
            "Saved index with {} chunks from {} documents to {}",
            manifest.chunk_count,
            manifest.document_count,
            self.path.display()
        );
        Ok(manifest)
    }

    async fn load(&self, expected_model: &EmbeddingModelMetadata) -> Result<VectorIndex> {
        let pool = self.open_read_only().await?;
        let result = read_index(&pool, expected_model).await;
        pool.close().await;

        let index = result.map_err(|reason| RetrieverError::index_load(&self.path, reason))?;
        info!(
            "Loaded index with {} chunks ({}) from {}",
            index.len(),
            index.model().model_id(),
            self.path.display()
        );
        Ok(index)
    }

    async fn manifest(&self) -> Result<IndexManifest> {
        let pool = self.open_read_only().await?;
        let result = read_manifest(&pool).await;
        pool.close().await;
        result.map_err(|reason| RetrieverError::index_load(&self.path, reason))
    }
}

async fn write_artifact(
    path: &Path,
    index: &VectorIndex,
    manifest: &IndexManifest,
) -> std::result::Result<(), BoxError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Delete)
                .synchronous(SqliteSynchronous::Full)
                .foreign_keys(true),
        )
        .await?;

    let result = insert_all(&pool, index, manifest).await;
    pool.close().await;
    result
}

async fn insert_all(
    pool: &SqlitePool,
    index: &VectorIndex,
    manifest: &IndexManifest,
) -> std::result::Result<(), BoxError> {
    let body = serde_json::to_string(manifest)?;
    let mut tx = pool.begin().await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    sqlx::query("INSERT INTO manifest (id, format_version, body) VALUES (1, ?, ?)")
        .bind(FORMAT_VERSION)
        .bind(body.as_str())
        .execute(&mut *tx)
        .await?;

    for (position, entry) in index.entries().iter().enumerate() {
        let position = i64::try_from(position)?;
        let meta = &entry.metadata;

        sqlx::query(
            "INSERT INTO chunks (position, document_id, chunk_index, title, language, source_url, content)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(position)
        .bind(meta.document_id.as_str())
        .bind(i64::try_from(meta.chunk_index)?)
        .bind(meta.title.as_str())
        .bind(meta.language.as_str())
        .bind(meta.source_url.as_str())
        .bind(entry.text.as_str())
        .execute(&mut *tx)
        .await?;

        let blob: &[u8] = bytemuck::cast_slice(entry.embedding.as_slice());
        sqlx::query("INSERT INTO vectors (position, embedding) VALUES (?, ?)")
            .bind(position)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn read_manifest(pool: &SqlitePool) -> std::result::Result<IndexManifest, String> {
    let row = sqlx::query("SELECT format_version, body FROM manifest WHERE id = 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("manifest row is missing")?;

    let format_version: i64 = row.try_get("format_version").map_err(|e| e.to_string())?;
    if format_version != FORMAT_VERSION {
        return Err(format!(
            "unsupported format version {format_version}, expected {FORMAT_VERSION}"
        ));
    }

    let body: String = row.try_get("body").map_err(|e| e.to_string())?;
    let manifest: IndexManifest =
        serde_json::from_str(&body).map_err(|e| format!("invalid manifest: {e}"))?;
    if manifest.format_version != format_version {
        return Err("manifest body disagrees with its format version".to_string());
    }
    Ok(manifest)
}

async fn read_index(
    pool: &SqlitePool,
    expected_model: &EmbeddingModelMetadata,
) -> std::result::Result<VectorIndex, String> {
    let manifest = read_manifest(pool).await?;

    let index_model = manifest.embedding_model.model_id();
    if index_model != expected_model.model_id() {
        return Err(format!(
            "index was built with model '{index_model}', expected '{}'",
            expected_model.model_id()
        ));
    }

    let dimension = manifest.embedding_model.dimension;
    let rows = sqlx::query(
        "SELECT c.position, c.document_id, c.chunk_index, c.title, c.language, c.source_url,
                c.content, v.embedding
         FROM chunks c LEFT JOIN vectors v ON v.position = c.position
         ORDER BY c.position",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| e.to_string())?;

    let vector_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
        .fetch_one(pool)
        .await
        .map_err(|e| e.to_string())?;

    if rows.len() != manifest.chunk_count || usize::try_from(vector_count).ok() != Some(rows.len())
    {
        return Err(format!(
            "manifest lists {} chunks but the file holds {} chunks and {} vectors",
            manifest.chunk_count,
            rows.len(),
            vector_count
        ));
    }

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let position: i64 = row.try_get("position").map_err(|e| e.to_string())?;
        let chunk_index: i64 = row.try_get("chunk_index").map_err(|e| e.to_string())?;
        let language: String = row.try_get("language").map_err(|e| e.to_string())?;
        let blob: Option<Vec<u8>> = row.try_get("embedding").map_err(|e| e.to_string())?;

        let blob = blob.ok_or_else(|| format!("chunk at position {position} has no vector"))?;
        if blob.len() != dimension * 2 {
            return Err(format!(
                "vector at position {position} is {} bytes, expected {}",
                blob.len(),
                dimension * 2
            ));
        }

        let metadata = ChunkMetadata {
            document_id: row.try_get("document_id").map_err(|e| e.to_string())?,
            chunk_index: usize::try_from(chunk_index)
                .map_err(|_| format!("negative chunk index at position {position}"))?,
            title: row.try_get("title").map_err(|e| e.to_string())?,
            language: language
                .parse::<Language>()
                .map_err(|e| format!("position {position}: {e}"))?,
            source_url: row.try_get("source_url").map_err(|e| e.to_string())?,
        };

        entries.push(IndexEntry {
            metadata,
            text: row.try_get("content").map_err(|e| e.to_string())?,
            embedding: decode_embedding(&blob),
        });
    }

    let mut index = VectorIndex::build(manifest.embedding_model.clone(), entries)
        .map_err(|e| e.to_string())?;
    if let Some(chunking) = manifest.chunking.clone() {
        index = index.with_chunking(chunking);
    }

    if index.document_count() != manifest.document_count || index.dimension() != manifest.dimension
    {
        return Err("document count or dimension disagrees with the manifest".to_string());
    }
    if index.content_hash() != manifest.content_hash {
        return Err("content hash does not match the manifest".to_string());
    }

    Ok(index)
}

/// Blobs come back from SQLite without any alignment guarantee, so they are
/// decoded element by element.
fn decode_embedding(bytes: &[u8]) -> Vec<f16> {
    bytes
        .chunks_exact(2)
        .map(|pair| f16::from_ne_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn model() -> EmbeddingModelMetadata {
        EmbeddingModelMetadata::new("test", "unit", "1", 3)
    }

    fn sample_index() -> VectorIndex {
        let entry = |id: &str, chunk_index: usize, language: Language, values: [f32; 3]| IndexEntry {
            metadata: ChunkMetadata {
                document_id: id.to_string(),
                chunk_index,
                title: format!("{id} title"),
                language,
                source_url: format!("https://example.org/{id}"),
            },
            text: format!("text of {id} #{chunk_index}"),
            embedding: values.iter().copied().map(f16::from_f32).collect(),
        };

        VectorIndex::build(
            model(),
            vec![
                entry("ab-testing", 0, Language::En, [0.1, 0.2, 0.3]),
                entry("ab-testing", 1, Language::En, [0.3, 0.2, 0.1]),
                entry("test-ab", 0, Language::Fr, [0.4, 0.5, 0.6]),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = SqliteIndexStore::new(temp_dir.path().join("nested").join("index.sqlite"));
        let index = sample_index();

        let manifest = store.save(&index).await?;
        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(manifest.document_count, 2);
        assert_eq!(manifest.format_version, FORMAT_VERSION);

        let loaded = store.load(&model()).await?;
        assert_eq!(loaded.entries(), index.entries());
        assert_eq!(loaded.content_hash(), index.content_hash());

        let read_back = store.manifest().await?;
        assert_eq!(read_back, manifest);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_replaces_previous_artifact() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = SqliteIndexStore::new(temp_dir.path().join("index.sqlite"));

        store.save(&sample_index()).await?;
        let smaller = VectorIndex::build(model(), sample_index().entries()[..1].to_vec())?;
        store.save(&smaller).await?;

        assert_eq!(store.load(&model()).await?.len(), 1);

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteIndexStore::new(temp_dir.path().join("absent.sqlite"));

        let err = store.load(&model()).await.unwrap_err();
        assert!(matches!(err, RetrieverError::IndexLoad { .. }));
        assert!(err.requires_rebuild());
    }

    #[tokio::test]
    async fn test_load_unreachable_path() {
        let temp_dir = tempdir().unwrap();
        let not_a_dir = temp_dir.path().join("corpus.jsonl");
        std::fs::write(&not_a_dir, "{}").unwrap();
        let store = SqliteIndexStore::new(not_a_dir.join("index.sqlite"));

        let err = store.load(&model()).await.unwrap_err();
        assert!(matches!(err, RetrieverError::IndexLoad { .. }), "got {err:?}");
        assert!(err.requires_rebuild());

        let err = store.manifest().await.unwrap_err();
        assert!(matches!(err, RetrieverError::IndexLoad { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_load_rejects_other_model() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = SqliteIndexStore::new(temp_dir.path().join("index.sqlite"));
        store.save(&sample_index()).await?;

        let other = EmbeddingModelMetadata::new("test", "unit", "2", 3);
        let err = store.load(&other).await.unwrap_err();
        match err {
            RetrieverError::IndexLoad { reason, .. } => assert!(reason.contains("test:unit:1:3:norm")),
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_artifact() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("index.sqlite");
        SqliteIndexStore::new(&path).save(&sample_index()).await?;

        let broken = SqliteIndexStore::new(&path).with_staging_dir(temp_dir.path().join("missing"));
        let smaller = VectorIndex::build(model(), sample_index().entries()[..1].to_vec())?;
        let err = broken.save(&smaller).await.unwrap_err();
        assert!(matches!(err, RetrieverError::IndexSave { .. }));

        let loaded = SqliteIndexStore::new(&path).load(&model()).await?;
        assert_eq!(loaded.len(), 3);
        Ok(())
    }

    #[test]
    fn test_decode_embedding() {
        let values = vec![f16::from_f32(0.5), f16::from_f32(-1.25)];
        let bytes: &[u8] = bytemuck::cast_slice(values.as_slice());
        assert_eq!(decode_embedding(bytes), values);
    }
}
