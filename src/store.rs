//! Versioned on-disk persistence of knowledge-base snapshots.
//!
//! # Layout
//!
//! ```text
//! <index.dir>/
//!   CURRENT                      name of the published version
//!   versions/<version>/index.sqlite
//! ```
//!
//! A build writes a complete new version directory, then replaces
//! `CURRENT` with a write-to-temp-and-rename, then prunes old versions.
//! A crash at any point leaves `CURRENT` naming a complete version.
//!
//! Loading reads the metadata row first and checks the embedding-model
//! identity before any entry is read.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use qa_harness_core::embedding::{blob_to_vec, vec_to_blob, Embedder};
use qa_harness_core::index::{IndexEntry, IndexMetadata, VectorIndex};
use qa_harness_core::models::{CharSpan, Chunk, FormatKind, SelectorMap};
use qa_harness_core::{QaError, Result};

use crate::db;
use crate::migrate::{self, SCHEMA_VERSION};
use crate::models::{BuildStatus, KnowledgeBase, SourceStatus};

const CURRENT_FILE: &str = "CURRENT";
const VERSIONS_DIR: &str = "versions";
const DB_FILE: &str = "index.sqlite";

static VERSION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Summary of a persisted version, read without an embedder.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub version: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub metadata: IndexMetadata,
    pub sources: Vec<SourceStatus>,
    pub selector_count: usize,
    pub markup_source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
    keep_versions: usize,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>, keep_versions: usize) -> Self {
        Self {
            root: root.into(),
            keep_versions: keep_versions.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collision-free version name that sorts in creation order.
    ///
    /// `<UTC millis>-<sequence>-<random>`: the process-wide sequence orders
    /// versions created within the same millisecond.
    pub fn new_version_id() -> String {
        let sequence = VERSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{:06}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            sequence % 1_000_000,
            &suffix[..8]
        )
    }

    pub fn version_path(&self, version: &str) -> PathBuf {
        self.root.join(VERSIONS_DIR).join(version).join(DB_FILE)
    }

    /// Name of the published version, if any.
    pub fn current_version(&self) -> Result<Option<String>> {
        let path = self.root.join(CURRENT_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let version = content.trim().to_string();
                if version.is_empty() {
                    return Err(QaError::corrupt(&path, "CURRENT is empty"));
                }
                Ok(Some(version))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QaError::storage(&path, e)),
        }
    }

    /// Write `kb` as a new version and make it current.
    pub async fn publish(&self, kb: &KnowledgeBase) -> Result<()> {
        let path = self.version_path(&kb.version);
        if path.exists() {
            return Err(QaError::storage(&path, "version already exists"));
        }

        let pool = db::connect(&path, true)
            .await
            .map_err(|e| QaError::storage(&path, format!("{:#}", e)))?;
        let written = write_snapshot(&pool, kb).await;
        pool.close().await;
        written.map_err(|e| QaError::storage(&path, format!("{:#}", e)))?;

        self.swap_current(&kb.version)?;
        info!(version = %kb.version, chunks = kb.index.len(), "published index version");
        self.prune(&kb.version);
        Ok(())
    }

    fn swap_current(&self, version: &str) -> Result<()> {
        let current = self.root.join(CURRENT_FILE);
        let tmp = self.root.join(format!("{}.tmp-{}", CURRENT_FILE, version));
        std::fs::write(&tmp, format!("{}\n", version)).map_err(|e| QaError::storage(&tmp, e))?;
        std::fs::rename(&tmp, &current).map_err(|e| QaError::storage(&current, e))?;
        Ok(())
    }

    /// Remove the oldest versions beyond `keep_versions`, never `current`.
    fn prune(&self, current: &str) {
        let dir = self.root.join(VERSIONS_DIR);
        let mut versions: Vec<String> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "could not list index versions");
                return;
            }
        };
        versions.sort();

        let excess = versions.len().saturating_sub(self.keep_versions);
        for version in versions.into_iter().take(excess) {
            if version == current {
                continue;
            }
            let path = dir.join(&version);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => debug!(version = %version, "pruned index version"),
                Err(e) => warn!(version = %version, error = %e, "could not prune index version"),
            }
        }
    }

    /// Load the published version, verifying it against `embedder`.
    ///
    /// Returns `Ok(None)` when nothing has been published yet.
    pub async fn load_current(&self, embedder: &dyn Embedder) -> Result<Option<KnowledgeBase>> {
        match self.current_version()? {
            Some(version) => Ok(Some(self.load_version(&version, embedder).await?)),
            None => Ok(None),
        }
    }

    pub async fn load_version(&self, version: &str, embedder: &dyn Embedder) -> Result<KnowledgeBase> {
        let path = self.version_path(version);
        let pool = open_existing(&path).await?;
        let loaded = read_snapshot(&pool, &path, version, embedder).await;
        pool.close().await;
        loaded
    }

    /// Read metadata and source outcomes of the published version.
    pub async fn inspect(&self) -> Result<Option<IndexSummary>> {
        let Some(version) = self.current_version()? else {
            return Ok(None);
        };
        let path = self.version_path(&version);
        let pool = open_existing(&path).await?;
        let summary = async {
            let (metadata, markup_source) = read_metadata(&pool, &path).await?;
            let sources = read_sources(&pool, &path).await?;
            let selector_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM selectors")
                .fetch_one(&pool)
                .await
                .map_err(|e| QaError::corrupt(&path, e))?;
            Ok::<_, QaError>(IndexSummary {
                version: version.clone(),
                size_bytes: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
                path: path.clone(),
                metadata,
                sources,
                selector_count: selector_count as usize,
                markup_source,
            })
        }
        .await;
        pool.close().await;
        summary.map(Some)
    }
}

async fn open_existing(path: &Path) -> Result<SqlitePool> {
    if !path.exists() {
        return Err(QaError::corrupt(path, "published version is missing"));
    }
    db::connect(path, false)
        .await
        .map_err(|e| QaError::corrupt(path, format!("{:#}", e)))
}

async fn write_snapshot(pool: &SqlitePool, kb: &KnowledgeBase) -> anyhow::Result<()> {
    migrate::run_migrations(pool).await?;

    let meta = kb.index.metadata();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO metadata (id, schema_version, embedding_model, dims, chunk_count, built_at, \
         chunk_size, chunk_overlap, markup_source) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(SCHEMA_VERSION)
    .bind(&meta.embedding_model)
    .bind(meta.dims as i64)
    .bind(meta.chunk_count as i64)
    .bind(meta.built_at.to_rfc3339())
    .bind(meta.chunk_size as i64)
    .bind(meta.chunk_overlap as i64)
    .bind(kb.markup_source.as_deref())
    .execute(&mut *tx)
    .await?;

    for (position, source) in kb.sources.iter().enumerate() {
        sqlx::query(
            "INSERT INTO sources (position, source_id, format_kind, status, reason, chunk_count) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(position as i64)
        .bind(&source.source_id)
        .bind(source.format_kind.as_str())
        .bind(source.status.as_str())
        .bind(source.reason.as_deref())
        .bind(source.chunk_count as i64)
        .execute(&mut *tx)
        .await?;
    }

    for entry in kb.index.entries() {
        sqlx::query(
            "INSERT INTO entries (entry_id, source_id, ordinal, text, span_start, span_end, embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entry_id)
        .bind(&entry.chunk.source_id)
        .bind(entry.chunk.ordinal as i64)
        .bind(&entry.chunk.text)
        .bind(entry.chunk.span.start as i64)
        .bind(entry.chunk.span.end as i64)
        .bind(vec_to_blob(&entry.embedding))
        .execute(&mut *tx)
        .await?;
    }

    for (key, locator) in kb.selectors.iter() {
        sqlx::query("INSERT INTO selectors (key, locator) VALUES (?, ?)")
            .bind(key)
            .bind(locator)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn read_metadata(pool: &SqlitePool, path: &Path) -> Result<(IndexMetadata, Option<String>)> {
    let corrupt = |e: sqlx::Error| QaError::corrupt(path, e);

    let row = sqlx::query(
        "SELECT schema_version, embedding_model, dims, chunk_count, built_at, chunk_size, \
         chunk_overlap, markup_source FROM metadata WHERE id = 1",
    )
    .fetch_optional(pool)
    .await
    .map_err(corrupt)?
    .ok_or_else(|| QaError::corrupt(path, "metadata record is missing"))?;

    let schema_version: i64 = row.try_get("schema_version").map_err(corrupt)?;
    if schema_version > SCHEMA_VERSION {
        return Err(QaError::corrupt(
            path,
            format!("unsupported schema version {}", schema_version),
        ));
    }

    let built_at: String = row.try_get("built_at").map_err(corrupt)?;
    let built_at = DateTime::parse_from_rfc3339(&built_at)
        .map_err(|e| QaError::corrupt(path, format!("bad built_at: {}", e)))?
        .with_timezone(&Utc);

    let metadata = IndexMetadata {
        embedding_model: row.try_get("embedding_model").map_err(corrupt)?,
        dims: to_usize(row.try_get("dims").map_err(corrupt)?, "dims", path)?,
        chunk_count: to_usize(row.try_get("chunk_count").map_err(corrupt)?, "chunk_count", path)?,
        built_at,
        chunk_size: to_usize(row.try_get("chunk_size").map_err(corrupt)?, "chunk_size", path)?,
        chunk_overlap: to_usize(row.try_get("chunk_overlap").map_err(corrupt)?, "chunk_overlap", path)?,
    };
    let markup_source: Option<String> = row.try_get("markup_source").map_err(corrupt)?;
    Ok((metadata, markup_source))
}

async fn read_sources(pool: &SqlitePool, path: &Path) -> Result<Vec<SourceStatus>> {
    let rows = sqlx::query(
        "SELECT source_id, format_kind, status, reason, chunk_count FROM sources ORDER BY position",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| QaError::corrupt(path, e))?;

    rows.iter()
        .map(|row| -> Result<SourceStatus> {
            let corrupt = |e: sqlx::Error| QaError::corrupt(path, e);
            let format_kind: String = row.try_get("format_kind").map_err(corrupt)?;
            let status: String = row.try_get("status").map_err(corrupt)?;
            Ok(SourceStatus {
                source_id: row.try_get("source_id").map_err(corrupt)?,
                format_kind: format_kind
                    .parse::<FormatKind>()
                    .map_err(|e| QaError::corrupt(path, e))?,
                status: BuildStatus::parse(&status)
                    .ok_or_else(|| QaError::corrupt(path, format!("bad status '{}'", status)))?,
                reason: row.try_get("reason").map_err(corrupt)?,
                chunk_count: to_usize(row.try_get("chunk_count").map_err(corrupt)?, "chunk_count", path)?,
            })
        })
        .collect()
}

async fn read_snapshot(
    pool: &SqlitePool,
    path: &Path,
    version: &str,
    embedder: &dyn Embedder,
) -> Result<KnowledgeBase> {
    let (metadata, markup_source) = read_metadata(pool, path).await?;
    metadata.check_compatible(embedder)?;

    let corrupt = |e: sqlx::Error| QaError::corrupt(path, e);
    let rows = sqlx::query(
        "SELECT entry_id, source_id, ordinal, text, span_start, span_end, embedding \
         FROM entries ORDER BY source_id, ordinal",
    )
    .fetch_all(pool)
    .await
    .map_err(corrupt)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let blob: Vec<u8> = row.try_get("embedding").map_err(corrupt)?;
        let embedding = blob_to_vec(&blob);
        if blob.len() != metadata.dims * 4 {
            return Err(QaError::corrupt(
                path,
                format!(
                    "entry vector has {} bytes, expected {}",
                    blob.len(),
                    metadata.dims * 4
                ),
            ));
        }
        let ordinal: i64 = row.try_get("ordinal").map_err(corrupt)?;
        let chunk = Chunk {
            source_id: row.try_get("source_id").map_err(corrupt)?,
            ordinal: u32::try_from(ordinal)
                .map_err(|_| QaError::corrupt(path, format!("bad ordinal {}", ordinal)))?,
            text: row.try_get("text").map_err(corrupt)?,
            span: CharSpan {
                start: to_usize(row.try_get("span_start").map_err(corrupt)?, "span_start", path)?,
                end: to_usize(row.try_get("span_end").map_err(corrupt)?, "span_end", path)?,
            },
        };
        entries.push(IndexEntry {
            entry_id: row.try_get("entry_id").map_err(corrupt)?,
            chunk,
            embedding,
        });
    }

    if entries.len() != metadata.chunk_count {
        return Err(QaError::corrupt(
            path,
            format!(
                "metadata records {} chunks, found {}",
                metadata.chunk_count,
                entries.len()
            ),
        ));
    }

    let selector_rows = sqlx::query("SELECT key, locator FROM selectors ORDER BY key")
        .fetch_all(pool)
        .await
        .map_err(corrupt)?;
    let selectors = selector_rows
        .iter()
        .map(|row| -> Result<(String, String)> {
            Ok((
                row.try_get("key").map_err(corrupt)?,
                row.try_get("locator").map_err(corrupt)?,
            ))
        })
        .collect::<Result<SelectorMap>>()?;

    let sources = read_sources(pool, path).await?;
    let index = VectorIndex::from_entries(metadata, entries)?;
    debug!(version, chunks = index.len(), selectors = selectors.len(), "loaded index version");

    Ok(KnowledgeBase {
        version: version.to_string(),
        index: index.into(),
        selectors: selectors.into(),
        sources,
        markup_source,
    })
}

fn to_usize(value: i64, field: &str, path: &Path) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| QaError::corrupt(path, format!("negative {}: {}", field, value)))
}
