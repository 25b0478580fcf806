//! In-memory vector index over embedded chunks.
//!
//! A [`VectorIndex`] is built once from a chunk sequence and never mutated
//! afterwards. Rebuilding produces a new index; callers swap the handle.
//!
//! # Query Ordering
//!
//! Results are ordered by cosine similarity (descending). Equal scores are
//! broken by ascending `(source_id, ordinal)` so that identical inputs
//! always return identical rankings.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunk::ChunkParams;
use crate::embedding::{check_vectors, cosine_similarity, embed_one, Embedder};
use crate::error::{QaError, Result};
use crate::models::{CitationHandle, Chunk, RetrievedChunk, RetrievedContext};

/// Identity and shape of a built index, persisted next to its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub embedding_model: String,
    pub dims: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IndexMetadata {
    /// Compare the persisted embedding identity against a configured embedder.
    ///
    /// The model name is checked before dimensionality.
    pub fn check_compatible(&self, embedder: &dyn Embedder) -> Result<()> {
        if self.embedding_model != embedder.model_name() {
            return Err(QaError::IndexMismatch {
                field: "embedding_model".to_string(),
                persisted: self.embedding_model.clone(),
                configured: embedder.model_name().to_string(),
            });
        }
        if self.dims != embedder.dims() {
            return Err(QaError::IndexMismatch {
                field: "dims".to_string(),
                persisted: self.dims.to_string(),
                configured: embedder.dims().to_string(),
            });
        }
        Ok(())
    }
}

/// A chunk together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// SHA-256 over source id, ordinal and text.
    pub entry_id: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            entry_id: entry_id(&chunk),
            chunk,
            embedding,
        }
    }
}

/// Content-derived entry id, stable across rebuilds of the same text.
pub fn entry_id(chunk: &Chunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.ordinal.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Immutable brute-force cosine index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metadata: IndexMetadata,
    entries: Vec<IndexEntry>,
    positions: HashMap<CitationHandle, usize>,
}

impl VectorIndex {
    /// Assemble an index from already-embedded entries (e.g. after loading
    /// from disk). Every vector must have `metadata.dims` components and
    /// every handle must be unique.
    pub fn from_entries(metadata: IndexMetadata, entries: Vec<IndexEntry>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.embedding.len() != metadata.dims {
                return Err(QaError::DimensionMismatch {
                    expected: metadata.dims,
                    actual: entry.embedding.len(),
                });
            }
            if positions.insert(entry.chunk.handle(), i).is_some() {
                return Err(QaError::InvalidRequest(format!(
                    "duplicate index entry for {}",
                    entry.chunk.handle()
                )));
            }
        }
        let metadata = IndexMetadata {
            chunk_count: entries.len(),
            ..metadata
        };
        Ok(Self {
            metadata,
            entries,
            positions,
        })
    }

    /// Embed `chunks` in batches of `batch_size` and build a new index.
    ///
    /// Any embedding failure aborts the build; no partial index is returned.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
        params: &ChunkParams,
    ) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut entries = Vec::with_capacity(chunks.len());

        let mut iter = chunks.into_iter().peekable();
        while iter.peek().is_some() {
            let batch: Vec<Chunk> = iter.by_ref().take(batch_size).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let context = format!(
                "build batch starting at {}",
                batch.first().map(|c| c.handle().to_string()).unwrap_or_default()
            );
            let vectors = embedder.embed(&texts).await?;
            check_vectors(embedder, &vectors, batch.len(), &context)?;
            entries.extend(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vec)| IndexEntry::new(chunk, vec)),
            );
        }

        let metadata = IndexMetadata {
            embedding_model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            chunk_count: entries.len(),
            built_at: Utc::now(),
            chunk_size: params.size(),
            chunk_overlap: params.overlap(),
        };
        Self::from_entries(metadata, entries)
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact lookup by citation handle.
    pub fn get(&self, handle: &CitationHandle) -> Option<&Chunk> {
        self.positions.get(handle).map(|&i| &self.entries[i].chunk)
    }

    /// k-nearest-neighbour search with a precomputed query vector.
    ///
    /// `k` is clamped to the number of stored entries.
    pub fn search(&self, query: &str, query_vec: &[f32], k: usize) -> Result<RetrievedContext> {
        if k == 0 {
            return Err(QaError::InvalidRequest("k must be at least 1".to_string()));
        }
        if query_vec.len() != self.metadata.dims {
            return Err(QaError::DimensionMismatch {
                expected: self.metadata.dims,
                actual: query_vec.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query_vec, &e.embedding), e))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa).then_with(|| compare_handles(&a.chunk, &b.chunk))
        });
        scored.truncate(k.min(self.entries.len()));

        let items = scored
            .into_iter()
            .enumerate()
            .map(|(rank, (score, entry))| RetrievedChunk {
                chunk: entry.chunk.clone(),
                score,
                rank,
            })
            .collect();

        Ok(RetrievedContext {
            query: query.to_string(),
            items,
        })
    }

    /// Embed `text` with `embedder` and search.
    ///
    /// The embedder identity is verified before any network call.
    pub async fn query(
        &self,
        text: &str,
        embedder: &dyn Embedder,
        k: usize,
    ) -> Result<RetrievedContext> {
        self.metadata.check_compatible(embedder)?;
        if k == 0 {
            return Err(QaError::InvalidRequest("k must be at least 1".to_string()));
        }
        let vec = embed_one(embedder, text, &format!("query '{}'", text)).await?;
        self.search(text, &vec, k)
    }
}

fn compare_handles(a: &Chunk, b: &Chunk) -> Ordering {
    a.source_id
        .cmp(&b.source_id)
        .then_with(|| a.ordinal.cmp(&b.ordinal))
}
