//! Embedding capability trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helper functions for vector serialization and similarity
//! computation.
//!
//! Concrete providers (OpenAI, Ollama, local, feature hashing) live in the
//! `qa-harness` app crate. Tests substitute deterministic stubs.

use async_trait::async_trait;

use crate::error::{QaError, Result};

/// External embedding service consumed through a narrow contract.
///
/// `model_name()` and `dims()` form the embedding-model identity that is
/// persisted with every index and checked again on load.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    ///
    /// Failures are reported as [`QaError::EmbeddingService`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text and validate the returned vector.
pub async fn embed_one(embedder: &dyn Embedder, text: &str, context: &str) -> Result<Vec<f32>> {
    let vectors = embedder.embed(&[text.to_string()]).await?;
    check_vectors(embedder, &vectors, 1, context)?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| QaError::embedding(context, "empty embedding response"))
}

/// Verify count, dimensionality and finiteness of a provider response.
///
/// A provider that silently returns fewer vectors than requested must not
/// shift embeddings onto the wrong chunks.
pub fn check_vectors(
    embedder: &dyn Embedder,
    vectors: &[Vec<f32>],
    expected_count: usize,
    context: &str,
) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(QaError::embedding(
            context,
            format!(
                "expected {} vectors, provider returned {}",
                expected_count,
                vectors.len()
            ),
        ));
    }
    for v in vectors {
        if v.len() != embedder.dims() {
            return Err(QaError::embedding(
                context,
                format!(
                    "model '{}' returned a {}-dimension vector, configured for {}",
                    embedder.model_name(),
                    v.len(),
                    embedder.dims()
                ),
            ));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(QaError::embedding(context, "vector contains non-finite values"));
        }
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use qa_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice. Trailing bytes that do not form a full value
/// are ignored; callers compare the length against the expected dims.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
