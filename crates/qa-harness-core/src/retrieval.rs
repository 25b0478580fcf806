//! Query-time retrieval over a [`VectorIndex`] snapshot.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{QaError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievedContext;

/// Binds one index snapshot to the embedder it was built with.
///
/// Construction fails with [`QaError::IndexMismatch`] when the embedder
/// identity differs from the index metadata, so a pipeline that exists can
/// always query.
#[derive(Clone)]
pub struct RetrievalPipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalPipeline {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        index.metadata().check_compatible(embedder.as_ref())?;
        Ok(Self { index, embedder })
    }

    /// Embed `query` and return the `k` most similar chunks in rank order.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievedContext> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QaError::InvalidRequest("query must not be empty".to_string()));
        }
        if self.index.is_empty() {
            return Err(QaError::NoKnowledgeBase);
        }
        self.index.query(query, self.embedder.as_ref(), k).await
    }
}

/// Render the context block handed to the generator, in rank order.
pub fn format_context(ctx: &RetrievedContext) -> String {
    ctx.iter()
        .map(|item| {
            format!(
                "=== SOURCE: {} ===\n{}\n=== END ===",
                item.chunk.handle(),
                item.chunk.text.trim_end()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
