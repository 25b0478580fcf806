//! Application-level data models.
//!
//! These types describe what goes into a knowledge-base build, the
//! published snapshot that query-time operations read, and the responses
//! returned to callers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use qa_harness_core::index::VectorIndex;
use qa_harness_core::models::{
    Chunk, CitationHandle, FormatKind, RetrievedContext, SelectorMap, TestCase,
};

/// One uploaded file: a name, its bytes and the declared format.
#[derive(Debug, Clone)]
pub struct SourceUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub format_kind: FormatKind,
}

/// Markup page the selector inventory is extracted from.
#[derive(Debug, Clone)]
pub struct MarkupUpload {
    pub filename: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(BuildStatus::Success),
            "failed" => Some(BuildStatus::Failed),
            _ => None,
        }
    }
}

/// Outcome of one source within a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub format_kind: FormatKind,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub chunk_count: usize,
}

/// Result of a knowledge-base build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub version: String,
    pub chunk_count: usize,
    pub sources: Vec<SourceStatus>,
    pub selector_count: usize,
}

impl BuildReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceStatus> {
        self.sources
            .iter()
            .filter(|s| s.status == BuildStatus::Failed)
    }
}

/// One immutable published snapshot: the vector index plus the selector
/// map built alongside it.
///
/// Query-time operations hold an `Arc<KnowledgeBase>` for their whole
/// duration; a rebuild publishes a new value instead of mutating this one.
#[derive(Debug)]
pub struct KnowledgeBase {
    pub version: String,
    pub index: Arc<VectorIndex>,
    pub selectors: Arc<SelectorMap>,
    pub sources: Vec<SourceStatus>,
    pub markup_source: Option<String>,
}

impl KnowledgeBase {
    /// Cited chunks resolved by exact handle, in citation order. Handles
    /// that no longer exist in this snapshot are skipped.
    pub fn evidence(&self, handles: &[CitationHandle]) -> Vec<Chunk> {
        handles
            .iter()
            .filter_map(|h| self.index.get(h).cloned())
            .collect()
    }
}

/// Longest preview reported for a used chunk, in characters.
pub const PREVIEW_CHARS: usize = 200;

/// A context chunk that was surfaced to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsedChunk {
    pub handle: CitationHandle,
    pub score: f32,
    pub rank: usize,
    pub preview: String,
}

impl UsedChunk {
    pub fn from_context(ctx: &RetrievedContext) -> Vec<Self> {
        ctx.iter()
            .map(|item| UsedChunk {
                handle: item.chunk.handle(),
                score: item.score,
                rank: item.rank,
                preview: preview(&item.chunk.text),
            })
            .collect()
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

/// Response of the test-case generation operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResponse {
    pub test_cases: Vec<TestCase>,
    pub used_chunks: Vec<UsedChunk>,
}
