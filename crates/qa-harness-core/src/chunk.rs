//! Overlapping window chunker.
//!
//! Splits a [`SourceDocument`] into [`Chunk`]s of at most `size` characters.
//! Consecutive chunks share exactly `overlap` characters, so dropping the
//! first `overlap` characters of every chunk after the first and
//! concatenating reconstructs the normalized source text.
//!
//! Window ends prefer the nearest preceding line or sentence boundary within
//! a lookback window; without one the window is hard-cut at `size`. The
//! output depends only on the text and parameters, which keeps citation
//! handles stable across rebuilds.

use crate::error::{QaError, Result};
use crate::models::{CharSpan, Chunk, SourceDocument};

/// Window parameters, in characters. Only constructed through
/// [`ChunkParams::new`], so `size > overlap` always holds:
///
/// ```compile_fail
/// use qa_harness_core::chunk::ChunkParams;
///
/// let params = ChunkParams { size: 10, overlap: 10, lookback: 2 };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
    lookback: usize,
}

impl ChunkParams {
    /// Requires `size > overlap`. Lookback defaults to a fifth of `size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 || overlap >= size {
            return Err(QaError::InvalidRequest(format!(
                "chunk size must exceed overlap (size={}, overlap={})",
                size, overlap
            )));
        }
        Ok(Self {
            size,
            overlap,
            lookback: size / 5,
        })
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }
}

/// Canonical form the chunker operates on: `\n` line endings, no NULs,
/// no surrounding whitespace.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\0', "")
        .trim()
        .to_string()
}

/// Split a document into overlapping chunks with ordinals starting at 0.
///
/// Empty documents produce no chunks.
pub fn chunk_document(doc: &SourceDocument, params: &ChunkParams) -> Vec<Chunk> {
    let normalized = normalize_text(&doc.raw_text);
    let chars: Vec<char> = normalized.chars().collect();
    let mut chunks = Vec::new();

    if chars.is_empty() {
        return chunks;
    }

    let mut start = 0usize;
    let mut ordinal = 0u32;

    loop {
        let hard_end = (start + params.size).min(chars.len());
        let end = if hard_end < chars.len() {
            find_break(&chars, start, hard_end, params).unwrap_or(hard_end)
        } else {
            hard_end
        };

        chunks.push(Chunk {
            source_id: doc.id.clone(),
            ordinal,
            text: chars[start..end].iter().collect(),
            span: CharSpan { start, end },
        });

        if end >= chars.len() {
            break;
        }
        ordinal += 1;
        start = end - params.overlap;
    }

    chunks
}

/// Rebuild the normalized text from an ordinal-ordered chunk sequence.
pub fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}

/// Nearest boundary at or before `hard_end`, never so early that the next
/// window (starting `overlap` characters back) would fail to advance.
fn find_break(chars: &[char], start: usize, hard_end: usize, params: &ChunkParams) -> Option<usize> {
    let lo = hard_end
        .saturating_sub(params.lookback)
        .max(start + params.overlap + 1);
    (lo..=hard_end).rev().find(|&pos| is_boundary(chars, pos))
}

/// A break after position `pos - 1` lands on a line end or a sentence end.
fn is_boundary(chars: &[char], pos: usize) -> bool {
    if pos == 0 || pos > chars.len() {
        return false;
    }
    let prev = chars[pos - 1];
    if prev == '\n' {
        return true;
    }
    pos >= 2 && prev.is_whitespace() && matches!(chars[pos - 2], '.' | '!' | '?')
}
