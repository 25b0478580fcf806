//! Error taxonomy shared by every pipeline stage.
//!
//! Each variant carries the identifying context (source id, query, test id
//! or path) a caller needs to retry one operation narrowly instead of
//! rebuilding the whole knowledge base.

use std::fmt::Display;
use std::path::Path;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Error, Debug)]
pub enum QaError {
    /// One source document could not be parsed. Recoverable: the build
    /// skips it and reports the reason.
    #[error("failed to parse source '{source_id}': {reason}")]
    Parse { source_id: String, reason: String },

    #[error("embedding service error ({context}): {reason}")]
    EmbeddingService { context: String, reason: String },

    #[error("language model error ({context}): {reason}")]
    LanguageModel { context: String, reason: String },

    #[error("{operation} timed out after {seconds}s ({context})")]
    Timeout {
        operation: String,
        context: String,
        seconds: u64,
    },

    /// Persisted index metadata does not match the configured embedding
    /// model. Fatal until the knowledge base is rebuilt.
    #[error(
        "index mismatch on {field}: persisted index has '{persisted}', configuration has '{configured}' (rebuild the knowledge base)"
    )]
    IndexMismatch {
        field: String,
        persisted: String,
        configured: String,
    },

    #[error("corrupt index at {path}: {reason}")]
    IndexCorrupt { path: String, reason: String },

    #[error("storage error at {path}: {reason}")]
    Storage { path: String, reason: String },

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Model output cites context that was not supplied, or omits citations.
    #[error("grounding violation for query '{query}': {reason}")]
    GroundingViolation { query: String, reason: String },

    #[error("schema violation in {context}: {reason}")]
    SchemaViolation { context: String, reason: String },

    #[error("selector key '{key}' maps to both '{first}' and '{second}'")]
    SelectorCollision {
        key: String,
        first: String,
        second: String,
    },

    /// A build in which no source yielded text. `failures` pairs every
    /// failed source id with its reason.
    #[error(
        "no source produced any text ({} of {total} failed): {}",
        .failures.len(),
        describe_failures(.failures)
    )]
    NoUsableSource {
        total: usize,
        failures: Vec<(String, String)>,
    },

    #[error("no knowledge base has been built yet")]
    NoKnowledgeBase,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe_failures(failures: &[(String, String)]) -> String {
    if failures.is_empty() {
        return "no sources supplied".to_string();
    }
    failures
        .iter()
        .map(|(source_id, reason)| format!("{}: {}", source_id, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl QaError {
    pub fn parse(source_id: impl Into<String>, reason: impl Display) -> Self {
        QaError::Parse {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn embedding(context: impl Into<String>, reason: impl Display) -> Self {
        QaError::EmbeddingService {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn language_model(context: impl Into<String>, reason: impl Display) -> Self {
        QaError::LanguageModel {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn grounding(query: &str, reason: impl Display) -> Self {
        QaError::GroundingViolation {
            query: query.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(context: impl Into<String>, reason: impl Display) -> Self {
        QaError::SchemaViolation {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(path: &Path, reason: impl Display) -> Self {
        QaError::Storage {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(path: &Path, reason: impl Display) -> Self {
        QaError::IndexCorrupt {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error only affects the current request.
    ///
    /// Index mismatches and corruption stay fatal until a rebuild.
    pub fn is_request_scoped(&self) -> bool {
        !matches!(
            self,
            QaError::IndexMismatch { .. } | QaError::IndexCorrupt { .. } | QaError::NoKnowledgeBase
        )
    }
}
