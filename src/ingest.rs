//! Knowledge-base build.
//!
//! Turns a set of uploaded sources plus one markup page into a new
//! [`KnowledgeBase`]: parse → chunk → embed → index, and selector
//! extraction alongside. Sources that fail to parse are reported in the
//! [`BuildReport`] and skipped; the remaining sources still build.
//!
//! The result is a fresh value. Publishing it is the caller's job (see
//! [`crate::harness::Harness::build`]).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use qa_harness_core::chunk::chunk_document;
use qa_harness_core::embedding::Embedder;
use qa_harness_core::index::VectorIndex;
use qa_harness_core::models::{Chunk, SelectorMap};
use qa_harness_core::{QaError, Result};

use crate::config::Config;
use crate::models::{BuildReport, BuildStatus, KnowledgeBase, MarkupUpload, SourceStatus, SourceUpload};
use crate::parse::{parse_source, sanitize_source_id};
use crate::selectors::extract_selectors;
use crate::store::IndexStore;

/// Build a knowledge base from `uploads` and an optional markup page.
///
/// Fails only when nothing could be indexed ([`QaError::NoUsableSource`],
/// naming every failed source), when the embedding service
/// fails, or when the selector collision policy is `error` and the markup
/// has a collision.
pub async fn build_knowledge_base(
    uploads: Vec<SourceUpload>,
    markup: Option<&MarkupUpload>,
    embedder: &dyn Embedder,
    config: &Config,
) -> Result<(KnowledgeBase, BuildReport)> {
    let params = config
        .chunking
        .params()
        .map_err(|e| QaError::InvalidRequest(format!("{:#}", e)))?;

    let uploads_len = uploads.len();
    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(uploads_len);
    let mut chunks: Vec<Chunk> = Vec::new();

    for upload in uploads {
        let source_id = sanitize_source_id(&upload.filename);
        let parsed = if seen.insert(source_id.clone()) {
            parse_source(&source_id, &upload.bytes, upload.format_kind)
        } else {
            Err(QaError::parse(&source_id, "duplicate source id in this build"))
        };

        match parsed {
            Ok(doc) => {
                let doc_chunks = chunk_document(&doc, &params);
                debug!(source = %source_id, chunks = doc_chunks.len(), "parsed source");
                sources.push(SourceStatus {
                    source_id,
                    format_kind: upload.format_kind,
                    status: BuildStatus::Success,
                    reason: None,
                    chunk_count: doc_chunks.len(),
                });
                chunks.extend(doc_chunks);
            }
            Err(e) => {
                let reason = match e {
                    QaError::Parse { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(source = %source_id, reason = %reason, "skipping source");
                sources.push(SourceStatus {
                    source_id,
                    format_kind: upload.format_kind,
                    status: BuildStatus::Failed,
                    reason: Some(reason),
                    chunk_count: 0,
                });
            }
        }
    }

    if chunks.is_empty() {
        let failures = sources
            .into_iter()
            .filter(|s| s.status == BuildStatus::Failed)
            .map(|s| (s.source_id, s.reason.unwrap_or_default()))
            .collect();
        return Err(QaError::NoUsableSource {
            total: uploads_len,
            failures,
        });
    }

    let selectors = match markup {
        Some(page) => {
            let map = extract_selectors(&page.text, config.selectors.collision)?;
            info!(markup = %page.filename, selectors = map.len(), "extracted selectors");
            map
        }
        None => SelectorMap::default(),
    };

    info!(
        chunks = chunks.len(),
        model = embedder.model_name(),
        "embedding chunks"
    );
    let index = VectorIndex::build(chunks, embedder, config.embedding.batch_size, &params).await?;

    let version = IndexStore::new_version_id();
    let report = BuildReport {
        version: version.clone(),
        chunk_count: index.len(),
        sources: sources.clone(),
        selector_count: selectors.len(),
    };
    let kb = KnowledgeBase {
        version,
        index: Arc::new(index),
        selectors: Arc::new(selectors),
        sources,
        markup_source: markup.map(|m| m.filename.clone()),
    };
    Ok((kb, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use qa_harness_core::models::FormatKind;

    fn upload(name: &str, text: &str, kind: FormatKind) -> SourceUpload {
        SourceUpload {
            filename: name.to_string(),
            bytes: text.as_bytes().to_vec(),
            format_kind: kind,
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_good_sources() {
        let uploads = vec![
            upload("guide.md", "Discount codes are case sensitive.", FormatKind::Markdown),
            upload("broken.json", "{ not json", FormatKind::Json),
            upload("empty.txt", "   ", FormatKind::Text),
        ];
        let (kb, report) =
            build_knowledge_base(uploads, None, &HashEmbedder::new(32), &Config::default())
                .await
                .unwrap();

        assert_eq!(report.chunk_count, 1);
        assert_eq!(kb.index.len(), 1);
        let failed: Vec<&str> = report.failed_sources().map(|s| s.source_id.as_str()).collect();
        assert_eq!(failed, vec!["broken.json", "empty.txt"]);
        assert_eq!(report.selector_count, 0);
        assert!(kb.markup_source.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_source_id_fails_later_source() {
        let uploads = vec![
            upload("a/b.md", "first", FormatKind::Markdown),
            upload("a_b.md", "second", FormatKind::Markdown),
        ];
        let (_, report) =
            build_knowledge_base(uploads, None, &HashEmbedder::new(8), &Config::default())
                .await
                .unwrap();
        assert_eq!(report.sources[0].status, BuildStatus::Success);
        assert_eq!(report.sources[1].status, BuildStatus::Failed);
        assert!(report.sources[1]
            .reason
            .as_deref()
            .unwrap()
            .contains("duplicate"));
    }

    #[tokio::test]
    async fn test_all_sources_failing_names_each_source() {
        let uploads = vec![
            upload("a.json", "nope", FormatKind::Json),
            SourceUpload {
                filename: "b.pdf".to_string(),
                bytes: b"%PDF-1.4 truncated".to_vec(),
                format_kind: FormatKind::Pdf,
            },
        ];
        let err = build_knowledge_base(uploads, None, &HashEmbedder::new(8), &Config::default())
            .await
            .unwrap_err();
        match &err {
            QaError::NoUsableSource { total, failures } => {
                assert_eq!(*total, 2);
                let ids: Vec<&str> = failures.iter().map(|(id, _)| id.as_str()).collect();
                assert_eq!(ids, vec!["a.json", "b.pdf"]);
                assert!(failures.iter().all(|(_, reason)| !reason.is_empty()));
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("a.json: "), "{}", message);
        assert!(message.contains("b.pdf: "), "{}", message);
    }

    #[tokio::test]
    async fn test_markup_selectors_are_counted() {
        let markup = MarkupUpload {
            filename: "page.html".into(),
            text: r#"<form id="checkout"><input id="discount-code"><button id="apply">Apply</button></form>"#
                .into(),
        };
        let uploads = vec![upload("guide.md", "Apply the code.", FormatKind::Markdown)];
        let (kb, report) = build_knowledge_base(
            uploads,
            Some(&markup),
            &HashEmbedder::new(8),
            &Config::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.selector_count, 3);
        assert_eq!(kb.selectors.get("input_text_discount-code"), Some("#discount-code"));
        assert_eq!(kb.markup_source.as_deref(), Some("page.html"));
    }
}
