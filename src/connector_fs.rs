//! Filesystem source scanner.
//!
//! Walks a documentation directory and reads every file matching the
//! configured globs into a [`SourceUpload`]. The format of each file is
//! declared by its extension; files with an unrecognised extension are
//! skipped.
//!
//! Uploads are returned sorted by relative path so that a rebuild of the
//! same directory produces the same source order.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use qa_harness_core::models::FormatKind;

use crate::config::SourcesConfig;
use crate::models::{MarkupUpload, SourceUpload};

/// Directories never scanned.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Scan `root` for source documents.
///
/// The markup page, when it lives under `root`, is not treated as a source.
pub fn scan_sources(root: &Path, config: &SourcesConfig) -> Result<Vec<SourceUpload>> {
    if !root.is_dir() {
        bail!("Sources root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let markup = config
        .markup
        .as_ref()
        .and_then(|p| std::fs::canonicalize(p).ok());

    let mut uploads = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        if markup.is_some() && std::fs::canonicalize(path).ok() == markup {
            continue;
        }

        let Some(format_kind) = FormatKind::from_path(path) else {
            debug!(path = %rel_str, "skipping file with unknown format");
            continue;
        };

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(SourceUpload {
            filename: rel_str,
            bytes,
            format_kind,
        });
    }

    uploads.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(uploads)
}

/// Read the markup page selectors are extracted from.
pub fn read_markup(path: &Path) -> Result<MarkupUpload> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read markup page {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(MarkupUpload { filename, text })
}

/// Resolve the sources root: an explicit argument wins over the config.
pub fn resolve_root(explicit: Option<PathBuf>, config: &SourcesConfig) -> Result<PathBuf> {
    explicit
        .or_else(|| config.root.clone())
        .ok_or_else(|| anyhow::anyhow!("No sources directory: pass --docs or set [sources] root"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
