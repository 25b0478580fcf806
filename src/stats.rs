//! Index statistics and health overview.
//!
//! Summarizes the published knowledge base: which version is current, the
//! embedding model it was built with, and how each source fared in the
//! build. Used by `qah stats`.

use anyhow::Result;

use crate::config::Config;
use crate::models::BuildStatus;
use crate::store::{IndexStore, IndexSummary};

/// Run the stats command: inspect the published version and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = IndexStore::new(config.index.dir.clone(), config.index.keep_versions);
    match store.inspect().await? {
        Some(summary) => print!("{}", render(&summary)),
        None => {
            println!("No knowledge base published under {}", store.root().display());
            println!("Run `qah build` first.");
        }
    }
    Ok(())
}

fn render(summary: &IndexSummary) -> String {
    let meta = &summary.metadata;
    let failed = summary
        .sources
        .iter()
        .filter(|s| s.status == BuildStatus::Failed)
        .count();

    let mut out = String::new();
    out.push_str("QA Harness — Index Stats\n");
    out.push_str("========================\n\n");
    out.push_str(&format!("  Version:     {}\n", summary.version));
    out.push_str(&format!("  Path:        {}\n", summary.path.display()));
    out.push_str(&format!("  Size:        {}\n", format_bytes(summary.size_bytes)));
    out.push_str(&format!(
        "  Built:       {} ({})\n\n",
        meta.built_at.format("%Y-%m-%d %H:%M"),
        format_age(meta.built_at.timestamp())
    ));
    out.push_str(&format!("  Model:       {} ({} dims)\n", meta.embedding_model, meta.dims));
    out.push_str(&format!(
        "  Chunking:    size {}, overlap {}\n",
        meta.chunk_size, meta.chunk_overlap
    ));
    out.push_str(&format!("  Chunks:      {}\n", meta.chunk_count));
    out.push_str(&format!(
        "  Sources:     {} ({} failed)\n",
        summary.sources.len(),
        failed
    ));
    out.push_str(&format!(
        "  Selectors:   {}{}\n",
        summary.selector_count,
        summary
            .markup_source
            .as_deref()
            .map(|m| format!(" (from {})", m))
            .unwrap_or_default()
    ));

    if !summary.sources.is_empty() {
        out.push_str("\n  By source:\n");
        out.push_str(&format!(
            "  {:<32} {:>8} {:>8}   {}\n",
            "SOURCE", "FORMAT", "CHUNKS", "STATUS"
        ));
        out.push_str(&format!("  {}\n", "-".repeat(64)));
        for s in &summary.sources {
            let status = match (&s.status, &s.reason) {
                (BuildStatus::Failed, Some(reason)) => format!("failed: {}", reason),
                (status, _) => status.as_str().to_string(),
            };
            out.push_str(&format!(
                "  {:<32} {:>8} {:>8}   {}\n",
                s.source_id,
                s.format_kind.as_str(),
                s.chunk_count,
                status
            ));
        }
    }
    out.push('\n');
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative age (e.g. "3 hours ago").
fn format_age(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_age() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_age(now), "just now");
        assert_eq!(format_age(now - 2 * 3600), "2 hours ago");
        assert_eq!(format_age(now - 86400), "1 day ago");
    }
}
