use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open the SQLite file of one index version.
///
/// Writers create the file; readers open it read-only so a published
/// version is never modified after the fact.
pub async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    if create {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .read_only(!create)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(if create { 1 } else { 4 })
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index database: {}", path.display()))?;

    Ok(pool)
}
