use anyhow::Result;
use sqlx::SqlitePool;

/// Version of the on-disk layout written by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// Create the tables of a fresh index version.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Single-row identity of the index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            built_at TEXT NOT NULL,
            chunk_size INTEGER NOT NULL,
            chunk_overlap INTEGER NOT NULL,
            markup_source TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-source build outcome, in build order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            position INTEGER NOT NULL,
            source_id TEXT NOT NULL,
            format_kind TEXT NOT NULL,
            status TEXT NOT NULL,
            reason TEXT,
            chunk_count INTEGER NOT NULL,
            PRIMARY KEY (position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            entry_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            span_start INTEGER NOT NULL,
            span_end INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (source_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS selectors (
            key TEXT PRIMARY KEY,
            locator TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
