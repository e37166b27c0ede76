//! Schema for the SQLite index.
//!
//! Every statement is idempotent, so `chanlog init` and
//! `chanlog import --create-index` can run against an existing database.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per document; id is the content id, so re-submission is a no-op.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            partition_key TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            channel TEXT NOT NULL,
            received_at TEXT NOT NULL,
            formatted TEXT NOT NULL,
            actor TEXT,
            message TEXT,
            topic TEXT,
            reason TEXT,
            old_name TEXT,
            kicker TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    if !fts_table_exists(pool).await? {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE events_fts USING fts5(
                event_id UNINDEXED,
                formatted,
                tokenize = "unicode61 tokenchars '_'"
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_partition ON events(partition_key)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_channel_received ON events(channel, received_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_actor ON events(actor)")
        .execute(pool)
        .await?;

    Ok(())
}

/// True once both the events table and its FTS index exist.
pub async fn schema_exists(pool: &SqlitePool) -> Result<bool> {
    let events: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='events'",
    )
    .fetch_one(pool)
    .await?;
    Ok(events && fts_table_exists(pool).await?)
}

async fn fts_table_exists(pool: &SqlitePool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='events_fts'",
    )
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
