//! Idempotent schema setup for both databases.
//!
//! Every statement is `IF NOT EXISTS` (FTS5 is checked by hand), so
//! `init` can be re-run and every command can migrate on open.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let meta = db::connect_metadata(config).await?;
    migrate_metadata(&meta).await?;
    meta.close().await;

    let index = db::connect_index(config).await?;
    migrate_index(&index).await?;
    index.close().await;
    Ok(())
}

/// Metadata Store tables.
pub async fn migrate_metadata(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            fingerprint TEXT PRIMARY KEY,
            current_path TEXT NOT NULL,
            original_path TEXT NOT NULL,
            aliases_json TEXT NOT NULL DEFAULT '[]',
            file_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            extraction_state TEXT NOT NULL DEFAULT 'pending',
            indexed_state TEXT NOT NULL DEFAULT 'unindexed',
            missing_syncs INTEGER NOT NULL DEFAULT 0,
            pending_delete INTEGER NOT NULL DEFAULT 0,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_text (
            fingerprint TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            extracted_at INTEGER NOT NULL,
            FOREIGN KEY (fingerprint) REFERENCES documents(fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_current_path ON documents(current_path)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_indexed_state ON documents(indexed_state)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_first_seen ON documents(first_seen_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Vector index tables: chunks, their FTS5 mirror, and embeddings.
pub async fn migrate_index(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(fingerprint, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                fingerprint UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_fingerprint ON chunks(fingerprint)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_fingerprint ON chunk_vectors(fingerprint)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
