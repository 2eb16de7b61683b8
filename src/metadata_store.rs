//! SQLite-backed [`MetadataStore`].
//!
//! One row per fingerprint in `documents`; extracted text lives in
//! `document_text` so moves and index retries never re-extract. Each trait
//! method is a single statement or a short transaction, so a killed sync
//! loses at most the in-flight record's update.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docvault_core::models::file_type_of;
use docvault_core::store::{MetadataStore, StoreCounts};
use docvault_core::{DocumentRecord, ExtractionState, Fingerprint, IndexedState, ObservedFile};

const RECORD_COLUMNS: &str = "fingerprint, current_path, original_path, aliases_json, file_type, \
     size_bytes, mtime, extraction_state, indexed_state, missing_syncs, pending_delete, \
     first_seen_at, last_seen_at, last_error";

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Records ordered by first sighting, newest first, optionally filtered
    /// by a path substring. Missing and tombstoned records are skipped
    /// unless `include_missing` is set.
    pub async fn list_recent(
        &self,
        name_filter: Option<&str>,
        limit: usize,
        include_missing: bool,
    ) -> Result<Vec<DocumentRecord>> {
        let pattern = name_filter.map(|n| format!("%{}%", n.replace('%', "\\%").replace('_', "\\_")));
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM documents \
             WHERE (? IS NULL OR current_path LIKE ? ESCAPE '\\') \
               AND (? OR (missing_syncs = 0 AND pending_delete = 0)) \
             ORDER BY first_seen_at DESC, fingerprint ASC \
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(pattern.as_deref())
            .bind(pattern.as_deref())
            .bind(include_missing)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<DocumentRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM documents WHERE {clause} LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }
}

fn row_to_record(row: &SqliteRow) -> Result<DocumentRecord> {
    let fp: String = row.get("fingerprint");
    let aliases_json: String = row.get("aliases_json");
    let extraction: String = row.get("extraction_state");
    let indexed: String = row.get("indexed_state");
    let size: i64 = row.get("size_bytes");
    let missing: i64 = row.get("missing_syncs");

    Ok(DocumentRecord {
        fingerprint: fp
            .parse()
            .with_context(|| format!("corrupt fingerprint in documents table: {}", fp))?,
        current_path: row.get("current_path"),
        original_path: row.get("original_path"),
        aliases: serde_json::from_str(&aliases_json)
            .with_context(|| format!("corrupt aliases for {}", fp))?,
        file_type: row.get("file_type"),
        size: size.max(0) as u64,
        last_seen_mtime: row.get("mtime"),
        extraction_state: extraction.parse()?,
        indexed_state: indexed.parse()?,
        missing_syncs: missing.clamp(0, u32::MAX as i64) as u32,
        pending_delete: row.get("pending_delete"),
        first_seen_at: row.get("first_seen_at"),
        last_seen_at: row.get("last_seen_at"),
        last_error: row.get("last_error"),
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn upsert(
        &self,
        file: &ObservedFile,
        aliases: &[String],
        now: i64,
    ) -> Result<DocumentRecord> {
        let fp = file.fingerprint.to_hex();
        let aliases_json = serde_json::to_string(aliases)?;

        // The WHERE clause turns an identical re-upsert into a no-op.
        sqlx::query(
            r#"
            INSERT INTO documents (fingerprint, current_path, original_path, aliases_json,
                                   file_type, size_bytes, mtime, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                current_path = excluded.current_path,
                aliases_json = excluded.aliases_json,
                file_type = excluded.file_type,
                size_bytes = excluded.size_bytes,
                mtime = excluded.mtime,
                missing_syncs = 0,
                last_seen_at = excluded.last_seen_at
            WHERE documents.current_path IS NOT excluded.current_path
               OR documents.aliases_json IS NOT excluded.aliases_json
               OR documents.size_bytes IS NOT excluded.size_bytes
               OR documents.mtime IS NOT excluded.mtime
               OR documents.missing_syncs != 0
            "#,
        )
        .bind(&fp)
        .bind(&file.path)
        .bind(&file.path)
        .bind(&aliases_json)
        .bind(file_type_of(&file.path))
        .bind(file.size as i64)
        .bind(file.mtime)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.lookup_by_fingerprint(&file.fingerprint)
            .await?
            .with_context(|| format!("record {} vanished after upsert", fp))
    }

    async fn set_aliases(&self, fingerprint: &Fingerprint, aliases: &[String]) -> Result<()> {
        sqlx::query("UPDATE documents SET aliases_json = ? WHERE fingerprint = ?")
            .bind(serde_json::to_string(aliases)?)
            .bind(fingerprint.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lookup_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<DocumentRecord>> {
        self.fetch_one_where("fingerprint = ?", &fingerprint.to_hex())
            .await
    }

    async fn lookup_by_path(&self, path: &str) -> Result<Option<DocumentRecord>> {
        if let Some(rec) = self.fetch_one_where("current_path = ?", path).await? {
            return Ok(Some(rec));
        }
        self.fetch_one_where(
            "EXISTS (SELECT 1 FROM json_each(documents.aliases_json) WHERE value = ?)",
            path,
        )
        .await
    }

    async fn list_page(
        &self,
        after: Option<&Fingerprint>,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>> {
        // Lower-case hex sorts the same as the raw bytes.
        let after = after.map(Fingerprint::to_hex).unwrap_or_default();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM documents WHERE fingerprint > ? \
             ORDER BY fingerprint ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn mark_missing(&self, fingerprint: &Fingerprint) -> Result<Option<u32>> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE documents SET missing_syncs = missing_syncs + 1 WHERE fingerprint = ? \
             RETURNING missing_syncs",
        )
        .bind(fingerprint.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.map(|c| c.clamp(0, u32::MAX as i64) as u32))
    }

    async fn set_extraction_state(
        &self,
        fingerprint: &Fingerprint,
        state: ExtractionState,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET extraction_state = ?, last_error = ? WHERE fingerprint = ?")
            .bind(state.as_str())
            .bind(error)
            .bind(fingerprint.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_indexed_state(
        &self,
        fingerprint: &Fingerprint,
        state: IndexedState,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET indexed_state = ? WHERE fingerprint = ?")
            .bind(state.as_str())
            .bind(fingerprint.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_text(&self, fingerprint: &Fingerprint, text: &str) -> Result<()> {
        let fp = fingerprint.to_hex();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE documents SET extraction_state = 'extracted', last_error = NULL \
             WHERE fingerprint = ?",
        )
        .bind(&fp)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO document_text (fingerprint, text, extracted_at)
            VALUES (?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                text = excluded.text,
                extracted_at = excluded.extracted_at
            "#,
        )
        .bind(&fp)
        .bind(text)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_text(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        let text: Option<String> =
            sqlx::query_scalar("SELECT text FROM document_text WHERE fingerprint = ?")
                .bind(fingerprint.to_hex())
                .fetch_optional(&self.pool)
                .await?;
        Ok(text)
    }

    async fn mark_pending_delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE documents SET pending_delete = 1, indexed_state = 'stale' WHERE fingerprint = ?",
        )
        .bind(fingerprint.to_hex())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let fp = fingerprint.to_hex();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_text WHERE fingerprint = ?")
            .bind(&fp)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM documents WHERE fingerprint = ?")
            .bind(&fp)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(extraction_state = 'pending'), 0) AS pending,
                   COALESCE(SUM(extraction_state = 'extracted'), 0) AS extracted,
                   COALESCE(SUM(extraction_state = 'failed'), 0) AS failed,
                   COALESCE(SUM(indexed_state = 'unindexed'), 0) AS unindexed,
                   COALESCE(SUM(indexed_state = 'indexed'), 0) AS indexed,
                   COALESCE(SUM(indexed_state = 'stale'), 0) AS stale,
                   COALESCE(SUM(missing_syncs > 0), 0) AS missing,
                   COALESCE(SUM(pending_delete), 0) AS pending_delete,
                   COALESCE(SUM(aliases_json != '[]'), 0) AS with_aliases
            FROM documents
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let get = |name: &str| -> u64 { row.get::<i64, _>(name).max(0) as u64 };
        Ok(StoreCounts {
            total: get("total"),
            pending: get("pending"),
            extracted: get("extracted"),
            failed: get("failed"),
            unindexed: get("unindexed"),
            indexed: get("indexed"),
            stale: get("stale"),
            missing: get("missing"),
            pending_delete: get("pending_delete"),
            with_aliases: get("with_aliases"),
        })
    }
}
