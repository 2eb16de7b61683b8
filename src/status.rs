//! `status` and `files` commands.
//!
//! `status` summarizes both databases: where they live, how big they are,
//! how many records sit in each state, and how many fingerprints the
//! vector index holds. A healthy vault has `indexed` equal to the index
//! entry count.

use anyhow::Result;
use std::path::Path;

use docvault_core::gateway::VectorIndex;
use docvault_core::store::MetadataStore;

use crate::config::Config;
use crate::vault::Vault;

pub async fn run_status(config: &Config) -> Result<()> {
    let vault = Vault::open(config).await?;
    let counts = vault.store.counts().await;
    let entries = vault.index.entry_count().await;
    let chunk_stats = vault.index.chunk_stats().await;
    vault.close().await;
    let counts = counts?;
    let (chunks, vectors) = chunk_stats?;

    let meta_path = config.db.path.clone();
    let index_path = config.index_path();

    println!("docvault status");
    println!("===============");
    println!();
    println!("  Metadata:    {} ({})", meta_path.display(), format_bytes(db_size(&meta_path)));
    println!("  Index:       {} ({})", index_path.display(), format_bytes(db_size(&index_path)));
    println!();
    println!("  Documents:   {}", counts.total);
    println!(
        "  Extraction:  {} extracted, {} pending, {} failed",
        counts.extracted, counts.pending, counts.failed
    );
    println!(
        "  Indexing:    {} indexed, {} unindexed, {} stale",
        counts.indexed, counts.unindexed, counts.stale
    );
    println!("  Missing:     {}", counts.missing);
    println!("  Tombstoned:  {}", counts.pending_delete);
    println!("  With copies: {}", counts.with_aliases);
    println!();
    match entries {
        Ok(n) => println!("  Index entries: {}", n),
        Err(e) => println!("  Index entries: unavailable ({})", e),
    }
    println!("  Chunks:      {}", chunks);
    println!("  Embedded:    {} / {}", vectors, chunks);
    println!();
    Ok(())
}

/// List tracked records, newest first.
pub async fn run_files(
    config: &Config,
    name: Option<&str>,
    limit: usize,
    include_missing: bool,
) -> Result<()> {
    let vault = Vault::open(config).await?;
    let records = vault.store.list_recent(name, limit, include_missing).await;
    vault.close().await;
    let records = records?;

    if records.is_empty() {
        println!("No files.");
        return Ok(());
    }

    println!(
        "{:<12}  {:<9}  {:<9}  {:<16}  PATH",
        "FINGERPRINT", "EXTRACT", "INDEX", "FIRST SEEN"
    );
    for rec in &records {
        let mut flags = String::new();
        if rec.pending_delete {
            flags.push_str("  [deleting]");
        } else if rec.is_missing() {
            flags.push_str(&format!("  [missing x{}]", rec.missing_syncs));
        }
        if !rec.aliases.is_empty() {
            flags.push_str(&format!("  (+{} copies)", rec.aliases.len()));
        }
        println!(
            "{:<12}  {:<9}  {:<9}  {:<16}  {}{}",
            rec.fingerprint.short(12),
            rec.extraction_state.as_str(),
            rec.indexed_state.as_str(),
            format_ts(rec.first_seen_at),
            rec.current_path,
            flags
        );
    }
    Ok(())
}

fn db_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

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

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(0), "1970-01-01 00:00");
    }
}
