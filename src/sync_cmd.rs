//! `sync`, `index` and `delete` commands.
//!
//! Per-file failures are listed in the summary and never change the exit
//! status; only store-level errors propagate out of these functions.

use anyhow::{Context, Result};
use std::path::Path;

use docvault_core::Fingerprint;

use crate::config::Config;
use crate::progress::ProgressMode;
use crate::reconciler::{DeleteOutcome, SyncSummary};
use crate::vault::Vault;

pub async fn run_sync(
    config: &Config,
    root: &Path,
    dry_run: bool,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    let vault = Vault::open(config).await?;
    let reporter = progress.reporter();
    let result = vault.reconciler.sync(root, dry_run, reporter.as_ref()).await;
    vault.close().await;
    print_summary("sync", &result?, json)
}

pub async fn run_index(config: &Config, path: &Path, progress: ProgressMode, json: bool) -> Result<()> {
    let vault = Vault::open(config).await?;
    let reporter = progress.reporter();
    let result = vault.reconciler.index(path, reporter.as_ref()).await;
    vault.close().await;
    print_summary("index", &result?, json)
}

/// Delete by fingerprint (`hash`) or by path. Unknown targets are reported,
/// not errors.
pub async fn run_delete(config: &Config, hash: Option<&str>, path: Option<&Path>) -> Result<()> {
    let vault = Vault::open(config).await?;
    let outcome = match (hash, path) {
        (Some(hash), _) => {
            let fp: Fingerprint = hash
                .trim()
                .parse()
                .with_context(|| format!("Invalid fingerprint: {}", hash))?;
            vault.reconciler.delete(&fp).await
        }
        (None, Some(path)) => {
            let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            vault
                .reconciler
                .delete_path(&resolved.to_string_lossy())
                .await
        }
        (None, None) => Ok(DeleteOutcome::NotFound),
    };
    vault.close().await;

    match outcome? {
        DeleteOutcome::NotFound => println!("not found"),
        DeleteOutcome::Deleted { path } => {
            println!("deleted");
            println!("  path: {}", path);
        }
        DeleteOutcome::Pending { path, error } => {
            println!("delete pending");
            println!("  path: {}", path);
            println!("  index error: {}", error);
            println!("  the next sync retries the removal");
        }
    }
    Ok(())
}

fn print_summary(command: &str, s: &SyncSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(s)?);
        return Ok(());
    }

    if s.dry_run {
        println!("{} {} (dry-run)", command, s.root);
    } else {
        println!("{} {}", command, s.root);
    }
    println!("  scanned: {} files", s.scanned);
    println!("  new: {}", s.plan.new);
    println!("  modified: {}", s.plan.modified);
    println!("  moved: {}", s.plan.moved);
    println!("  unchanged: {}", s.plan.unchanged);
    if s.plan.refreshed > 0 {
        println!("  refreshed: {}", s.plan.refreshed);
    }
    if s.plan.retried > 0 {
        println!("  retried: {}", s.plan.retried);
    }
    println!("  missing: {}", s.plan.missing);
    if s.dry_run {
        println!("  to delete: {}", s.plan.removed);
    } else {
        println!("  deleted: {}", s.deleted);
        println!("  extracted: {}", s.extracted);
        println!("  indexed: {}", s.indexed);
    }
    if s.duplicates > 0 {
        println!("  duplicate groups: {}", s.duplicates);
    }
    println!("  failed: {}", s.failed());
    for f in &s.failures {
        let kind = if f.permanent { "skipped" } else { "will retry" };
        println!(
            "    {} [{:?}, {}]: {}",
            f.path,
            f.stage,
            kind,
            f.error.replace('\n', " ")
        );
    }
    println!("  elapsed: {} ms", s.elapsed_ms);
    println!("ok");
    Ok(())
}
