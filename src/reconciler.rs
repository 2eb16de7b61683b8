//! The Reconciler runner.
//!
//! Drives one pass: discover files, fingerprint them, snapshot the
//! Metadata Store, classify with [`docvault_core::reconcile::classify`],
//! then apply the plan. Operations are grouped per fingerprint; a group
//! runs sequentially in one task and up to `sync.workers` groups run at
//! once.
//!
//! # Failure handling
//!
//! | Failure | Effect |
//! |---------|--------|
//! | unreadable file or directory | skipped, logged; records under it do not age this pass |
//! | permanent extraction error | record `failed` with `last_error` |
//! | transient extraction error or timeout | record stays `pending`, retried next pass |
//! | index error or timeout | record stays `stale`, retried next pass |
//! | Metadata Store error | pass aborted, error returned |
//!
//! # Index consistency
//!
//! A record is set `stale` before the index is asked to upsert and only
//! becomes `indexed` after the upsert returns. Deletion tombstones the
//! record first, asks the index to delete, and only then removes the
//! record, so a failed index call is retried on the next pass.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use docvault_core::fingerprint::fingerprint_bytes;
use docvault_core::gateway::{ExtractionError, Extractor, IndexError, VectorIndex};
use docvault_core::reconcile::{classify, ClassifyOptions, PlanCounts, SyncOp, SyncPlan};
use docvault_core::store::MetadataStore;
use docvault_core::{DocumentRecord, ExtractionState, Fingerprint, IndexedState};

use crate::config::{Config, ScanConfig};
use crate::hasher::hash_files;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::scan::scan;

/// Runner knobs taken from [`Config`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub scan: ScanConfig,
    pub workers: usize,
    pub missing_syncs_before_delete: u32,
    pub extract_timeout: Duration,
    pub index_timeout: Duration,
    pub max_file_bytes: u64,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scan: config.scan.clone(),
            workers: config.sync.workers,
            missing_syncs_before_delete: config.sync.missing_syncs_before_delete,
            extract_timeout: config.sync.extract_timeout(),
            index_timeout: config.sync.index_timeout(),
            max_file_bytes: config.extraction.max_file_bytes,
        }
    }
}

/// `sync` ages unobserved records under the root; `index` never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sync,
    Index,
}

/// Where a per-file failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Read,
    Extract,
    Index,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub stage: FailureStage,
    /// False when the next pass will try again.
    pub permanent: bool,
    pub error: String,
}

/// Outcome of one pass, printed by the CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub root: String,
    pub dry_run: bool,
    pub scanned: usize,
    pub plan: PlanCounts,
    pub duplicates: usize,
    pub extracted: usize,
    pub indexed: usize,
    pub deleted: usize,
    pub failures: Vec<FileFailure>,
    pub elapsed_ms: u64,
}

impl SyncSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn absorb(&mut self, report: GroupReport) {
        self.extracted += report.extracted;
        self.indexed += report.indexed;
        self.deleted += report.deleted;
        self.failures.extend(report.failures);
    }
}

/// Result of an explicit delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    NotFound,
    Deleted { path: String },
    /// Tombstoned; the index refused the removal and the next pass retries.
    Pending { path: String, error: String },
}

#[derive(Debug, Default)]
struct GroupReport {
    extracted: usize,
    indexed: usize,
    deleted: usize,
    failures: Vec<FileFailure>,
}

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn Extractor>,
    settings: Arc<RunSettings>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn Extractor>,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            index,
            extractor,
            settings: Arc::new(settings),
        }
    }

    /// Bring the store in line with everything under `root`.
    pub async fn sync(
        &self,
        root: &Path,
        dry_run: bool,
        progress: &dyn SyncProgressReporter,
    ) -> Result<SyncSummary> {
        self.run(root, RunMode::Sync, dry_run, progress).await
    }

    /// Add or update a file or tree without ageing anything.
    pub async fn index(&self, path: &Path, progress: &dyn SyncProgressReporter) -> Result<SyncSummary> {
        self.run(path, RunMode::Index, false, progress).await
    }

    pub async fn run(
        &self,
        root: &Path,
        mode: RunMode,
        dry_run: bool,
        progress: &dyn SyncProgressReporter,
    ) -> Result<SyncSummary> {
        let started = Instant::now();
        progress.report(SyncProgressEvent::Discovering {
            root: root.display().to_string(),
        });
        let outcome = scan(root, &self.settings.scan)?;
        tracing::info!(root = %outcome.root.display(), files = outcome.files.len(), ?mode, "scan complete");

        let (observed, hash_failures) =
            hash_files(outcome.files.clone(), self.settings.workers, progress).await;

        let mut blocked: Vec<PathBuf> = outcome.unreadable.clone();
        blocked.extend(hash_failures.iter().map(|f| f.path.clone()));

        let snapshot = self.store.list_all().await?;
        let opts = ClassifyOptions {
            scope: match mode {
                RunMode::Sync => Some(outcome.root.clone()),
                RunMode::Index => None,
            },
            missing_syncs_before_delete: self.settings.missing_syncs_before_delete,
        };
        let mut plan = classify(&observed, &snapshot, &opts);
        protect_unreadable(&mut plan, &snapshot, &blocked);

        for dup in &plan.duplicates {
            tracing::warn!(
                fingerprint = %dup.fingerprint.short(12),
                canonical = %dup.canonical,
                aliases = ?dup.others,
                "identical content at several paths; tracking one record"
            );
        }

        let mut summary = SyncSummary {
            root: outcome.root.display().to_string(),
            dry_run,
            scanned: outcome.files.len(),
            plan: plan.counts(),
            duplicates: plan.duplicates.len(),
            failures: hash_failures
                .into_iter()
                .map(|f| FileFailure {
                    path: f.path.display().to_string(),
                    fingerprint: None,
                    stage: FailureStage::Read,
                    permanent: false,
                    error: f.error,
                })
                .collect(),
            ..Default::default()
        };

        if !dry_run {
            self.apply(plan, progress, &mut summary).await?;
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            new = summary.plan.new,
            modified = summary.plan.modified,
            moved = summary.plan.moved,
            missing = summary.plan.missing,
            removed = summary.plan.removed,
            failed = summary.failed(),
            dry_run,
            "pass complete"
        );
        Ok(summary)
    }

    /// Apply `plan` group by group. The first store error aborts the pass;
    /// groups already finished stay committed.
    async fn apply(
        &self,
        plan: SyncPlan,
        progress: &dyn SyncProgressReporter,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let groups = plan.into_groups();
        let total = groups.len() as u64;
        let workers = self.settings.workers.max(1);
        let mut tasks: JoinSet<Result<GroupReport>> = JoinSet::new();
        let mut done = 0u64;

        for (_, ops) in groups {
            while tasks.len() >= workers {
                if let Some(joined) = tasks.join_next().await {
                    summary.absorb(joined??);
                    done += 1;
                    progress.report(SyncProgressEvent::Applying { n: done, total });
                }
            }
            let worker = self.clone();
            tasks.spawn(async move { worker.apply_group(ops).await });
        }
        while let Some(joined) = tasks.join_next().await {
            summary.absorb(joined??);
            done += 1;
            progress.report(SyncProgressEvent::Applying { n: done, total });
        }
        Ok(())
    }

    async fn apply_group(&self, ops: Vec<SyncOp>) -> Result<GroupReport> {
        let mut report = GroupReport::default();
        let now = chrono::Utc::now().timestamp();

        for op in ops {
            match op {
                SyncOp::Insert {
                    file,
                    aliases,
                    supersedes,
                } => {
                    tracing::debug!(path = %file.path, fingerprint = %file.fingerprint.short(12), ?supersedes, "new content");
                    let rec = self.store.upsert(&file, &aliases, now).await?;
                    self.process(rec, &mut report).await?;
                }
                SyncOp::Relocate {
                    fingerprint,
                    from,
                    file,
                    aliases,
                } => {
                    tracing::info!(fingerprint = %fingerprint.short(12), %from, to = %file.path, "moved");
                    self.store.upsert(&file, &aliases, now).await?;
                }
                SyncOp::Refresh {
                    fingerprint,
                    file,
                    aliases,
                } => match file {
                    Some(file) => {
                        self.store.upsert(&file, &aliases, now).await?;
                    }
                    None => self.store.set_aliases(&fingerprint, &aliases).await?,
                },
                SyncOp::Retry { fingerprint, .. } => {
                    if let Some(rec) = self.store.lookup_by_fingerprint(&fingerprint).await? {
                        self.process(rec, &mut report).await?;
                    }
                }
                SyncOp::MarkMissing { fingerprint, .. } => {
                    let count = self.store.mark_missing(&fingerprint).await?;
                    tracing::debug!(fingerprint = %fingerprint.short(12), missing_syncs = ?count, "not observed");
                }
                SyncOp::Remove { fingerprint } => {
                    if let Some(rec) = self.store.lookup_by_fingerprint(&fingerprint).await? {
                        match self.remove(&rec).await? {
                            Ok(()) => report.deleted += 1,
                            Err(e) => report.failures.push(FileFailure {
                                path: rec.current_path.clone(),
                                fingerprint: Some(fingerprint),
                                stage: FailureStage::Delete,
                                permanent: false,
                                error: e.to_string(),
                            }),
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    /// Extract if needed, then index. Per-file failures land in `report`.
    async fn process(&self, rec: DocumentRecord, report: &mut GroupReport) -> Result<()> {
        let fp = rec.fingerprint;
        let text = match rec.extraction_state {
            ExtractionState::Failed => return Ok(()),
            ExtractionState::Pending => match self.extract(&rec).await {
                Ok(text) => {
                    self.store.put_text(&fp, &text).await?;
                    report.extracted += 1;
                    text
                }
                Err((stage, e)) => {
                    let permanent = e.is_permanent();
                    let state = if permanent {
                        ExtractionState::Failed
                    } else {
                        ExtractionState::Pending
                    };
                    tracing::warn!(path = %rec.current_path, error = %e, permanent, "extraction failed");
                    self.store
                        .set_extraction_state(&fp, state, Some(&e.to_string()))
                        .await?;
                    report.failures.push(FileFailure {
                        path: rec.current_path.clone(),
                        fingerprint: Some(fp),
                        stage,
                        permanent,
                        error: e.to_string(),
                    });
                    return Ok(());
                }
            },
            ExtractionState::Extracted => {
                if rec.indexed_state == IndexedState::Indexed {
                    return Ok(());
                }
                match self.store.get_text(&fp).await? {
                    Some(text) => text,
                    None => {
                        // Text lost; extract again next pass.
                        self.store
                            .set_extraction_state(&fp, ExtractionState::Pending, None)
                            .await?;
                        return Ok(());
                    }
                }
            }
        };

        self.store.set_indexed_state(&fp, IndexedState::Stale).await?;
        match self.index_upsert(&fp, &text).await {
            Ok(()) => {
                self.store.set_indexed_state(&fp, IndexedState::Indexed).await?;
                report.indexed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %rec.current_path, error = %e, "index upsert failed; will retry");
                report.failures.push(FileFailure {
                    path: rec.current_path.clone(),
                    fingerprint: Some(fp),
                    stage: FailureStage::Index,
                    permanent: false,
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read the content from any of the record's paths and extract it.
    async fn extract(&self, rec: &DocumentRecord) -> Result<String, (FailureStage, ExtractionError)> {
        if rec.size > self.settings.max_file_bytes {
            return Err((
                FailureStage::Extract,
                ExtractionError::UnsupportedFormat(format!(
                    "{} bytes exceeds the {} byte limit",
                    rec.size, self.settings.max_file_bytes
                )),
            ));
        }

        let mut last_err = String::from("no readable path");
        let mut bytes = None;
        for path in rec.all_paths() {
            match tokio::fs::read(path).await {
                Ok(b) if fingerprint_bytes(&b) == rec.fingerprint => {
                    bytes = Some(b);
                    break;
                }
                Ok(_) => last_err = format!("{} changed since it was hashed", path),
                Err(e) => last_err = format!("{}: {}", path, e),
            }
        }
        let Some(bytes) = bytes else {
            return Err((FailureStage::Read, ExtractionError::Transient(last_err)));
        };

        let extractor = self.extractor.clone();
        let hint = rec.file_type.clone();
        let timeout = self.settings.extract_timeout;
        let job = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &hint));
        match tokio::time::timeout(timeout, job).await {
            Ok(Ok(result)) => result.map_err(|e| (FailureStage::Extract, e)),
            Ok(Err(join)) => Err((
                FailureStage::Extract,
                ExtractionError::Transient(format!("extractor task failed: {}", join)),
            )),
            Err(_) => Err((FailureStage::Extract, ExtractionError::Timeout(timeout))),
        }
    }

    async fn index_upsert(&self, fp: &Fingerprint, text: &str) -> Result<(), IndexError> {
        let timeout = self.settings.index_timeout;
        tokio::time::timeout(timeout, self.index.upsert(fp, text))
            .await
            .unwrap_or(Err(IndexError::Timeout(timeout)))
    }

    async fn index_delete(&self, fp: &Fingerprint) -> Result<(), IndexError> {
        let timeout = self.settings.index_timeout;
        tokio::time::timeout(timeout, self.index.delete(fp))
            .await
            .unwrap_or(Err(IndexError::Timeout(timeout)))
    }

    /// Tombstone, delete from the index, then drop the record. The outer
    /// error is a store failure; the inner one an index failure that
    /// leaves the tombstone in place.
    async fn remove(&self, rec: &DocumentRecord) -> Result<Result<(), IndexError>> {
        let fp = rec.fingerprint;
        if !rec.pending_delete {
            self.store.mark_pending_delete(&fp).await?;
        }
        if let Err(e) = self.index_delete(&fp).await {
            tracing::warn!(fingerprint = %fp.short(12), error = %e, "index delete failed; tombstone kept");
            return Ok(Err(e));
        }
        self.store.delete(&fp).await?;
        tracing::info!(fingerprint = %fp.short(12), path = %rec.current_path, "removed");
        Ok(Ok(()))
    }

    /// Explicit delete by fingerprint.
    pub async fn delete(&self, fingerprint: &Fingerprint) -> Result<DeleteOutcome> {
        let Some(rec) = self.store.lookup_by_fingerprint(fingerprint).await? else {
            return Ok(DeleteOutcome::NotFound);
        };
        let path = rec.current_path.clone();
        Ok(match self.remove(&rec).await? {
            Ok(()) => DeleteOutcome::Deleted { path },
            Err(e) => DeleteOutcome::Pending {
                path,
                error: e.to_string(),
            },
        })
    }

    /// Explicit delete by canonical or alias path.
    pub async fn delete_path(&self, path: &str) -> Result<DeleteOutcome> {
        match self.store.lookup_by_path(path).await? {
            Some(rec) => self.delete(&rec.fingerprint).await,
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}

/// Drop ageing ops for records with a path at or under an entry this pass
/// could not read; their content may still be there.
fn protect_unreadable(plan: &mut SyncPlan, snapshot: &[DocumentRecord], blocked: &[PathBuf]) {
    if blocked.is_empty() {
        return;
    }
    let records: HashMap<Fingerprint, &DocumentRecord> =
        snapshot.iter().map(|r| (r.fingerprint, r)).collect();
    let is_blocked = |rec: &DocumentRecord| {
        rec.all_paths()
            .any(|p| blocked.iter().any(|b| Path::new(p).starts_with(b)))
    };
    plan.ops.retain(|op| match op {
        SyncOp::MarkMissing { fingerprint, .. } | SyncOp::Remove { fingerprint } => {
            match records.get(fingerprint) {
                Some(rec) if !rec.pending_delete && is_blocked(rec) => {
                    tracing::debug!(path = %rec.current_path, "under unreadable path, not aged");
                    false
                }
                _ => true,
            }
        }
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvault_core::ObservedFile;

    fn record(path: &str, content: &[u8]) -> DocumentRecord {
        let file = ObservedFile {
            path: path.to_string(),
            fingerprint: fingerprint_bytes(content),
            size: content.len() as u64,
            mtime: 1,
        };
        DocumentRecord::new(&file, vec![], 1)
    }

    #[test]
    fn test_unreadable_paths_do_not_age() {
        let hidden = record("/docs/locked/a.txt", b"a");
        let gone = record("/docs/b.txt", b"b");
        let mut tomb = record("/docs/locked/c.txt", b"c");
        tomb.pending_delete = true;

        let mut plan = SyncPlan {
            ops: vec![
                SyncOp::MarkMissing {
                    fingerprint: hidden.fingerprint,
                    missing_syncs: 1,
                },
                SyncOp::MarkMissing {
                    fingerprint: gone.fingerprint,
                    missing_syncs: 1,
                },
                SyncOp::Remove {
                    fingerprint: tomb.fingerprint,
                },
            ],
            ..Default::default()
        };
        let snapshot = vec![hidden.clone(), gone.clone(), tomb.clone()];
        protect_unreadable(&mut plan, &snapshot, &[PathBuf::from("/docs/locked")]);

        let fps: Vec<Fingerprint> = plan.ops.iter().map(SyncOp::fingerprint).collect();
        assert_eq!(fps, vec![gone.fingerprint, tomb.fingerprint]);
    }
}
