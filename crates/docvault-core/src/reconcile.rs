//! Sync classification.
//!
//! [`classify`] is a pure function from the files observed in one scan and
//! a snapshot of the metadata store to a [`SyncPlan`]: the minimal set of
//! tagged operations that brings the store back in line with the disk.
//! It does no I/O, so the whole state machine is tested without files,
//! databases, or an index.
//!
//! # Classification
//!
//! | Observation | Stored record | Result |
//! |-------------|---------------|--------|
//! | fingerprint unknown | n/a | `Insert` (new, or modified if the path held other content) |
//! | fingerprint known | same canonical path | nothing, or `Refresh` if size/mtime/aliases/missing changed |
//! | fingerprint known | different path | `Relocate` (metadata only) |
//! | fingerprint known | stored path outside the scanned tree | `Refresh` adding the observed paths as aliases |
//! | n/a | record in scope, not observed, alias outside the tree | `Relocate` to that alias |
//! | n/a | record in scope, not observed | `MarkMissing`, then `Remove` once the retention threshold is hit |
//! | n/a | tombstoned record | `Remove` (retry of an unfinished deletion) |
//!
//! Known records whose extraction or indexing is incomplete additionally
//! get a `Retry`.
//!
//! # Determinism
//!
//! Observations are grouped by fingerprint in a `BTreeMap` and each group
//! is sorted by path, so the plan does not depend on enumeration order.
//! The canonical path of a group is the stored path if still observed,
//! otherwise the newest mtime with the smallest path breaking ties.

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::models::{DocumentRecord, Fingerprint, ObservedFile};

/// Knobs for one classification pass.
#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    /// Records whose paths lie under this root age out when unobserved.
    /// `None` disables aging entirely (additive indexing).
    pub scope: Option<PathBuf>,
    /// Consecutive missed syncs after which a record is removed.
    /// `0` keeps missing records forever.
    pub missing_syncs_before_delete: u32,
}

/// One store mutation or processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOp {
    /// Content not yet in the store: create the record, extract, index.
    Insert {
        file: ObservedFile,
        aliases: Vec<String>,
        /// Record that previously owned this path (the file was modified).
        supersedes: Option<Fingerprint>,
    },
    /// Known content now lives elsewhere. Metadata only.
    Relocate {
        fingerprint: Fingerprint,
        from: String,
        file: ObservedFile,
        aliases: Vec<String>,
    },
    /// Known content at its stored path with changed size, mtime, aliases,
    /// or a missing counter to reset. Metadata only.
    Refresh {
        fingerprint: Fingerprint,
        file: Option<ObservedFile>,
        aliases: Vec<String>,
    },
    /// Extraction or indexing is incomplete for known content.
    Retry { fingerprint: Fingerprint, path: String },
    /// Not observed in scope this pass.
    MarkMissing {
        fingerprint: Fingerprint,
        missing_syncs: u32,
    },
    /// Delete the record and its index entry.
    Remove { fingerprint: Fingerprint },
}

impl SyncOp {
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            SyncOp::Insert { file, .. } => file.fingerprint,
            SyncOp::Relocate { fingerprint, .. }
            | SyncOp::Refresh { fingerprint, .. }
            | SyncOp::Retry { fingerprint, .. }
            | SyncOp::MarkMissing { fingerprint, .. }
            | SyncOp::Remove { fingerprint } => *fingerprint,
        }
    }
}

/// Content observed at more than one path in a single pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    pub canonical: String,
    pub others: Vec<String>,
}

/// Output of [`classify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub ops: Vec<SyncOp>,
    /// Observed fingerprints needing no metadata change.
    pub unchanged: usize,
    pub duplicates: Vec<DuplicateGroup>,
}

/// Per-kind tallies of a plan, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    pub new: usize,
    pub modified: usize,
    pub moved: usize,
    pub refreshed: usize,
    pub retried: usize,
    pub missing: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl SyncPlan {
    /// True when applying the plan would not touch either store.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn counts(&self) -> PlanCounts {
        let mut c = PlanCounts {
            unchanged: self.unchanged,
            ..Default::default()
        };
        for op in &self.ops {
            match op {
                SyncOp::Insert {
                    supersedes: Some(_),
                    ..
                } => c.modified += 1,
                SyncOp::Insert { .. } => c.new += 1,
                SyncOp::Relocate { .. } => c.moved += 1,
                SyncOp::Refresh { .. } => c.refreshed += 1,
                SyncOp::Retry { .. } => c.retried += 1,
                SyncOp::MarkMissing { .. } => c.missing += 1,
                SyncOp::Remove { .. } => c.removed += 1,
            }
        }
        c
    }

    /// Operations grouped per fingerprint, in plan order.
    ///
    /// Each group must be applied sequentially; distinct groups are
    /// independent of each other.
    pub fn into_groups(self) -> Vec<(Fingerprint, Vec<SyncOp>)> {
        let mut order: Vec<Fingerprint> = Vec::new();
        let mut groups: HashMap<Fingerprint, Vec<SyncOp>> = HashMap::new();
        for op in self.ops {
            let fp = op.fingerprint();
            groups
                .entry(fp)
                .or_insert_with(|| {
                    order.push(fp);
                    Vec::new()
                })
                .push(op);
        }
        order
            .into_iter()
            .filter_map(|fp| groups.remove(&fp).map(|ops| (fp, ops)))
            .collect()
    }
}

/// Classify one scan against a store snapshot.
pub fn classify(
    observed: &[ObservedFile],
    snapshot: &[DocumentRecord],
    opts: &ClassifyOptions,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    let records: HashMap<Fingerprint, &DocumentRecord> =
        snapshot.iter().map(|r| (r.fingerprint, r)).collect();
    let path_owner: HashMap<&str, Fingerprint> = snapshot
        .iter()
        .filter(|r| !r.pending_delete)
        .map(|r| (r.current_path.as_str(), r.fingerprint))
        .collect();

    let groups = group_observed(observed);
    let in_scope = |p: &str| match &opts.scope {
        Some(root) => Path::new(p).starts_with(root),
        None => false,
    };

    // Unfinished deletions come first so a tombstone never lingers behind
    // work for other content.
    let mut tombstones: Vec<&DocumentRecord> =
        snapshot.iter().filter(|r| r.pending_delete).collect();
    tombstones.sort_by_key(|r| r.fingerprint);
    for rec in tombstones {
        plan.ops.push(SyncOp::Remove {
            fingerprint: rec.fingerprint,
        });
    }

    for (fp, files) in &groups {
        let stored = records.get(fp).copied().filter(|r| !r.pending_delete);
        let Some(canonical) = pick_canonical(files, stored.map(|r| r.current_path.as_str()))
        else {
            continue;
        };
        let others: Vec<String> = files
            .iter()
            .filter(|f| f.path != canonical.path)
            .map(|f| f.path.clone())
            .collect();
        if !others.is_empty() {
            plan.duplicates.push(DuplicateGroup {
                fingerprint: *fp,
                canonical: canonical.path.clone(),
                others: others.clone(),
            });
        }

        match stored {
            None => {
                // A tombstoned fingerprint is re-added on the pass after its
                // removal completes.
                if records.contains_key(fp) {
                    continue;
                }
                let supersedes = std::iter::once(canonical)
                    .chain(files.iter().filter(|f| f.path != canonical.path))
                    .find_map(|f| path_owner.get(f.path.as_str()).copied())
                    .filter(|owner| owner != fp);
                plan.ops.push(SyncOp::Insert {
                    file: canonical.clone(),
                    aliases: others,
                    supersedes,
                });
            }
            Some(rec) => {
                let stored_unchecked = canonical.path != rec.current_path
                    && !in_scope(&rec.current_path)
                    && !rec.is_missing();
                if stored_unchecked {
                    // The stored path lies outside this pass and stays
                    // canonical; every observed copy becomes an alias.
                    let observed: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
                    let aliases = merge_aliases(rec, &rec.current_path, &observed, &in_scope);
                    if aliases != rec.aliases {
                        plan.ops.push(SyncOp::Refresh {
                            fingerprint: *fp,
                            file: None,
                            aliases,
                        });
                    } else {
                        plan.unchanged += 1;
                    }
                    if rec.needs_processing() {
                        plan.ops.push(SyncOp::Retry {
                            fingerprint: *fp,
                            path: canonical.path.clone(),
                        });
                    }
                    continue;
                }
                let aliases = merge_aliases(rec, &canonical.path, &others, &in_scope);
                if canonical.path != rec.current_path {
                    plan.ops.push(SyncOp::Relocate {
                        fingerprint: *fp,
                        from: rec.current_path.clone(),
                        file: canonical.clone(),
                        aliases,
                    });
                } else if canonical.size != rec.size
                    || canonical.mtime != rec.last_seen_mtime
                    || aliases != rec.aliases
                    || rec.is_missing()
                {
                    plan.ops.push(SyncOp::Refresh {
                        fingerprint: *fp,
                        file: Some(canonical.clone()),
                        aliases,
                    });
                } else {
                    plan.unchanged += 1;
                }
                if rec.needs_processing() {
                    plan.ops.push(SyncOp::Retry {
                        fingerprint: *fp,
                        path: canonical.path.clone(),
                    });
                }
            }
        }
    }

    let mut unseen: Vec<&DocumentRecord> = snapshot
        .iter()
        .filter(|r| !r.pending_delete && !groups.contains_key(&r.fingerprint))
        .collect();
    unseen.sort_by_key(|r| r.fingerprint);

    if opts.scope.is_none() {
        // Without a scope only content known to be overwritten ages.
        let superseded: HashSet<Fingerprint> = plan
            .ops
            .iter()
            .filter_map(|op| match op {
                SyncOp::Insert { supersedes, .. } => *supersedes,
                _ => None,
            })
            .collect();
        for rec in unseen {
            if superseded.contains(&rec.fingerprint) {
                plan.ops.extend(age(rec, opts));
            }
        }
        return plan;
    }

    for rec in unseen {
        if in_scope(&rec.current_path) {
            match rec.aliases.iter().find(|a| !in_scope(a)) {
                // A copy outside the scanned tree takes over as canonical.
                Some(alias) => plan.ops.push(SyncOp::Relocate {
                    fingerprint: rec.fingerprint,
                    from: rec.current_path.clone(),
                    file: ObservedFile {
                        path: alias.clone(),
                        fingerprint: rec.fingerprint,
                        size: rec.size,
                        mtime: rec.last_seen_mtime,
                    },
                    aliases: rec
                        .aliases
                        .iter()
                        .filter(|a| *a != alias && !in_scope(a))
                        .cloned()
                        .collect(),
                }),
                None => plan.ops.extend(age(rec, opts)),
            }
        } else if rec.aliases.iter().any(|a| in_scope(a)) {
            // Canonical copy lives outside the scanned tree; only the
            // aliases we could check are dropped.
            let aliases: Vec<String> = rec
                .aliases
                .iter()
                .filter(|a| !in_scope(a))
                .cloned()
                .collect();
            plan.ops.push(SyncOp::Refresh {
                fingerprint: rec.fingerprint,
                file: None,
                aliases,
            });
        }
    }

    plan
}

/// One more missed sync for `rec`, or its removal once the threshold is hit.
///
/// With a threshold of `0` the counter stops at 1: the record is flagged
/// missing once and later passes leave it untouched.
fn age(rec: &DocumentRecord, opts: &ClassifyOptions) -> Option<SyncOp> {
    let threshold = opts.missing_syncs_before_delete;
    if threshold == 0 && rec.is_missing() {
        return None;
    }
    let missing_syncs = rec.missing_syncs.saturating_add(1);
    Some(if threshold > 0 && missing_syncs >= threshold {
        SyncOp::Remove {
            fingerprint: rec.fingerprint,
        }
    } else {
        SyncOp::MarkMissing {
            fingerprint: rec.fingerprint,
            missing_syncs,
        }
    })
}

/// Group observations by fingerprint, sorted by path, one entry per path.
///
/// A path seen twice with different content (it changed mid-scan) keeps the
/// newest observation, ties going to the smaller fingerprint.
fn group_observed(observed: &[ObservedFile]) -> BTreeMap<Fingerprint, Vec<ObservedFile>> {
    let mut by_path: BTreeMap<&str, &ObservedFile> = BTreeMap::new();
    for f in observed {
        by_path
            .entry(f.path.as_str())
            .and_modify(|cur| {
                if (f.mtime, Reverse(f.fingerprint)) > (cur.mtime, Reverse(cur.fingerprint)) {
                    *cur = f;
                }
            })
            .or_insert(f);
    }

    let mut groups: BTreeMap<Fingerprint, Vec<ObservedFile>> = BTreeMap::new();
    for f in by_path.into_values() {
        groups.entry(f.fingerprint).or_default().push(f.clone());
    }
    // by_path iterates in path order, so each group is already sorted.
    groups
}

fn pick_canonical<'a>(
    files: &'a [ObservedFile],
    stored_path: Option<&str>,
) -> Option<&'a ObservedFile> {
    if let Some(stored) = stored_path {
        if let Some(f) = files.iter().find(|f| f.path == stored) {
            return Some(f);
        }
    }
    files
        .iter()
        .max_by_key(|f| (f.mtime, Reverse(f.path.as_str())))
}

/// Observed duplicates plus stored aliases this pass could not check.
fn merge_aliases(
    rec: &DocumentRecord,
    canonical: &str,
    observed_others: &[String],
    in_scope: &impl Fn(&str) -> bool,
) -> Vec<String> {
    let observed: HashSet<&str> = observed_others.iter().map(String::as_str).collect();
    let mut set: BTreeSet<String> = observed_others.iter().cloned().collect();
    for alias in &rec.aliases {
        if alias != canonical && !in_scope(alias) && !observed.contains(alias.as_str()) {
            set.insert(alias.clone());
        }
    }
    set.into_iter().collect()
}
