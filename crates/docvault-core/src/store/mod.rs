//! Metadata Store abstraction.
//!
//! The [`MetadataStore`] trait is the authoritative mapping from content
//! fingerprint to [`DocumentRecord`]. The runner is its only writer; the
//! searcher only reads. Backends: [`memory::InMemoryMetadataStore`] here,
//! and the SQLite store in the application crate.
//!
//! Every mutating call is a single atomic step on one record, so a sync
//! interrupted at any point leaves each record either before or after
//! its last write, never half-written.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{DocumentRecord, ExtractionState, Fingerprint, IndexedState, ObservedFile};

/// Page size used by the provided [`MetadataStore::list_all`].
pub const LIST_PAGE_SIZE: usize = 500;

/// Record tallies for `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub total: u64,
    pub pending: u64,
    pub extracted: u64,
    pub failed: u64,
    pub unindexed: u64,
    pub indexed: u64,
    pub stale: u64,
    pub missing: u64,
    pub pending_delete: u64,
    pub with_aliases: u64,
}

impl StoreCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a DocumentRecord>) -> Self {
        let mut c = StoreCounts::default();
        for r in records {
            c.total += 1;
            match r.extraction_state {
                ExtractionState::Pending => c.pending += 1,
                ExtractionState::Extracted => c.extracted += 1,
                ExtractionState::Failed => c.failed += 1,
            }
            match r.indexed_state {
                IndexedState::Unindexed => c.unindexed += 1,
                IndexedState::Indexed => c.indexed += 1,
                IndexedState::Stale => c.stale += 1,
            }
            if r.is_missing() {
                c.missing += 1;
            }
            if r.pending_delete {
                c.pending_delete += 1;
            }
            if !r.aliases.is_empty() {
                c.with_aliases += 1;
            }
        }
        c
    }
}

/// Durable fingerprint-keyed record table.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](MetadataStore::upsert) | Insert, or move/refresh an existing record |
/// | [`lookup_by_fingerprint`](MetadataStore::lookup_by_fingerprint) | Primary-key lookup |
/// | [`lookup_by_path`](MetadataStore::lookup_by_path) | Canonical or alias path lookup |
/// | [`list_page`](MetadataStore::list_page) | Keyset page in fingerprint order |
/// | [`mark_missing`](MetadataStore::mark_missing) | Count one more missed sync |
/// | [`mark_pending_delete`](MetadataStore::mark_pending_delete) | Tombstone before index removal |
/// | [`delete`](MetadataStore::delete) | Remove record and stored text |
///
/// Mutations addressed at an unknown fingerprint are no-ops.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record, or update path, size, mtime, aliases and
    /// `last_seen_at` of an existing one and clear its missing counter.
    ///
    /// Extraction and index state survive a move untouched. Calling twice
    /// with identical arguments leaves the record unchanged.
    async fn upsert(
        &self,
        file: &ObservedFile,
        aliases: &[String],
        now: i64,
    ) -> Result<DocumentRecord>;

    /// Replace the alias list only.
    async fn set_aliases(&self, fingerprint: &Fingerprint, aliases: &[String]) -> Result<()>;

    async fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint)
        -> Result<Option<DocumentRecord>>;

    /// Record whose canonical path, or failing that an alias, equals `path`.
    async fn lookup_by_path(&self, path: &str) -> Result<Option<DocumentRecord>>;

    /// Up to `limit` records with fingerprint strictly greater than `after`,
    /// in fingerprint order.
    async fn list_page(
        &self,
        after: Option<&Fingerprint>,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>>;

    /// Every record, read page by page so each call reflects the latest
    /// committed state.
    async fn list_all(&self) -> Result<Vec<DocumentRecord>> {
        let mut out = Vec::new();
        let mut after: Option<Fingerprint> = None;
        loop {
            let page = self.list_page(after.as_ref(), LIST_PAGE_SIZE).await?;
            let done = page.len() < LIST_PAGE_SIZE;
            after = page.last().map(|r| r.fingerprint);
            out.extend(page);
            if done {
                return Ok(out);
            }
        }
    }

    /// Increment the missed-sync counter. Returns the new count, or `None`
    /// if no such record exists.
    async fn mark_missing(&self, fingerprint: &Fingerprint) -> Result<Option<u32>>;

    /// Set the extraction state; `error` replaces `last_error`.
    async fn set_extraction_state(
        &self,
        fingerprint: &Fingerprint,
        state: ExtractionState,
        error: Option<&str>,
    ) -> Result<()>;

    async fn set_indexed_state(&self, fingerprint: &Fingerprint, state: IndexedState)
        -> Result<()>;

    /// Store extracted text and mark the record `extracted` in one step.
    async fn put_text(&self, fingerprint: &Fingerprint, text: &str) -> Result<()>;

    async fn get_text(&self, fingerprint: &Fingerprint) -> Result<Option<String>>;

    /// Tombstone: set `pending_delete` and `indexed_state = stale`.
    /// Returns false if the record does not exist.
    async fn mark_pending_delete(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Remove the record and its text. Returns false if nothing was removed.
    async fn delete(&self, fingerprint: &Fingerprint) -> Result<bool>;

    async fn counts(&self) -> Result<StoreCounts> {
        let all = self.list_all().await?;
        Ok(StoreCounts::tally(&all))
    }
}
