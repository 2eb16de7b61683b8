//! In-memory [`MetadataStore`] for tests and embedding.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`, so keyset
//! paging is a range scan. A mutation counter lets tests assert that a
//! pass touched nothing.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{
    file_type_of, DocumentRecord, ExtractionState, Fingerprint, IndexedState, ObservedFile,
};

use super::MetadataStore;

/// In-memory metadata store.
pub struct InMemoryMetadataStore {
    records: RwLock<BTreeMap<Fingerprint, DocumentRecord>>,
    texts: RwLock<HashMap<Fingerprint, String>>,
    mutations: AtomicUsize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            texts: RwLock::new(HashMap::new()),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Number of calls that changed a record or its text.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Apply `f` to an existing record; counts as a mutation only if the
    /// record actually changed.
    fn modify(
        &self,
        fingerprint: &Fingerprint,
        f: impl FnOnce(&mut DocumentRecord),
    ) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let Some(rec) = records.get_mut(fingerprint) else {
            return Ok(false);
        };
        let before = rec.clone();
        f(rec);
        if *rec != before {
            self.bump();
        }
        Ok(true)
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("metadata store lock poisoned")
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upsert(
        &self,
        file: &ObservedFile,
        aliases: &[String],
        now: i64,
    ) -> Result<DocumentRecord> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(&file.fingerprint) {
            Some(rec) => {
                let before = rec.clone();
                rec.current_path = file.path.clone();
                rec.file_type = file_type_of(&file.path);
                rec.size = file.size;
                rec.last_seen_mtime = file.mtime;
                rec.aliases = aliases.to_vec();
                rec.missing_syncs = 0;
                // Only a real change refreshes the timestamp.
                if *rec != before {
                    rec.last_seen_at = now;
                    self.bump();
                }
                Ok(rec.clone())
            }
            None => {
                let rec = DocumentRecord::new(file, aliases.to_vec(), now);
                records.insert(file.fingerprint, rec.clone());
                self.bump();
                Ok(rec)
            }
        }
    }

    async fn set_aliases(&self, fingerprint: &Fingerprint, aliases: &[String]) -> Result<()> {
        self.modify(fingerprint, |r| r.aliases = aliases.to_vec())?;
        Ok(())
    }

    async fn lookup_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<DocumentRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(fingerprint).cloned())
    }

    async fn lookup_by_path(&self, path: &str) -> Result<Option<DocumentRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let canonical = records.values().find(|r| r.current_path == path);
        let found = canonical.or_else(|| {
            records
                .values()
                .find(|r| r.aliases.iter().any(|a| a == path))
        });
        Ok(found.cloned())
    }

    async fn list_page(
        &self,
        after: Option<&Fingerprint>,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let lower = match after {
            Some(fp) => Bound::Excluded(*fp),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn mark_missing(&self, fingerprint: &Fingerprint) -> Result<Option<u32>> {
        let mut count = None;
        self.modify(fingerprint, |r| {
            r.missing_syncs = r.missing_syncs.saturating_add(1);
            count = Some(r.missing_syncs);
        })?;
        Ok(count)
    }

    async fn set_extraction_state(
        &self,
        fingerprint: &Fingerprint,
        state: ExtractionState,
        error: Option<&str>,
    ) -> Result<()> {
        self.modify(fingerprint, |r| {
            r.extraction_state = state;
            r.last_error = error.map(str::to_string);
        })?;
        Ok(())
    }

    async fn set_indexed_state(
        &self,
        fingerprint: &Fingerprint,
        state: IndexedState,
    ) -> Result<()> {
        self.modify(fingerprint, |r| r.indexed_state = state)?;
        Ok(())
    }

    async fn put_text(&self, fingerprint: &Fingerprint, text: &str) -> Result<()> {
        let exists = self.modify(fingerprint, |r| {
            r.extraction_state = ExtractionState::Extracted;
            r.last_error = None;
        })?;
        if exists {
            let mut texts = self.texts.write().map_err(|_| poisoned())?;
            if texts.get(fingerprint).map(String::as_str) != Some(text) {
                texts.insert(*fingerprint, text.to_string());
                self.bump();
            }
        }
        Ok(())
    }

    async fn get_text(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        let texts = self.texts.read().map_err(|_| poisoned())?;
        Ok(texts.get(fingerprint).cloned())
    }

    async fn mark_pending_delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        self.modify(fingerprint, |r| {
            r.pending_delete = true;
            r.indexed_state = IndexedState::Stale;
        })
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let removed = {
            let mut records = self.records.write().map_err(|_| poisoned())?;
            records.remove(fingerprint).is_some()
        };
        let mut texts = self.texts.write().map_err(|_| poisoned())?;
        let had_text = texts.remove(fingerprint).is_some();
        if removed || had_text {
            self.bump();
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_bytes;
    use crate::store::LIST_PAGE_SIZE;

    fn file(path: &str, content: &str) -> ObservedFile {
        ObservedFile {
            path: path.to_string(),
            fingerprint: fingerprint_bytes(content.as_bytes()),
            size: content.len() as u64,
            mtime: 7,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InMemoryMetadataStore::new();
        let f = file("/d/a.txt", "hello");
        store.upsert(&f, &[], 1).await.unwrap();
        let after_first = store.mutation_count();
        let rec = store.upsert(&f, &[], 2).await.unwrap();
        assert_eq!(store.mutation_count(), after_first);
        assert_eq!(rec.last_seen_at, 1);
    }

    #[tokio::test]
    async fn test_move_keeps_states_and_original_path() {
        let store = InMemoryMetadataStore::new();
        let f = file("/d/a.txt", "hello");
        store.upsert(&f, &[], 1).await.unwrap();
        store.put_text(&f.fingerprint, "hello").await.unwrap();
        store
            .set_indexed_state(&f.fingerprint, IndexedState::Indexed)
            .await
            .unwrap();

        let moved = ObservedFile {
            path: "/d/sub/a.txt".into(),
            ..f.clone()
        };
        let rec = store.upsert(&moved, &[], 5).await.unwrap();
        assert_eq!(rec.current_path, "/d/sub/a.txt");
        assert_eq!(rec.original_path, "/d/a.txt");
        assert_eq!(rec.extraction_state, ExtractionState::Extracted);
        assert_eq!(rec.indexed_state, IndexedState::Indexed);
        assert!(store.lookup_by_path("/d/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_alias() {
        let store = InMemoryMetadataStore::new();
        let f = file("/d/a.txt", "dup");
        store
            .upsert(&f, &["/d/b.txt".to_string()], 1)
            .await
            .unwrap();
        let rec = store.lookup_by_path("/d/b.txt").await.unwrap().unwrap();
        assert_eq!(rec.fingerprint, f.fingerprint);
    }

    #[tokio::test]
    async fn test_list_all_spans_pages() {
        let store = InMemoryMetadataStore::new();
        let n = LIST_PAGE_SIZE + 3;
        for i in 0..n {
            store
                .upsert(&file(&format!("/d/{i}.txt"), &format!("c{i}")), &[], 0)
                .await
                .unwrap();
        }
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), n);
        assert!(all.windows(2).all(|w| w[0].fingerprint < w[1].fingerprint));
    }

    #[tokio::test]
    async fn test_missing_then_reobserved() {
        let store = InMemoryMetadataStore::new();
        let f = file("/d/a.txt", "x");
        store.upsert(&f, &[], 0).await.unwrap();
        assert_eq!(store.mark_missing(&f.fingerprint).await.unwrap(), Some(1));
        assert_eq!(store.mark_missing(&f.fingerprint).await.unwrap(), Some(2));
        let rec = store.upsert(&f, &[], 1).await.unwrap();
        assert_eq!(rec.missing_syncs, 0);

        let unknown = fingerprint_bytes(b"nope");
        assert_eq!(store.mark_missing(&unknown).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_removes_text() {
        let store = InMemoryMetadataStore::new();
        let f = file("/d/a.txt", "x");
        store.upsert(&f, &[], 0).await.unwrap();
        store.put_text(&f.fingerprint, "text").await.unwrap();
        assert!(store.mark_pending_delete(&f.fingerprint).await.unwrap());
        assert!(store.delete(&f.fingerprint).await.unwrap());
        assert!(store.get_text(&f.fingerprint).await.unwrap().is_none());
        assert!(!store.delete(&f.fingerprint).await.unwrap());
        assert_eq!(store.counts().await.unwrap().total, 0);
    }
}
