//! In-memory [`VectorIndex`] for tests.
//!
//! Scores by term overlap: the fraction of distinct query terms present in
//! a document. No embeddings are involved, which keeps the contract
//! testable without a model.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::Fingerprint;
use crate::search::query_terms;

use super::{rank_hits, IndexError, IndexHit, VectorIndex};

pub struct InMemoryVectorIndex {
    entries: RwLock<BTreeMap<Fingerprint, BTreeSet<String>>>,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            upserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Calls to `upsert` so far, successful or not.
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Fingerprints currently held, in order.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.entries
            .read()
            .map(|e| e.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> IndexError {
    IndexError::Unavailable("index lock poisoned".into())
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, fingerprint: &Fingerprint, text: &str) -> Result<(), IndexError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(*fingerprint, query_terms(text));
        Ok(())
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), IndexError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(fingerprint);
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let query = query_terms(text);
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut hits: Vec<IndexHit> = entries
            .iter()
            .filter_map(|(fp, doc)| {
                let overlap = query.iter().filter(|t| doc.contains(*t)).count();
                (overlap > 0).then(|| IndexHit {
                    fingerprint: *fp,
                    score: overlap as f64 / query.len() as f64,
                })
            })
            .collect();
        rank_hits(&mut hits, top_k);
        Ok(hits)
    }

    async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, IndexError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.contains_key(fingerprint))
    }

    async fn entry_count(&self) -> Result<u64, IndexError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.len() as u64)
    }
}
