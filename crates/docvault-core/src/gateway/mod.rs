//! External collaborators: text extraction and the vector index.
//!
//! The core calls these and handles their failure modes; it never looks
//! inside a document format or an embedding.
//!
//! | Failure | Classification | Runner reaction |
//! |---------|----------------|-----------------|
//! | [`ExtractionError::UnsupportedFormat`] | permanent | record `failed`, not retried until content changes |
//! | [`ExtractionError::Corrupt`] | permanent | record `failed` |
//! | [`ExtractionError::Timeout`] / [`ExtractionError::Transient`] | retryable | record stays `pending` |
//! | any [`IndexError`] | retryable | record stays `stale` |

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::models::Fingerprint;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("extraction failed: {0}")]
    Transient(String),
}

impl ExtractionError {
    /// Permanent failures are recorded and not retried for the same content.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ExtractionError::UnsupportedFormat(_) | ExtractionError::Corrupt(_)
        )
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),
    #[error("vector index rejected request: {0}")]
    Rejected(String),
    #[error("vector index call timed out after {0:?}")]
    Timeout(Duration),
}

impl IndexError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        IndexError::Unavailable(err.to_string())
    }
}

/// Converts a file's bytes into plain text.
///
/// Implementations are synchronous and may be slow; callers run them on a
/// blocking thread under a timeout.
pub trait Extractor: Send + Sync {
    /// `format_hint` is the lower-cased file extension without the dot.
    fn extract(&self, bytes: &[u8], format_hint: &str) -> Result<String, ExtractionError>;
}

/// One ranked fingerprint from [`VectorIndex::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHit {
    pub fingerprint: Fingerprint,
    pub score: f64,
}

/// Owner of embedding computation and similarity search.
///
/// `upsert` and `delete` are idempotent. `query` returns at most `top_k`
/// distinct fingerprints ordered by score descending, ties by fingerprint.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, fingerprint: &Fingerprint, text: &str) -> Result<(), IndexError>;

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), IndexError>;

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<IndexHit>, IndexError>;

    /// Whether a queryable entry exists for `fingerprint`.
    async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, IndexError>;

    /// Number of fingerprints with an entry.
    async fn entry_count(&self) -> Result<u64, IndexError>;
}

/// Sort hits by score descending, fingerprint ascending, and keep `top_k`.
pub fn rank_hits(hits: &mut Vec<IndexHit>, top_k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    hits.truncate(top_k);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_vs_retryable() {
        assert!(ExtractionError::UnsupportedFormat("exe".into()).is_permanent());
        assert!(ExtractionError::Corrupt("bad zip".into()).is_permanent());
        assert!(!ExtractionError::Timeout(Duration::from_secs(1)).is_permanent());
        assert!(!ExtractionError::Transient("busy".into()).is_permanent());
    }

    #[test]
    fn ranking_breaks_ties_by_fingerprint() {
        let a = Fingerprint::from_bytes([1; 32]);
        let b = Fingerprint::from_bytes([2; 32]);
        let c = Fingerprint::from_bytes([3; 32]);
        let mut hits = vec![
            IndexHit { fingerprint: c, score: 0.5 },
            IndexHit { fingerprint: b, score: 0.9 },
            IndexHit { fingerprint: a, score: 0.5 },
        ];
        rank_hits(&mut hits, 2);
        assert_eq!(hits[0].fingerprint, b);
        assert_eq!(hits[1].fingerprint, a);
        assert_eq!(hits.len(), 2);
    }
}
