//! Search composition and score merging.
//!
//! [`Searcher`] asks a [`VectorIndex`] for ranked fingerprints and
//! resolves each one through the [`MetadataStore`], so results always
//! carry the latest known path rather than whatever path was current at
//! indexing time. Fingerprints the store no longer knows, or knows only as
//! missing or tombstoned, are dropped; the searcher then asks the index
//! for more candidates so callers get `top_k` results whenever enough live
//! matches exist.
//!
//! # Hybrid Scoring
//!
//! Index backends with both keyword and vector candidates use
//! [`merge_candidates`]:
//!
//! 1. Normalize both candidate sets to `[0, 1]` using min-max normalization.
//! 2. Merge per chunk: `score = (1 - α) × keyword + α × semantic`.
//! 3. Group by fingerprint (MAX aggregation).
//! 4. Sort by score (desc), fingerprint (asc).

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::gateway::{rank_hits, IndexHit, VectorIndex};
use crate::models::Fingerprint;
use crate::store::MetadataStore;

/// Upper bound on candidates requested from the index in one query.
pub const MAX_CANDIDATES: usize = 10_000;

/// A chunk-level candidate from one retrieval method.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub fingerprint: Fingerprint,
    /// Raw score from the backend (BM25 rank or cosine similarity).
    pub raw_score: f64,
}

/// One resolved search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub fingerprint: Fingerprint,
    pub score: f64,
    /// Canonical path as of the latest sync.
    pub current_path: String,
    /// Other paths with identical content.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub file_type: String,
    pub snippet: String,
}

/// Read-only query front end over a store and an index.
pub struct Searcher<'a, M: ?Sized, V: ?Sized> {
    store: &'a M,
    index: &'a V,
    snippet_chars: usize,
}

impl<'a, M, V> Searcher<'a, M, V>
where
    M: MetadataStore + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(store: &'a M, index: &'a V, snippet_chars: usize) -> Self {
        Self {
            store,
            index,
            snippet_chars,
        }
    }

    /// Up to `top_k` live documents for `query`, best first.
    ///
    /// Fewer than `top_k` results means the index ran out of matches.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            bail!("top_k must be a positive integer");
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut fetch = top_k;
        loop {
            let hits = self.index.query(query, fetch).await?;
            let exhausted = hits.len() < fetch;
            let results = self.resolve(query, &hits, top_k).await?;
            if results.len() >= top_k || exhausted || fetch >= MAX_CANDIDATES {
                return Ok(results);
            }
            fetch = (fetch * 2).min(MAX_CANDIDATES);
        }
    }

    async fn resolve(&self, query: &str, hits: &[IndexHit], top_k: usize) -> Result<Vec<SearchHit>> {
        let mut out = Vec::with_capacity(top_k);
        let mut seen = HashSet::new();
        for hit in hits {
            if out.len() == top_k {
                break;
            }
            if !seen.insert(hit.fingerprint) {
                continue;
            }
            let Some(rec) = self.store.lookup_by_fingerprint(&hit.fingerprint).await? else {
                tracing::debug!(fingerprint = %hit.fingerprint.short(12), "index hit without record, dropped");
                continue;
            };
            if !rec.is_searchable() {
                continue;
            }
            let text = self.store.get_text(&hit.fingerprint).await?.unwrap_or_default();
            out.push(SearchHit {
                fingerprint: hit.fingerprint,
                score: hit.score,
                snippet: make_snippet(&text, query, self.snippet_chars),
                current_path: rec.current_path,
                aliases: rec.aliases,
                file_type: rec.file_type,
            });
        }
        Ok(out)
    }
}

/// Lower-cased alphanumeric terms of `text`.
pub fn query_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// A whitespace-collapsed excerpt of `text` around the first query term,
/// or its beginning when no term occurs.
pub fn make_snippet(text: &str, query: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .collect();
    if chars.len() <= max_chars {
        return chars.into_iter().collect();
    }

    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let first_match = query_terms(query)
        .iter()
        .filter_map(|term| {
            let needle: Vec<char> = term.chars().collect();
            lower.windows(needle.len()).position(|w| w == needle.as_slice())
        })
        .min();

    let start = match first_match {
        Some(pos) => pos
            .saturating_sub(max_chars / 4)
            .min(chars.len() - max_chars),
        None => 0,
    };
    let end = start + max_chars;

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Merge keyword and vector candidates into per-fingerprint hits.
///
/// `alpha = 0` reproduces keyword ordering, `alpha = 1` vector ordering.
pub fn merge_candidates(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f64,
    top_k: usize,
) -> Vec<IndexHit> {
    let norm_keyword = normalize_scores(keyword);
    let norm_vector = normalize_scores(vector);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_vector
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();

    let mut all_chunks: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword.iter().chain(vector) {
        all_chunks.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut best: HashMap<Fingerprint, f64> = HashMap::new();
    for (chunk_id, cand) in &all_chunks {
        let k = kw_map.get(chunk_id).copied().unwrap_or(0.0);
        let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
        let hybrid = (1.0 - alpha) * k + alpha * v;
        best.entry(cand.fingerprint)
            .and_modify(|s| *s = s.max(hybrid))
            .or_insert(hybrid);
    }

    let mut hits: Vec<IndexHit> = best
        .into_iter()
        .map(|(fingerprint, score)| IndexHit { fingerprint, score })
        .collect();
    rank_hits(&mut hits, top_k);
    hits
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}
