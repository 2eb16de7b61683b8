//! SQLite implementation of the Vector Index Gateway.
//!
//! Lives in its own database file (see [`Config::index_path`]) so the
//! Metadata Store never depends on it. Text is chunked on upsert; chunks
//! land in `chunks` and the `chunks_fts` FTS5 table, and, with an
//! embedding provider configured, in `chunk_vectors`.
//!
//! Queries score per fingerprint: the best BM25 chunk for keyword mode,
//! the best cosine chunk for semantic mode, and for hybrid the two
//! normalized and blended with `retrieval.hybrid_alpha`.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use docvault_core::chunk::{chunk_text, Chunk};
use docvault_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use docvault_core::gateway::{rank_hits, IndexError, IndexHit, VectorIndex};
use docvault_core::search::{merge_candidates, query_terms, ChunkCandidate};
use docvault_core::Fingerprint;

use crate::config::{Config, SearchMode};
use crate::embedding::Embedder;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    embedder: Embedder,
    mode: SearchMode,
    hybrid_alpha: f64,
    candidate_k: usize,
    chunk_max_tokens: usize,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            pool,
            embedder: Embedder::new(&config.embedding)?,
            mode: config.retrieval.mode,
            hybrid_alpha: config.retrieval.hybrid_alpha,
            candidate_k: config.retrieval.candidate_k,
            chunk_max_tokens: config.index.chunk_max_tokens,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Chunk and vector counts, for `status`.
    pub async fn chunk_stats(&self) -> anyhow::Result<(u64, u64)> {
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok((chunks.max(0) as u64, vectors.max(0) as u64))
    }

    /// Vectors for `chunks`, reusing stored ones whose text hash and model
    /// still match.
    async fn vectors_for(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, IndexError> {
        let Some(first) = chunks.first() else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT hash, embedding FROM chunk_vectors WHERE fingerprint = ? AND model = ? AND dims = ?",
        )
        .bind(first.fingerprint.to_hex())
        .bind(self.embedder.model_name())
        .bind(self.embedder.dims() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::unavailable)?;
        let existing: HashMap<String, Vec<f32>> = rows
            .iter()
            .map(|r| (r.get("hash"), blob_to_vec(&r.get::<Vec<u8>, _>("embedding"))))
            .collect();

        let missing: Vec<String> = chunks
            .iter()
            .filter(|c| !existing.contains_key(&c.hash))
            .map(|c| c.text.clone())
            .collect();
        let mut fresh = self
            .embedder
            .embed(&missing)
            .await
            .map_err(IndexError::unavailable)?
            .into_iter();

        chunks
            .iter()
            .map(|c| match existing.get(&c.hash) {
                Some(v) => Ok(v.clone()),
                None => fresh
                    .next()
                    .ok_or_else(|| IndexError::Rejected("embedder returned too few vectors".into())),
            })
            .collect()
    }

    /// Best BM25 score per fingerprint, higher is better.
    async fn keyword_candidates(&self, text: &str, limit: usize) -> Result<Vec<ChunkCandidate>, IndexError> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        // Quoted terms keep user punctuation out of the FTS5 query grammar.
        let fts_query = terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ");

        let rows = sqlx::query(
            r#"
            SELECT fingerprint, MIN(r) AS best
            FROM (SELECT fingerprint, rank AS r FROM chunks_fts WHERE chunks_fts MATCH ?)
            GROUP BY fingerprint
            ORDER BY best ASC, fingerprint ASC
            LIMIT ?
            "#,
        )
        .bind(fts_query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::unavailable)?;

        rows.iter()
            .map(|row| {
                let fp: String = row.get("fingerprint");
                let rank: f64 = row.get("best");
                to_candidate(fp, -rank)
            })
            .collect()
    }

    /// Best cosine similarity per fingerprint.
    async fn vector_candidates(&self, text: &str, limit: usize) -> Result<Vec<ChunkCandidate>, IndexError> {
        let query_vec = self
            .embedder
            .embed_query(text)
            .await
            .map_err(IndexError::unavailable)?;

        let rows = sqlx::query("SELECT fingerprint, embedding FROM chunk_vectors WHERE model = ?")
            .bind(self.embedder.model_name())
            .fetch_all(&self.pool)
            .await
            .map_err(IndexError::unavailable)?;

        let mut best: HashMap<String, f64> = HashMap::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let sim = cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64;
            best.entry(row.get("fingerprint"))
                .and_modify(|s| *s = s.max(sim))
                .or_insert(sim);
        }

        let mut candidates = best
            .into_iter()
            .map(|(fp, score)| to_candidate(fp, score))
            .collect::<Result<Vec<_>, _>>()?;
        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

fn to_candidate(fp: String, raw_score: f64) -> Result<ChunkCandidate, IndexError> {
    let fingerprint: Fingerprint = fp
        .parse()
        .map_err(|e| IndexError::Unavailable(format!("corrupt fingerprint {}: {}", fp, e)))?;
    Ok(ChunkCandidate {
        chunk_id: fp,
        fingerprint,
        raw_score,
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, fingerprint: &Fingerprint, text: &str) -> Result<(), IndexError> {
        let fp = fingerprint.to_hex();
        let chunks = chunk_text(fingerprint, text, self.chunk_max_tokens);
        let vectors = if self.embedder.is_enabled() {
            Some(self.vectors_for(&chunks).await?)
        } else {
            None
        };

        let mut tx = self.pool.begin().await.map_err(IndexError::unavailable)?;
        for table in ["chunks", "chunks_fts", "chunk_vectors"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE fingerprint = ?"))
                .bind(&fp)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::unavailable)?;
        }

        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO chunks (id, fingerprint, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&fp)
            .bind(chunk.index as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::unavailable)?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, fingerprint, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&fp)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::unavailable)?;

            if let Some(vector) = vectors.as_ref().and_then(|v| v.get(i)) {
                sqlx::query(
                    "INSERT INTO chunk_vectors (chunk_id, fingerprint, model, dims, hash, embedding) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&fp)
                .bind(self.embedder.model_name())
                .bind(self.embedder.dims() as i64)
                .bind(&chunk.hash)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await
                .map_err(IndexError::unavailable)?;
            }
        }

        tx.commit().await.map_err(IndexError::unavailable)?;
        tracing::debug!(fingerprint = %fingerprint.short(12), chunks = chunks.len(), "indexed");
        Ok(())
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), IndexError> {
        let fp = fingerprint.to_hex();
        let mut tx = self.pool.begin().await.map_err(IndexError::unavailable)?;
        for table in ["chunk_vectors", "chunks_fts", "chunks"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE fingerprint = ?"))
                .bind(&fp)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::unavailable)?;
        }
        tx.commit().await.map_err(IndexError::unavailable)
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let limit = self.candidate_k.max(top_k);

        let (keyword, vector, alpha) = match self.mode {
            SearchMode::Keyword => (self.keyword_candidates(text, limit).await?, Vec::new(), 0.0),
            SearchMode::Semantic => (Vec::new(), self.vector_candidates(text, limit).await?, 1.0),
            SearchMode::Hybrid => (
                self.keyword_candidates(text, limit).await?,
                self.vector_candidates(text, limit).await?,
                self.hybrid_alpha,
            ),
        };

        let mut hits = merge_candidates(&keyword, &vector, alpha, top_k);
        rank_hits(&mut hits, top_k);
        Ok(hits)
    }

    async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, IndexError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chunks WHERE fingerprint = ?)")
            .bind(fingerprint.to_hex())
            .fetch_one(&self.pool)
            .await
            .map_err(IndexError::unavailable)
    }

    async fn entry_count(&self) -> Result<u64, IndexError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT fingerprint) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(IndexError::unavailable)?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::{db, migrate};
    use docvault_core::fingerprint::fingerprint_bytes;

    async fn open_index(dir: &std::path::Path, chunk_max_tokens: usize) -> SqliteVectorIndex {
        let toml = format!(
            "[db]\npath = \"{}\"\n[index]\nchunk_max_tokens = {}\n",
            dir.join("vault.sqlite").display(),
            chunk_max_tokens
        );
        let config = parse_config(&toml).unwrap();
        let pool = db::connect_index(&config).await.unwrap();
        migrate::migrate_index(&pool).await.unwrap();
        SqliteVectorIndex::new(pool, &config).unwrap()
    }

    #[tokio::test]
    async fn test_keyword_query_ranks_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path(), 700).await;
        let a = fingerprint_bytes(b"a");
        let b = fingerprint_bytes(b"b");
        let c = fingerprint_bytes(b"c");
        index.upsert(&a, "budget forecast for the quarter").await.unwrap();
        index.upsert(&b, "budget budget budget review, budget").await.unwrap();
        index.upsert(&c, "holiday schedule").await.unwrap();

        let hits = index.query("Budget?", 10).await.unwrap();
        let fps: Vec<_> = hits.iter().map(|h| h.fingerprint).collect();
        assert_eq!(fps.len(), 2);
        assert!(fps.contains(&a) && fps.contains(&b));
        assert!(!fps.contains(&c));
        assert!(hits[0].score >= hits[1].score);

        assert!(index.query("!!!", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path(), 6).await;
        let fp = fingerprint_bytes(b"doc");
        let long = "alpha paragraph one.\n\nbeta paragraph two.\n\ngamma paragraph three.";

        index.upsert(&fp, long).await.unwrap();
        index.upsert(&fp, long).await.unwrap();
        let (chunks, vectors) = index.chunk_stats().await.unwrap();
        assert_eq!(chunks, 3);
        assert_eq!(vectors, 0);
        assert_eq!(index.entry_count().await.unwrap(), 1);
        assert!(index.contains(&fp).await.unwrap());

        index.delete(&fp).await.unwrap();
        index.delete(&fp).await.unwrap();
        assert!(!index.contains(&fp).await.unwrap());
        assert_eq!(index.entry_count().await.unwrap(), 0);
        assert!(index.query("alpha", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_respects_top_k() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path(), 700).await;
        for i in 0..5u8 {
            let fp = fingerprint_bytes(&[i]);
            index.upsert(&fp, &format!("shared term {}", i)).await.unwrap();
        }
        assert_eq!(index.query("shared", 3).await.unwrap().len(), 3);
        assert_eq!(index.query("shared", 50).await.unwrap().len(), 5);
    }
}
