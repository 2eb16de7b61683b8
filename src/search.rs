//! `search` command: rank through the vector index, resolve through the
//! Metadata Store, print.

use anyhow::Result;
use serde::Serialize;
use std::time::Instant;

use docvault_core::search::{SearchHit, Searcher};

use crate::config::Config;
use crate::vault::Vault;

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    top_k: usize,
    latency_ms: u64,
    results: &'a [SearchHit],
}

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let top_k = top_k.unwrap_or(config.retrieval.default_top_k);
    let vault = Vault::open(config).await?;

    let started = Instant::now();
    let searcher = Searcher::new(
        vault.store.as_ref(),
        vault.index.as_ref(),
        config.retrieval.snippet_chars,
    );
    let results = searcher.search(query, top_k).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    vault.close().await;
    let results = results?;

    if json {
        let out = SearchOutput {
            query,
            top_k,
            latency_ms,
            results: &results,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        println!("  latency: {} ms", latency_ms);
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.current_path);
        println!("    fingerprint: {}", hit.fingerprint.short(12));
        if !hit.aliases.is_empty() {
            println!("    also at: {}", hit.aliases.join(", "));
        }
        println!("    excerpt: \"{}\"", hit.snippet);
        println!();
    }
    println!("{} result(s) in {} ms", results.len(), latency_ms);
    Ok(())
}
