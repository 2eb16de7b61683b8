//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses and validates in one step so commands can
//! trust the values they read.
//!
//! ```toml
//! [db]
//! path = "./data/vault.sqlite"
//!
//! [index]
//! path = "./data/index.sqlite"
//!
//! [scan]
//! include_globs = ["**/*.pdf", "**/*.txt"]
//!
//! [sync]
//! missing_syncs_before_delete = 3
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Metadata Store location.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Vector index location and chunking.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Defaults to `index.sqlite` next to the metadata database.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: None,
            chunk_max_tokens: default_chunk_max_tokens(),
        }
    }
}

fn default_chunk_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// How the vector index ranks chunks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ),
        }
    }

    pub fn needs_embeddings(&self) -> bool {
        !matches!(self, SearchMode::Keyword)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Chunk candidates fetched per retrieval method before merging.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            default_top_k: default_top_k(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> usize {
    80
}
fn default_top_k() -> usize {
    5
}
fn default_snippet_chars() -> usize {
    240
}

/// Which files a scan considers.
#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            recursive: true,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["pdf", "docx", "pptx", "xlsx", "json", "txt", "md"]
        .iter()
        .map(|ext| format!("**/*.{ext}"))
        .collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// `0` keeps missing records forever.
    #[serde(default = "default_missing_syncs")]
    pub missing_syncs_before_delete: u32,
    #[serde(default = "default_call_timeout")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub index_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            missing_syncs_before_delete: default_missing_syncs(),
            extract_timeout_secs: default_call_timeout(),
            index_timeout_secs: default_call_timeout(),
        }
    }
}

impl SyncConfig {
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }
}

fn default_workers() -> usize {
    4
}
fn default_missing_syncs() -> u32 {
    3
}
fn default_call_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_min_text_chars() -> usize {
    50
}
fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

impl Config {
    /// Vector index database path, defaulting next to the metadata store.
    pub fn index_path(&self) -> PathBuf {
        match &self.index.path {
            Some(p) => p.clone(),
            None => self
                .db
                .path
                .parent()
                .map(|dir| dir.join("index.sqlite"))
                .unwrap_or_else(|| PathBuf::from("index.sqlite")),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.index.chunk_max_tokens == 0 {
        bail!("index.chunk_max_tokens must be > 0");
    }

    if config.retrieval.default_top_k < 1 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        bail!("retrieval.candidate_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.mode.needs_embeddings() && !config.embedding.is_enabled() {
        bail!("retrieval.mode semantic/hybrid requires an embedding provider");
    }

    if config.sync.workers == 0 {
        bail!("sync.workers must be >= 1");
    }
    if config.sync.missing_syncs_before_delete == 1 {
        bail!("sync.missing_syncs_before_delete must be 0 (never) or >= 2");
    }
    if config.sync.extract_timeout_secs == 0 || config.sync.index_timeout_secs == 0 {
        bail!("sync timeouts must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(config)
}
