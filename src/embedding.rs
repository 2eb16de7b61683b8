//! Embedding backends for the SQLite vector index.
//!
//! [`Embedder`] wraps one configured provider:
//! - `disabled`: no vectors; the index runs keyword-only.
//! - `openai`: `POST /v1/embeddings`, key from `OPENAI_API_KEY`.
//! - `ollama`: `POST {url}/api/embed`.
//! - `local`: fastembed, behind the `local-embeddings-fastembed` feature.
//!
//! HTTP providers retry 429, 5xx and network errors with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s); other 4xx responses fail at once.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;

use docvault_core::embedding::EmbeddingProvider;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
#[cfg(feature = "local-embeddings-fastembed")]
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

pub struct Embedder {
    config: EmbeddingConfig,
    model: String,
    dims: usize,
    backend: Backend,
}

enum Backend {
    Disabled,
    OpenAI {
        client: reqwest::Client,
        api_key: String,
    },
    Ollama {
        client: reqwest::Client,
        url: String,
    },
    #[cfg(feature = "local-embeddings-fastembed")]
    Local {
        model: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
    },
}

impl Embedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = || {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
        };

        let (model, dims, backend) = match config.provider.as_str() {
            "disabled" => ("disabled".to_string(), 0, Backend::Disabled),
            "openai" => {
                let api_key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
                let (model, dims) = remote_model(config)?;
                (model, dims, Backend::OpenAI { client: http()?, api_key })
            }
            "ollama" => {
                let (model, dims) = remote_model(config)?;
                let url = config
                    .url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
                (model, dims, Backend::Ollama { client: http()?, url })
            }
            #[cfg(feature = "local-embeddings-fastembed")]
            "local" => {
                let (model, dims) = local_model(config);
                (
                    model,
                    dims,
                    Backend::Local {
                        model: Default::default(),
                    },
                )
            }
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
            other => bail!("Unknown embedding provider: {}", other),
        };

        Ok(Self {
            config: config.clone(),
            model,
            dims,
            backend,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::Disabled)
    }

    /// Embed `texts` in order, batching by `embedding.batch_size`.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let vectors = self.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "{} returned {} vectors for {} inputs",
                    self.model,
                    vectors.len(),
                    batch.len()
                );
            }
            if let Some(v) = vectors.iter().find(|v| v.len() != self.dims) {
                bail!(
                    "{} returned a {}-dim vector, expected {}",
                    self.model,
                    v.len(),
                    self.dims
                );
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        match &self.backend {
            Backend::Disabled => bail!("Embedding provider is disabled"),
            Backend::OpenAI { client, api_key } => {
                let request = || {
                    client
                        .post(OPENAI_URL)
                        .header("Authorization", format!("Bearer {}", api_key))
                        .json(&body)
                };
                let json = send_with_retry("OpenAI", self.config.max_retries, request).await?;
                parse_openai_response(&json)
            }
            Backend::Ollama { client, url } => {
                let endpoint = format!("{}/api/embed", url.trim_end_matches('/'));
                let request = || client.post(&endpoint).json(&body);
                let json = send_with_retry("Ollama", self.config.max_retries, request).await?;
                parse_ollama_response(&json)
            }
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local { model } => {
                let model = model.clone();
                let name = self.model.clone();
                let batch_size = self.config.batch_size;
                let texts = texts.to_vec();
                tokio::task::spawn_blocking(move || embed_local(&model, &name, texts, batch_size))
                    .await?
            }
        }
    }
}

impl EmbeddingProvider for Embedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

fn remote_model(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {}", config.provider))?;
    let dims = config
        .dims
        .filter(|d| *d > 0)
        .ok_or_else(|| anyhow!("embedding.dims required for {}", config.provider))?;
    Ok((model, dims))
}

/// POST until success, a non-retryable status, or `max_retries` retries.
async fn send_with_retry<F>(service: &str, max_retries: u32, request: F) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                service,
                attempt,
                delay_secs = delay.as_secs(),
                error = %last_err.as_ref().map(ToString::to_string).unwrap_or_default(),
                "retrying embedding request"
            );
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", service, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error: {}", service, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", service)))
}

fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

/// `data[].embedding`, reordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vec = item
            .get("embedding")
            .and_then(json_vector)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| json_vector(e).ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array")))
        .collect()
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model(config: &EmbeddingConfig) -> (String, usize) {
    let name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
    let dims = config.dims.unwrap_or(match name.as_str() {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    });
    (name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel::*;
    Ok(match name {
        "all-minilm-l6-v2" => AllMiniLML6V2,
        "bge-small-en-v1.5" => BGESmallENV15,
        "bge-base-en-v1.5" => BGEBaseENV15,
        "bge-large-en-v1.5" => BGELargeENV15,
        "nomic-embed-text-v1" => NomicEmbedTextV1,
        "nomic-embed-text-v1.5" => NomicEmbedTextV15,
        "multilingual-e5-small" => MultilingualE5Small,
        "multilingual-e5-base" => MultilingualE5Base,
        "multilingual-e5-large" => MultilingualE5Large,
        other => bail!("Unknown local embedding model: '{}'", other),
    })
}

/// The model loads on first use and stays resident for the process.
#[cfg(feature = "local-embeddings-fastembed")]
fn embed_local(
    slot: &std::sync::Mutex<Option<fastembed::TextEmbedding>>,
    name: &str,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut guard = slot
        .lock()
        .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
    if guard.is_none() {
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model(name)?).with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
        *guard = Some(model);
    }
    let model = guard
        .as_mut()
        .ok_or_else(|| anyhow!("local embedding model unavailable"))?;
    model
        .embed(texts, Some(batch_size))
        .map_err(|e| anyhow!("Local embedding failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_embedder() {
        let e = Embedder::new(&EmbeddingConfig::default()).unwrap();
        assert!(!e.is_enabled());
        assert_eq!(e.model_name(), "disabled");
        assert_eq!(e.dims(), 0);
    }

    #[test]
    fn test_unknown_provider() {
        let cfg = EmbeddingConfig {
            provider: "magic".into(),
            ..Default::default()
        };
        assert!(Embedder::new(&cfg).is_err());
    }

    #[test]
    fn test_ollama_needs_model_and_dims() {
        let cfg = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            ..Default::default()
        };
        assert!(Embedder::new(&cfg).is_err());

        let cfg = EmbeddingConfig {
            dims: Some(768),
            ..cfg
        };
        let e = Embedder::new(&cfg).unwrap();
        assert!(e.is_enabled());
        assert_eq!(e.dims(), 768);
    }

    #[test]
    fn test_openai_response_order() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.25]]);
        let bad = serde_json::json!({"embeddings": ["nope"]});
        assert!(parse_ollama_response(&bad).is_err());
    }
}
