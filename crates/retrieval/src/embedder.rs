//! Text → vector backends.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{RetrievalError, RetrievalResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model and its parameters.  Persisted indexes
    /// built by a different embedder are never reused.
    fn id(&self) -> String;

    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>>;
}

/// Deterministic offline embedder: signed feature hashing of lowercase
/// word tokens into a fixed number of buckets.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn id(&self) -> String {
        format!("hashing-{}", self.dimension)
    }

    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

/// Lowercase alphanumeric runs.  CJK ideographs are emitted one per token
/// since those scripts do not separate words with spaces.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

/// Embeddings from a local Ollama server via `/api/embeddings`.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn id(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        let body = serde_json::json!({ "model": self.model, "prompt": text });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| RetrievalError::Embedding(format!("request to {} failed: {err}", self.url)))?;
        if !response.status().is_success() {
            return Err(RetrievalError::Embedding(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|err| RetrievalError::Embedding(format!("invalid response body: {err}")))?;
        let embedding = json["embedding"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Vec<f32>>()
            })
            .unwrap_or_default();
        if embedding.is_empty() {
            return Err(RetrievalError::Embedding(format!(
                "model {} returned no embedding",
                self.model
            )));
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Apple revenue grew").await.unwrap();
        let b = embedder.embed("apple  REVENUE grew!").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_text_gives_different_vectors() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("interest rates").await.unwrap();
        let b = embedder.embed("semiconductor supply").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn text_without_tokens_is_the_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed("  --- ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn tokenizer_splits_cjk_per_character() {
        assert_eq!(tokenize("AAPL股价 up"), vec!["aapl", "股", "价", "up"]);
    }

    #[test]
    fn ids_encode_model_parameters() {
        assert_eq!(HashingEmbedder::new(32).id(), "hashing-32");
        let ollama = OllamaEmbedder::new("http://localhost:11434/", "nomic-embed-text");
        assert_eq!(ollama.id(), "ollama:nomic-embed-text");
        assert_eq!(ollama.url, "http://localhost:11434/api/embeddings");
    }
}
