//! Brute-force cosine-similarity index over document chunks.

use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::error::{RetrievalError, RetrievalResult};

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub text: String,
    pub score: f32,
    /// Position of the chunk in the source document.
    pub chunk: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexedChunk {
    text: String,
    /// L2-normalised; the zero vector stays zero.
    vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    embedder: String,
    dimension: usize,
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Embed every chunk with `embedder`.
    pub async fn build(chunks: Vec<String>, embedder: &dyn Embedder) -> RetrievalResult<Self> {
        let mut index = Self {
            embedder: embedder.id(),
            dimension: 0,
            chunks: Vec::with_capacity(chunks.len()),
        };
        for text in chunks {
            let vector = embedder.embed(&text).await?;
            index.push(text, vector)?;
        }
        Ok(index)
    }

    fn push(&mut self, text: String, mut vector: Vec<f32>) -> RetrievalResult<()> {
        if self.chunks.is_empty() {
            self.dimension = vector.len();
        } else if vector.len() != self.dimension {
            return Err(RetrievalError::Embedding(format!(
                "embedding dimension changed from {} to {}",
                self.dimension,
                vector.len()
            )));
        }
        normalize(&mut vector);
        self.chunks.push(IndexedChunk { text, vector });
        Ok(())
    }

    /// Up to `k` chunks most similar to `query`, best first.  Equal scores
    /// keep document order so results are deterministic.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<Passage> {
        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, dot(&chunk.vector, &query)))
            .collect();
        scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| Passage {
                text: self.chunks[i].text.clone(),
                score,
                chunk: i,
            })
            .collect()
    }

    pub fn embedder(&self) -> &str {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|chunk| chunk.text.as_str())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}
