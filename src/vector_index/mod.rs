//! Vector index abstraction and implementations.
//!
//! Defines the [`VectorIndex`] trait and two backends:
//! - **[`qdrant::QdrantIndex`]** — a remote Qdrant collection over gRPC.
//! - **[`jsonl::JsonlIndex`]** — the mandatory in-process fallback: flat
//!   cosine search over a JSON-lines file, so the whole system runs without
//!   a live index service. For the same inputs it produces the same top-k
//!   ordering as the service, up to float tolerance.
//!
//! Both backends address points by the UUID-shaped vector key but report
//! the canonical hex message id in hits and scans, so the graph store and
//! the index always agree on ids.
//!
//! Ties in cosine score are broken by insertion order: search results are
//! sorted with a stable sort, and insertion order is the file/scroll order.

pub mod jsonl;
pub mod qdrant;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// A point as stored in the index: canonical id, original text, vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedPoint {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A search result with its cosine score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Approximate-nearest-neighbor store over message embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the backing collection/file if it does not exist. Idempotent.
    async fn ensure_collection(&self) -> Result<()>;

    /// Insert a batch of points. Existing points with the same id are
    /// overwritten.
    async fn insert_batch(&self, points: &[IndexedPoint]) -> Result<()>;

    /// Top-k by cosine similarity, descending.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;

    /// Every stored point with its vector, in a stable iteration order.
    async fn scan_all(&self) -> Result<Vec<IndexedPoint>>;
}

/// Instantiate the vector index named in the configuration.
pub async fn create_index(config: &Config) -> Result<Box<dyn VectorIndex>> {
    match config.vector_index.provider.as_str() {
        "qdrant" => Ok(Box::new(qdrant::QdrantIndex::connect(&config.vector_index)?)),
        "jsonl" => Ok(Box::new(jsonl::JsonlIndex::open(&config.vector_index)?)),
        other => anyhow::bail!("Unknown vector index provider: {}", other),
    }
}

/// Cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors, mismatched lengths, or zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
