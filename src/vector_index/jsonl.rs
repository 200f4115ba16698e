//! In-process fallback vector index: flat cosine over a JSON-lines file.
//!
//! The store file holds one point per line, `{id, vectors, payload:
//! {text}}`. Points are cached in memory after the first load; inserts
//! append to both the cache and the file. Search is brute-force cosine with
//! a stable sort, so equal scores keep insertion order — the same
//! tie-breaking the remote index exhibits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

use crate::config::VectorIndexConfig;

use super::{cosine_similarity, IndexedPoint, SearchHit, VectorIndex};

/// On-disk record shape, matching the fallback store file format.
#[derive(Debug, Serialize, Deserialize)]
struct StoredPoint {
    id: String,
    vectors: Vec<f32>,
    payload: Payload,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    text: String,
}

pub struct JsonlIndex {
    path: PathBuf,
    vector_size: usize,
    points: RwLock<Vec<IndexedPoint>>,
}

impl JsonlIndex {
    /// Open (or prepare to create) the store at `<path>/vectors.jsonl`.
    pub fn open(config: &VectorIndexConfig) -> Result<Self> {
        let path = config.path.join("vectors.jsonl");
        let points = if path.exists() {
            load_points(&path)?
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), count = points.len(), "opened fallback vector index");
        Ok(Self {
            path,
            vector_size: config.vector_size,
            points: RwLock::new(points),
        })
    }
}

fn load_points(path: &PathBuf) -> Result<Vec<IndexedPoint>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open vector store file: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut points = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let stored: StoredPoint = serde_json::from_str(&line)
            .with_context(|| format!("invalid point at line {}", line_no + 1))?;
        let point = IndexedPoint {
            id: stored.id,
            text: stored.payload.text,
            embedding: stored.vectors,
        };
        // Later lines overwrite earlier ones with the same id, in place, so
        // insertion order stays stable.
        match seen.get(&point.id) {
            Some(&idx) => points[idx] = point,
            None => {
                seen.insert(point.id.clone(), points.len());
                points.push(point);
            }
        }
    }
    Ok(points)
}

#[async_trait]
impl VectorIndex for JsonlIndex {
    async fn ensure_collection(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            std::fs::File::create(&self.path)?;
        }
        Ok(())
    }

    async fn insert_batch(&self, batch: &[IndexedPoint]) -> Result<()> {
        for point in batch {
            if point.embedding.len() != self.vector_size {
                anyhow::bail!(
                    "vector dimension mismatch for {}: expected {}, got {}",
                    point.id,
                    self.vector_size,
                    point.embedding.len()
                );
            }
        }

        // Update the cache first; nothing reaches disk on a cache error.
        {
            let mut points = self.points.write().unwrap();
            for point in batch {
                match points.iter_mut().find(|p| p.id == point.id) {
                    Some(existing) => *existing = point.clone(),
                    None => points.push(point.clone()),
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        for point in batch {
            let stored = StoredPoint {
                id: point.id.clone(),
                vectors: point.embedding.clone(),
                payload: Payload {
                    text: point.text.clone(),
                },
            };
            let line = serde_json::to_string(&stored)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let points = self.points.read().unwrap();
        let mut hits: Vec<SearchHit> = points
            .iter()
            .map(|p| SearchHit {
                id: p.id.clone(),
                text: p.text.clone(),
                score: cosine_similarity(vector, &p.embedding),
            })
            .collect();

        // Stable sort keeps insertion order for equal scores.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scan_all(&self) -> Result<Vec<IndexedPoint>> {
        Ok(self.points.read().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(dir: &tempfile::TempDir, size: usize) -> JsonlIndex {
        let config = VectorIndexConfig {
            provider: "jsonl".to_string(),
            url: String::new(),
            collection_name: "messages".to_string(),
            vector_size: size,
            path: dir.path().to_path_buf(),
        };
        JsonlIndex::open(&config).unwrap()
    }

    fn point(id: &str, text: &str, embedding: Vec<f32>) -> IndexedPoint {
        IndexedPoint {
            id: id.to_string(),
            text: text.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_cosine_desc() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = index_with(&dir, 2);
        index.ensure_collection().await.unwrap();
        index
            .insert_batch(&[
                point("a", "alpha", vec![1.0, 0.0]),
                point("b", "beta", vec![0.0, 1.0]),
                point("c", "gamma", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].id, "c");
    }

    #[tokio::test]
    async fn test_ties_break_by_insertion_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = index_with(&dir, 2);
        index.ensure_collection().await.unwrap();
        // Same direction, same cosine against any query
        index
            .insert_batch(&[
                point("first", "one", vec![2.0, 0.0]),
                point("second", "two", vec![4.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].id, "first");
        assert_eq!(hits[1].id, "second");
    }

    #[tokio::test]
    async fn test_top_one_returns_ingested_text() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = index_with(&dir, 3);
        index.ensure_collection().await.unwrap();
        index
            .insert_batch(&[
                point("x", "the x message", vec![1.0, 0.2, 0.0]),
                point("y", "the y message", vec![0.0, 1.0, 0.3]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[0.0, 1.0, 0.3], 1).await.unwrap();
        assert_eq!(hits[0].id, "y");
        assert_eq!(hits[0].text, "the y message");
    }

    #[tokio::test]
    async fn test_persists_and_reloads() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let index = index_with(&dir, 2);
            index.ensure_collection().await.unwrap();
            index
                .insert_batch(&[point("a", "alpha", vec![1.0, 0.0])])
                .await
                .unwrap();
        }
        let reopened = index_with(&dir, 2);
        let all = reopened.scan_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].text, "alpha");
    }

    #[tokio::test]
    async fn test_insert_rejects_wrong_dimension() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = index_with(&dir, 2);
        index.ensure_collection().await.unwrap();
        let err = index
            .insert_batch(&[point("a", "alpha", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = index_with(&dir, 2);
        index.ensure_collection().await.unwrap();
        index
            .insert_batch(&[
                point("a", "old", vec![1.0, 0.0]),
                point("b", "beta", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        index
            .insert_batch(&[point("a", "new", vec![1.0, 0.0])])
            .await
            .unwrap();

        let all = index.scan_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].text, "new");
    }
}
