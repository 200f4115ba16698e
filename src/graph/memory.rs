//! In-process [`GraphStore`] implementation for development and tests.
//!
//! Nodes and edges live behind `std::sync::RwLock`; guards are never held
//! across awaits. Traversal is a depth-first enumeration of node-simple
//! paths with the same observable results as the Cypher variant.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::models::{Message, Relationship};

use super::{GraphStore, PathRecord, SimilarNeighbor, IS_SIMILAR};

#[derive(Debug, Clone)]
struct SimilarityEdge {
    src: String,
    dst: String,
    score: f64,
}

#[derive(Debug, Clone)]
struct SemanticEdge {
    src: String,
    dst: String,
    relation: String,
    confidence: f64,
    evidence: String,
}

/// One undirected traversal step out of a node.
struct Step<'a> {
    neighbor: &'a str,
    relation: &'a str,
    confidence: f64,
    evidence: &'a str,
    semantic: bool,
}

pub struct MemoryGraph {
    /// id → text, plus insertion order for deterministic iteration.
    nodes: RwLock<HashMap<String, String>>,
    node_order: RwLock<Vec<String>>,
    similarity: RwLock<Vec<SimilarityEdge>>,
    semantic: RwLock<Vec<SemanticEdge>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            node_order: RwLock::new(Vec::new()),
            similarity: RwLock::new(Vec::new()),
            semantic: RwLock::new(Vec::new()),
        }
    }

    fn merge_node(&self, id: &str, text: &str) {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.insert(id.to_string(), text.to_string()).is_none() {
            self.node_order.write().unwrap().push(id.to_string());
        }
    }

    /// Collect every undirected step out of `node` across both edge kinds.
    fn steps_from<'a>(
        &self,
        node: &str,
        similarity: &'a [SimilarityEdge],
        semantic: &'a [SemanticEdge],
    ) -> Vec<Step<'a>> {
        let mut steps = Vec::new();
        for e in similarity {
            if e.src == node {
                steps.push(Step {
                    neighbor: &e.dst,
                    relation: IS_SIMILAR,
                    confidence: e.score,
                    evidence: "",
                    semantic: false,
                });
            } else if e.dst == node {
                steps.push(Step {
                    neighbor: &e.src,
                    relation: IS_SIMILAR,
                    confidence: e.score,
                    evidence: "",
                    semantic: false,
                });
            }
        }
        for e in semantic {
            if e.src == node {
                steps.push(Step {
                    neighbor: &e.dst,
                    relation: &e.relation,
                    confidence: e.confidence,
                    evidence: &e.evidence,
                    semantic: true,
                });
            } else if e.dst == node {
                steps.push(Step {
                    neighbor: &e.src,
                    relation: &e.relation,
                    confidence: e.confidence,
                    evidence: &e.evidence,
                    semantic: true,
                });
            }
        }
        steps
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn ensure_message_index(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_message(&self, id: &str, text: &str) -> Result<()> {
        self.merge_node(id, text);
        Ok(())
    }

    async fn upsert_similarity(
        &self,
        src_id: &str,
        src_text: &str,
        dst_id: &str,
        dst_text: &str,
        score: f64,
    ) -> Result<()> {
        if src_id == dst_id {
            anyhow::bail!("self-loop rejected for message {}", src_id);
        }
        self.merge_node(src_id, src_text);
        self.merge_node(dst_id, dst_text);

        let mut edges = self.similarity.write().unwrap();
        match edges.iter_mut().find(|e| e.src == src_id && e.dst == dst_id) {
            Some(edge) => edge.score = score,
            None => edges.push(SimilarityEdge {
                src: src_id.to_string(),
                dst: dst_id.to_string(),
                score,
            }),
        }
        Ok(())
    }

    async fn upsert_semantic_batch(&self, rels: &[Relationship]) -> Result<usize> {
        let nodes = self.nodes.read().unwrap();
        let mut edges = self.semantic.write().unwrap();
        let mut written = 0;

        for rel in rels {
            if !nodes.contains_key(&rel.source_id) || !nodes.contains_key(&rel.target_id) {
                warn!(
                    source = %rel.source_id,
                    target = %rel.target_id,
                    "skipping relationship, endpoints not found"
                );
                continue;
            }
            match edges.iter_mut().find(|e| {
                e.src == rel.source_id && e.dst == rel.target_id && e.relation == rel.relation
            }) {
                Some(edge) => {
                    edge.confidence = rel.confidence;
                    edge.evidence = rel.evidence.clone();
                }
                None => edges.push(SemanticEdge {
                    src: rel.source_id.clone(),
                    dst: rel.target_id.clone(),
                    relation: rel.relation.clone(),
                    confidence: rel.confidence,
                    evidence: rel.evidence.clone(),
                }),
            }
            written += 1;
        }
        Ok(written)
    }

    async fn count_messages_missing_text(&self) -> Result<u64> {
        let nodes = self.nodes.read().unwrap();
        Ok(nodes.values().filter(|t| t.is_empty()).count() as u64)
    }

    async fn fetch_with_similar_neighbors(
        &self,
    ) -> Result<Vec<(Message, Vec<SimilarNeighbor>)>> {
        let nodes = self.nodes.read().unwrap();
        let order = self.node_order.read().unwrap();
        let edges = self.similarity.read().unwrap();

        let mut out = Vec::new();
        for id in order.iter() {
            let mut neighbors: Vec<SimilarNeighbor> = edges
                .iter()
                .filter(|e| &e.src == id)
                .map(|e| SimilarNeighbor {
                    id: e.dst.clone(),
                    text: nodes.get(&e.dst).cloned().unwrap_or_default(),
                    score: e.score,
                })
                .collect();
            if neighbors.is_empty() {
                continue;
            }
            neighbors.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let text = nodes.get(id).cloned().unwrap_or_default();
            out.push((Message::new(id.clone(), text), neighbors));
        }
        Ok(out)
    }

    async fn fetch_top_similar(
        &self,
        id: &str,
        limit: usize,
        exclude_id: &str,
    ) -> Result<Vec<SimilarNeighbor>> {
        let nodes = self.nodes.read().unwrap();
        let edges = self.similarity.read().unwrap();

        let mut neighbors: Vec<SimilarNeighbor> = edges
            .iter()
            .filter(|e| e.src == id && e.dst != exclude_id)
            .map(|e| SimilarNeighbor {
                id: e.dst.clone(),
                text: nodes.get(&e.dst).cloned().unwrap_or_default(),
                score: e.score,
            })
            .collect();
        neighbors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn find_related_paths(
        &self,
        start_id: &str,
        min_confidence: f64,
        max_depth: usize,
        limit: usize,
    ) -> Result<Vec<PathRecord>> {
        if max_depth == 0 {
            return Ok(Vec::new());
        }

        let nodes = self.nodes.read().unwrap();
        let similarity = self.similarity.read().unwrap();
        let semantic = self.semantic.read().unwrap();

        // Depth-first enumeration of node-simple paths, keeping the best
        // product per target.
        let mut best: HashMap<String, PathRecord> = HashMap::new();
        let mut stack: Vec<(String, Vec<String>, f64, String, String)> = Vec::new();
        stack.push((
            start_id.to_string(),
            vec![start_id.to_string()],
            1.0,
            String::new(),
            String::new(),
        ));

        while let Some((node, path, product, relation, evidence)) = stack.pop() {
            if path.len() > 1 && node != start_id {
                let record = PathRecord {
                    target_id: node.clone(),
                    target_text: nodes.get(&node).cloned().unwrap_or_default(),
                    relation: relation.clone(),
                    confidence: product,
                    evidence: evidence.clone(),
                    path_ids: path.clone(),
                };
                match best.get(&node) {
                    Some(existing) if existing.confidence >= record.confidence => {}
                    _ => {
                        best.insert(node.clone(), record);
                    }
                }
            }
            if path.len() > max_depth {
                continue;
            }
            for step in self.steps_from(&node, &similarity, &semantic) {
                if step.confidence < min_confidence {
                    continue;
                }
                if path.iter().any(|p| p == step.neighbor) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(step.neighbor.to_string());
                let label = if step.semantic {
                    step.relation.to_string()
                } else {
                    IS_SIMILAR.to_string()
                };
                stack.push((
                    step.neighbor.to_string(),
                    next_path,
                    product * step.confidence,
                    label,
                    step.evidence.to_string(),
                ));
            }
        }

        let mut records: Vec<PathRecord> = best.into_values().collect();
        records.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let nodes = self.nodes.read().unwrap();
        Ok(nodes.get(id).map(|text| Message::new(id, text.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(src: &str, dst: &str, relation: &str, confidence: f64) -> Relationship {
        Relationship {
            source_id: src.to_string(),
            target_id: dst.to_string(),
            relation: relation.to_string(),
            confidence,
            evidence: format!("{} evidences {}", src, dst),
        }
    }

    async fn diamond() -> MemoryGraph {
        // x — y — z chain plus a direct x — w edge
        let g = MemoryGraph::new();
        g.upsert_similarity("x", "X", "y", "Y", 0.9).await.unwrap();
        g.upsert_similarity("x", "X", "w", "W", 0.5).await.unwrap();
        g.upsert_message("z", "Z").await.unwrap();
        let written = g
            .upsert_semantic_batch(&[rel("y", "z", "Elaboration", 0.8)])
            .await
            .unwrap();
        assert_eq!(written, 1);
        g
    }

    #[tokio::test]
    async fn test_confidence_product_and_terminal_label() {
        let g = diamond().await;
        let records = g.find_related_paths("x", 0.5, 2, 10).await.unwrap();
        let z = records.iter().find(|r| r.target_id == "z").unwrap();
        assert!((z.confidence - 0.72).abs() < 1e-9);
        assert_eq!(z.relation, "Elaboration");
        assert_eq!(z.path_ids, vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_depth_zero_returns_empty() {
        let g = diamond().await;
        let records = g.find_related_paths("x", 0.0, 0, 10).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_depth_one_equals_direct_neighbors() {
        let g = diamond().await;
        let records = g.find_related_paths("x", 0.0, 1, 100).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"y"));
        assert!(ids.contains(&"w"));
    }

    #[tokio::test]
    async fn test_min_confidence_prunes_weak_edges() {
        let g = diamond().await;
        let records = g.find_related_paths("x", 0.6, 2, 10).await.unwrap();
        assert!(records.iter().all(|r| r.target_id != "w"));
    }

    #[tokio::test]
    async fn test_dedup_keeps_best_path() {
        let g = MemoryGraph::new();
        // Two routes to t: direct (0.5) and via m (0.9 * 0.9 = 0.81)
        g.upsert_similarity("s", "S", "t", "T", 0.5).await.unwrap();
        g.upsert_similarity("s", "S", "m", "M", 0.9).await.unwrap();
        g.upsert_similarity("m", "M", "t", "T", 0.9).await.unwrap();

        let records = g.find_related_paths("s", 0.0, 2, 10).await.unwrap();
        let t = records.iter().find(|r| r.target_id == "t").unwrap();
        assert!((t.confidence - 0.81).abs() < 1e-9);
        assert_eq!(t.path_ids, vec!["s", "m", "t"]);
    }

    #[tokio::test]
    async fn test_ties_break_by_target_id() {
        let g = MemoryGraph::new();
        g.upsert_similarity("s", "S", "b", "B", 0.7).await.unwrap();
        g.upsert_similarity("s", "S", "a", "A", 0.7).await.unwrap();

        let records = g.find_related_paths("s", 0.0, 1, 10).await.unwrap();
        assert_eq!(records[0].target_id, "a");
        assert_eq!(records[1].target_id, "b");
    }

    #[tokio::test]
    async fn test_semantic_upsert_requires_endpoints() {
        let g = MemoryGraph::new();
        g.upsert_message("a", "A").await.unwrap();
        let written = g
            .upsert_semantic_batch(&[rel("a", "ghost", "Causal", 0.9)])
            .await
            .unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn test_semantic_upsert_idempotent() {
        let g = MemoryGraph::new();
        g.upsert_message("a", "A").await.unwrap();
        g.upsert_message("b", "B").await.unwrap();
        g.upsert_semantic_batch(&[rel("a", "b", "Causal", 0.5)])
            .await
            .unwrap();
        g.upsert_semantic_batch(&[rel("a", "b", "Causal", 0.9)])
            .await
            .unwrap();

        let records = g.find_related_paths("a", 0.0, 1, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_similarity_rejects_self_loop() {
        let g = MemoryGraph::new();
        assert!(g.upsert_similarity("a", "A", "a", "A", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_top_similar_excludes_and_orders() {
        let g = MemoryGraph::new();
        g.upsert_similarity("n", "N", "p", "P", 0.4).await.unwrap();
        g.upsert_similarity("n", "N", "q", "Q", 0.8).await.unwrap();
        g.upsert_similarity("n", "N", "m", "M", 0.6).await.unwrap();

        let neighbors = g.fetch_top_similar("n", 2, "m").await.unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].id, "q");
        assert_eq!(neighbors[1].id, "p");
    }
}
