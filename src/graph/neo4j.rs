//! Neo4j-backed [`GraphStore`] over Bolt.
//!
//! All writes go through Cypher MERGE so both passes can be re-run safely.
//! The traversal query mirrors the contract in the module docs: Neo4j does
//! not allow a parameterized variable-length bound, so `max_depth` is
//! formatted into the pattern — it is an internal integer, never user
//! input.

use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph};
use tracing::{debug, warn};

use crate::config::GraphConfig;
use crate::models::{Message, Relationship};

use super::{GraphStore, PathRecord, SimilarNeighbor};

pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let graph = Graph::new(&config.uri, &config.username, &config.password)
            .await
            .with_context(|| format!("failed to connect to Neo4j at {}", config.uri))?;
        debug!(uri = %config.uri, "connected to Neo4j");
        Ok(Self { graph })
    }

    async fn node_exists(&self, id: &str) -> Result<bool> {
        let mut stream = self
            .graph
            .execute(
                query("MATCH (m:Message {id: $id}) RETURN count(m) > 0 AS present")
                    .param("id", id),
            )
            .await?;
        if let Some(row) = stream.next().await? {
            return Ok(row.get::<bool>("present").unwrap_or(false));
        }
        Ok(false)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn ensure_message_index(&self) -> Result<()> {
        self.graph
            .run(query(
                "CREATE INDEX message_id IF NOT EXISTS FOR (m:Message) ON (m.id)",
            ))
            .await?;
        Ok(())
    }

    async fn upsert_message(&self, id: &str, text: &str) -> Result<()> {
        self.graph
            .run(
                query("MERGE (m:Message {id: $id}) SET m.text = $text")
                    .param("id", id)
                    .param("text", text),
            )
            .await?;
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
        self.graph
            .run(
                query(
                    "MERGE (m:Message {id: $srcId})
                     SET m.text = $srcText
                     MERGE (n:Message {id: $dstId})
                     SET n.text = $dstText
                     MERGE (m)-[r:IS_SIMILAR]->(n)
                     SET r.score = $score",
                )
                .param("srcId", src_id)
                .param("srcText", src_text)
                .param("dstId", dst_id)
                .param("dstText", dst_text)
                .param("score", score),
            )
            .await?;
        Ok(())
    }

    async fn upsert_semantic_batch(&self, rels: &[Relationship]) -> Result<usize> {
        // Existence checks run as plain reads; the writes share one
        // transaction so a batch lands atomically.
        let mut writable = Vec::new();
        for rel in rels {
            if self.node_exists(&rel.source_id).await? && self.node_exists(&rel.target_id).await?
            {
                writable.push(rel);
            } else {
                warn!(
                    source = %rel.source_id,
                    target = %rel.target_id,
                    "skipping relationship, endpoints not found"
                );
            }
        }
        if writable.is_empty() {
            return Ok(0);
        }

        let mut txn = self.graph.start_txn().await?;
        for rel in &writable {
            txn.run(
                query(
                    "MATCH (m:Message {id: $sourceId})
                     MATCH (n:Message {id: $targetId})
                     MERGE (m)-[r:RELATED_TO {type: $relationType}]->(n)
                     SET r.confidence = $confidence, r.evidence = $evidence",
                )
                .param("sourceId", rel.source_id.as_str())
                .param("targetId", rel.target_id.as_str())
                .param("relationType", rel.relation.as_str())
                .param("confidence", rel.confidence)
                .param("evidence", rel.evidence.as_str()),
            )
            .await?;
        }
        txn.commit().await?;
        Ok(writable.len())
    }

    async fn count_messages_missing_text(&self) -> Result<u64> {
        let mut stream = self
            .graph
            .execute(query(
                "MATCH (m:Message) WHERE m.text IS NULL RETURN count(m) AS missing",
            ))
            .await?;
        if let Some(row) = stream.next().await? {
            return Ok(row.get::<i64>("missing").unwrap_or(0) as u64);
        }
        Ok(0)
    }

    async fn fetch_with_similar_neighbors(
        &self,
    ) -> Result<Vec<(Message, Vec<SimilarNeighbor>)>> {
        let mut stream = self
            .graph
            .execute(query(
                "MATCH (m:Message)-[r:IS_SIMILAR]->(n:Message)
                 WITH m, n, r
                 ORDER BY r.score DESC
                 RETURN m.id AS id, m.text AS text,
                        collect({id: n.id, text: n.text, score: r.score}) AS similar",
            ))
            .await?;

        let mut out = Vec::new();
        while let Some(row) = stream.next().await? {
            let id: String = row.get("id")?;
            let text: String = row.get("text").unwrap_or_default();
            let similar: Vec<SimilarRow> = row.get("similar").unwrap_or_default();
            let neighbors = similar
                .into_iter()
                .map(|s| SimilarNeighbor {
                    id: s.id,
                    text: s.text,
                    score: s.score,
                })
                .collect();
            out.push((Message::new(id, text), neighbors));
        }
        Ok(out)
    }

    async fn fetch_top_similar(
        &self,
        id: &str,
        limit: usize,
        exclude_id: &str,
    ) -> Result<Vec<SimilarNeighbor>> {
        let mut stream = self
            .graph
            .execute(
                query(
                    "MATCH (n:Message {id: $id})-[r:IS_SIMILAR]->(f:Message)
                     WHERE f.id <> $excludeId
                     RETURN f.id AS id, f.text AS text, r.score AS score
                     ORDER BY r.score DESC
                     LIMIT $limit",
                )
                .param("id", id)
                .param("excludeId", exclude_id)
                .param("limit", limit as i64),
            )
            .await?;

        let mut neighbors = Vec::new();
        while let Some(row) = stream.next().await? {
            neighbors.push(SimilarNeighbor {
                id: row.get("id")?,
                text: row.get("text").unwrap_or_default(),
                score: row.get("score").unwrap_or(0.0),
            });
        }
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

        // Variable-length bounds cannot be parameterized in Cypher, so the
        // depth is formatted in. Similarity edges carry `score`, semantic
        // edges carry `confidence`; coalesce makes both count.
        let cypher = format!(
            "MATCH path = (m:Message {{id: $id}})-[r*1..{}]-(n:Message)
             WHERE ALL(rel IN r WHERE coalesce(rel.confidence, rel.score) >= $minConfidence)
               AND n.id <> $id
             WITH n,
                  [rel IN relationships(path) |
                    CASE type(rel)
                      WHEN 'RELATED_TO' THEN rel.type
                      ELSE type(rel)
                    END
                  ] AS rel_types,
                  [rel IN relationships(path) | coalesce(rel.confidence, rel.score)] AS confidences,
                  [rel IN relationships(path) | coalesce(rel.evidence, '')] AS evidences,
                  [node IN nodes(path) | node.id] AS path_ids
             WITH n,
                  LAST(rel_types) AS relation_type,
                  REDUCE(acc = 1.0, x IN confidences | acc * x) AS confidence,
                  LAST(evidences) AS evidence,
                  path_ids
             ORDER BY confidence DESC
             WITH n, collect({{relation_type: relation_type, confidence: confidence,
                               evidence: evidence, path_ids: path_ids}})[0] AS best
             RETURN n.id AS target_id, n.text AS target_text,
                    best.relation_type AS relation_type,
                    best.confidence AS confidence,
                    best.evidence AS evidence,
                    best.path_ids AS path_ids
             ORDER BY best.confidence DESC, n.id ASC
             LIMIT $limit",
            max_depth
        );

        let mut stream = self
            .graph
            .execute(
                query(&cypher)
                    .param("id", start_id)
                    .param("minConfidence", min_confidence)
                    .param("limit", limit as i64),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = stream.next().await? {
            records.push(PathRecord {
                target_id: row.get("target_id")?,
                target_text: row.get("target_text").unwrap_or_default(),
                relation: row.get("relation_type").unwrap_or_default(),
                confidence: row.get("confidence").unwrap_or(0.0),
                evidence: row.get("evidence").unwrap_or_default(),
                path_ids: row.get("path_ids").unwrap_or_default(),
            });
        }
        Ok(records)
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let mut stream = self
            .graph
            .execute(
                query("MATCH (m:Message {id: $id}) RETURN m.id AS id, m.text AS text")
                    .param("id", id),
            )
            .await?;
        if let Some(row) = stream.next().await? {
            let id: String = row.get("id")?;
            let text: String = row.get("text").unwrap_or_default();
            return Ok(Some(Message::new(id, text)));
        }
        Ok(None)
    }
}

#[derive(serde::Deserialize, Default)]
struct SimilarRow {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: f64,
}
