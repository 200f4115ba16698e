//! Graph store abstraction and implementations.
//!
//! The graph holds `Message` nodes and two edge kinds: `IS_SIMILAR`
//! (Pass-1, cosine score) and `RELATED_TO` (Pass-2, LLM-labeled relation
//! with confidence and evidence). Two backends implement the same
//! observable semantics:
//!
//! - **[`neo4j::Neo4jGraph`]** — a Neo4j server over Bolt; writes use MERGE
//!   so re-running either pass is idempotent.
//! - **[`memory::MemoryGraph`]** — an in-process adjacency-map twin used
//!   for development and tests.
//!
//! # Traversal contract
//!
//! [`GraphStore::find_related_paths`] enumerates simple paths of length
//! `1..=max_depth` outward from a start node, undirected over both edge
//! kinds. A path survives only if every edge's confidence (a similarity
//! edge counts its score) is at least `min_confidence`. Each surviving
//! path scores the product of its edge confidences; results are
//! deduplicated per target keeping the best path, sorted by that product
//! descending with ties broken by lexicographic target id, and truncated
//! to `limit`. `max_depth == 0` yields nothing.

pub mod memory;
pub mod neo4j;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::models::{Message, Relationship};

/// Name of the Pass-1 edge kind, used as the terminal relation label when a
/// path ends on a similarity edge.
pub const IS_SIMILAR: &str = "IS_SIMILAR";

/// A neighbor reached over one `IS_SIMILAR` edge.
#[derive(Debug, Clone)]
pub struct SimilarNeighbor {
    pub id: String,
    pub text: String,
    pub score: f64,
}

/// One traversal result: the target message plus how it was reached.
#[derive(Debug, Clone)]
pub struct PathRecord {
    pub target_id: String,
    pub target_text: String,
    /// Terminal relation: the last edge's `relation` when semantic, else
    /// `IS_SIMILAR`.
    pub relation: String,
    /// Product of edge confidences along the path.
    pub confidence: f64,
    /// Evidence of the last edge (empty for similarity edges).
    pub evidence: String,
    /// Node ids along the path, start and target inclusive.
    pub path_ids: Vec<String>,
}

/// Labeled property graph over messages. All write operations are
/// MERGE-idempotent.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ensure the index on `Message.id` exists. Idempotent.
    async fn ensure_message_index(&self) -> Result<()>;

    /// Merge a message node by id and set its text.
    async fn upsert_message(&self, id: &str, text: &str) -> Result<()>;

    /// Merge both endpoints (with their texts) and the `IS_SIMILAR` edge
    /// from source to target.
    async fn upsert_similarity(
        &self,
        src_id: &str,
        src_text: &str,
        dst_id: &str,
        dst_text: &str,
        score: f64,
    ) -> Result<()>;

    /// Write a batch of semantic relationships inside one transaction.
    ///
    /// Endpoints must already exist; relationships referencing unknown
    /// nodes are skipped with a warning. Returns the number of edges
    /// written.
    async fn upsert_semantic_batch(&self, rels: &[Relationship]) -> Result<usize>;

    /// Number of message nodes whose text is missing (Pass-1 verification).
    async fn count_messages_missing_text(&self) -> Result<u64>;

    /// Every message with at least one outgoing `IS_SIMILAR` edge, paired
    /// with its neighbors ordered by edge score descending.
    async fn fetch_with_similar_neighbors(&self)
        -> Result<Vec<(Message, Vec<SimilarNeighbor>)>>;

    /// Top similar neighbors of `id` by edge score descending, excluding
    /// `exclude_id`.
    async fn fetch_top_similar(
        &self,
        id: &str,
        limit: usize,
        exclude_id: &str,
    ) -> Result<Vec<SimilarNeighbor>>;

    /// Bounded-depth confidence-product traversal; see the module docs for
    /// the full contract.
    async fn find_related_paths(
        &self,
        start_id: &str,
        min_confidence: f64,
        max_depth: usize,
        limit: usize,
    ) -> Result<Vec<PathRecord>>;

    /// Fetch a message node by id.
    async fn get_message(&self, id: &str) -> Result<Option<Message>>;
}

/// Instantiate the graph backend named in the configuration.
pub async fn create_graph(config: &Config) -> Result<Box<dyn GraphStore>> {
    match config.graph.provider.as_str() {
        "neo4j" => Ok(Box::new(neo4j::Neo4jGraph::connect(&config.graph).await?)),
        "memory" => Ok(Box::new(memory::MemoryGraph::new())),
        other => anyhow::bail!("Unknown graph provider: {}", other),
    }
}
