//! Two-pass graph construction.
//!
//! **Pass 1** wires the similarity skeleton: for every message in the
//! vector index, its top-K cosine neighbors become `IS_SIMILAR` edges.
//! All writes are MERGE-idempotent, so an aborted pass is safe to re-run.
//!
//! **Pass 2** asks the LLM to label higher-order semantic edges. For each
//! source message the frontier is the union of its neighbors' own top
//! neighbors (second hop), deduplicated by id and excluding the source.
//! Work units are batched, each batch becomes one LLM call, and the parsed
//! relationships are validated and written inside one transaction per
//! batch. A batch that fails the LLM call or produces unparseable output
//! is logged and skipped; only graph-store errors abort the pass.
//!
//! # Ordering
//!
//! Pass-1 processes messages in index-scan order and emits edges in
//! vector-search result order. Within a batch, writes follow parse order.
//! Across batches no ordering is guaranteed (batches may run concurrently,
//! bounded by `llm.llm_concurrency`).

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::graph::GraphStore;
use crate::llm::LlmClient;
use crate::logfile::RunLog;
use crate::models::{Message, Relationship};
use crate::prompts::{FrontierPair, Prompts};
use crate::vector_index::VectorIndex;

/// Outcome of validating one LLM-emitted relationship against its batch.
///
/// Rejections are terminal (the relationship never reaches the graph);
/// warnings accompany accepted relationships that look suspicious but are
/// kept, since the model may legitimately find cross-source matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accepted(Relationship),
    Rejected { rel: Relationship, reason: String },
}

/// Validate one relationship against the batch it came from.
///
/// Returns the validation outcome plus any warnings to log.
pub fn validate_relationship(
    rel: Relationship,
    batch: &[FrontierPair],
) -> (Validation, Vec<String>) {
    if rel.source_id.is_empty() || rel.target_id.is_empty() {
        return (
            Validation::Rejected {
                reason: format!(
                    "empty id (source: '{}', target: '{}')",
                    rel.source_id, rel.target_id
                ),
                rel,
            },
            Vec::new(),
        );
    }

    let mut warnings = Vec::new();
    match batch.iter().find(|pair| pair.source.id == rel.source_id) {
        None => warnings.push(format!(
            "relationship source {} not found in current batch",
            rel.source_id
        )),
        Some(pair) => {
            if !pair.frontier.iter().any(|f| f.id == rel.target_id) {
                warnings.push(format!(
                    "relationship target {} not in frontier for source {}",
                    rel.target_id, rel.source_id
                ));
            }
        }
    }
    if crate::models::RelationType::parse(&rel.relation).is_none() {
        warnings.push(format!("relation label '{}' is not admitted", rel.relation));
    }

    (Validation::Accepted(rel), warnings)
}

/// Parse the LLM's Pass-2 response into relationships.
///
/// Best-effort, total-order cleanup: trim, cut prose around the outermost
/// `[...]` (a markdown fence falls away with the prose), and wrap a bare
/// object in an array. Anything still unparseable is an error the caller
/// logs and skips.
pub fn parse_llm_response(response: &str) -> Result<Vec<Relationship>> {
    let candidate = extract_json_array(response)?;
    let relationships: Vec<Relationship> =
        serde_json::from_str(&candidate).context("failed to parse LLM response")?;
    Ok(relationships)
}

/// Cut a JSON array out of free-form LLM output: trim, slice prose around
/// the outermost `[...]`, or wrap a bare `{...}` object in an array.
pub fn extract_json_array(response: &str) -> Result<String> {
    let trimmed = response.trim();

    if trimmed.starts_with('[') {
        return Ok(trimmed.to_string());
    }
    if trimmed.starts_with('{') {
        return Ok(format!("[{}]", trimmed));
    }
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            return Ok(trimmed[start..=end].to_string());
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Ok(format!("[{}]", &trimmed[start..=end]));
        }
    }
    anyhow::bail!("no JSON payload in LLM response");
}

/// Deduplicate a frontier by message id, preserving first-seen order.
pub fn dedup_frontier(frontier: Vec<Message>) -> Vec<Message> {
    let mut seen = std::collections::HashSet::new();
    frontier
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}

pub struct GraphBuilder<'a> {
    config: &'a Config,
    index: &'a dyn VectorIndex,
    graph: &'a dyn GraphStore,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(config: &'a Config, index: &'a dyn VectorIndex, graph: &'a dyn GraphStore) -> Self {
        Self {
            config,
            index,
            graph,
        }
    }

    /// Pass 1: build the similarity skeleton.
    pub async fn first_pass(&self) -> Result<()> {
        self.graph
            .ensure_message_index()
            .await
            .context("failed to create message index")?;

        let points = self.index.scan_all().await.context("failed to scan index")?;
        info!(count = points.len(), "building similarity skeleton");

        let k = self.config.graph.similarity_anchors;
        for (i, point) in points.iter().enumerate() {
            // Over-fetch by one so the self-hit never costs a neighbor slot.
            let hits = self
                .index
                .search(&point.embedding, k + 1)
                .await
                .with_context(|| format!("similarity search failed for {}", point.id))?;

            self.graph
                .upsert_message(&point.id, &point.text)
                .await
                .context("graph write failed")?;

            let mut edges = 0usize;
            for hit in &hits {
                if hit.id == point.id {
                    continue; // self-hit
                }
                if edges == k {
                    break;
                }
                self.graph
                    .upsert_similarity(&point.id, &point.text, &hit.id, &hit.text, hit.score as f64)
                    .await
                    .context("graph write failed")?;
                edges += 1;
            }
            info!(
                processed = i + 1,
                total = points.len(),
                id = %point.id,
                edges,
                "linked similar messages"
            );
        }

        let missing = self.graph.count_messages_missing_text().await?;
        if missing > 0 {
            warn!(missing, "nodes with missing text property after pass 1");
        } else {
            info!("all nodes have text set after pass 1");
        }
        Ok(())
    }

    /// Pass 2: label semantic edges via the LLM.
    pub async fn second_pass(&self, llm: &dyn LlmClient, prompts: &Prompts) -> Result<()> {
        let sources = self
            .graph
            .fetch_with_similar_neighbors()
            .await
            .context("failed to fetch similarity skeleton")?;

        // Assemble work units: second-hop frontier per source, deduplicated.
        let frontier_limit = self.config.graph.semantic_frontier;
        let mut units: Vec<FrontierPair> = Vec::new();
        for (source, neighbors) in &sources {
            let mut frontier = Vec::new();
            for neighbor in neighbors {
                let second_hop = self
                    .graph
                    .fetch_top_similar(&neighbor.id, frontier_limit, &source.id)
                    .await
                    .context("failed to fetch frontier")?;
                frontier.extend(
                    second_hop
                        .into_iter()
                        .map(|n| Message::new(n.id, n.text)),
                );
            }
            let frontier = dedup_frontier(frontier);
            if frontier.is_empty() {
                info!(id = %source.id, "skipping source with empty frontier");
                continue;
            }
            units.push(FrontierPair {
                source: source.clone(),
                frontier,
            });
        }

        let batches: Vec<Vec<FrontierPair>> = units
            .chunks(self.config.llm.inference_batch_size)
            .map(|c| c.to_vec())
            .collect();
        info!(
            sources = sources.len(),
            work_units = batches.iter().map(Vec::len).sum::<usize>(),
            batches = batches.len(),
            "starting semantic labeling"
        );

        let log = Mutex::new(RunLog::create(
            &self.config.logging.dir.join("graphdb"),
            "llminference",
        )?);

        let results: Vec<Result<()>> = stream::iter(batches.into_iter().enumerate())
            .map(|(batch_no, batch)| {
                let log = &log;
                async move { self.process_batch(llm, prompts, batch_no, batch, log).await }
            })
            .buffer_unordered(self.config.llm.llm_concurrency)
            .collect()
            .await;

        for result in results {
            result?; // graph-store errors escalate
        }
        Ok(())
    }

    async fn process_batch(
        &self,
        llm: &dyn LlmClient,
        prompts: &Prompts,
        batch_no: usize,
        batch: Vec<FrontierPair>,
        log: &Mutex<RunLog>,
    ) -> Result<()> {
        let prompt = prompts.batch_prompt(&batch)?;
        {
            let mut log = log.lock().unwrap();
            log.section(&format!("Batch {}", batch_no));
            log.line(format!("Batch size: {}", batch.len()));
            for pair in &batch {
                log.line(format!(
                    "Source {} ({} frontier messages)",
                    pair.source.id,
                    pair.frontier.len()
                ));
            }
            log.section("Prompt");
            log.line(&prompt);
        }

        let response = match llm.chat(&prompts.build_system, &prompt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(batch = batch_no, error = %err, "LLM call failed, skipping batch");
                log.lock().unwrap().line(format!("LLM error: {}", err));
                return Ok(());
            }
        };
        {
            let mut log = log.lock().unwrap();
            log.section("Response");
            log.line(&response);
        }

        let relationships = match parse_llm_response(&response) {
            Ok(rels) => rels,
            Err(err) => {
                warn!(batch = batch_no, error = %err, "unparseable response, skipping batch");
                log.lock().unwrap().line(format!("Parse error: {}", err));
                return Ok(());
            }
        };

        let mut accepted = Vec::new();
        for rel in relationships {
            let (validation, warnings) = validate_relationship(rel, &batch);
            for warning in warnings {
                warn!(batch = batch_no, "{}", warning);
                log.lock().unwrap().line(format!("Warning: {}", warning));
            }
            match validation {
                Validation::Accepted(rel) => accepted.push(rel),
                Validation::Rejected { rel, reason } => {
                    warn!(batch = batch_no, %reason, "rejected relationship");
                    log.lock().unwrap().line(format!(
                        "Rejected {} -> {}: {}",
                        rel.source_id, rel.target_id, reason
                    ));
                }
            }
        }

        let written = self
            .graph
            .upsert_semantic_batch(&accepted)
            .await
            .context("graph write failed during pass 2")?;
        info!(
            batch = batch_no,
            parsed = accepted.len(),
            written,
            "batch complete"
        );
        log.lock()
            .unwrap()
            .line(format!("Wrote {} relationships", written));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(source: &str, target: &str) -> Relationship {
        Relationship {
            source_id: source.to_string(),
            target_id: target.to_string(),
            relation: "Elaboration".to_string(),
            confidence: 0.8,
            evidence: "because".to_string(),
        }
    }

    fn batch_with(source: &str, frontier: &[&str]) -> Vec<FrontierPair> {
        vec![FrontierPair {
            source: Message::new(source, "src"),
            frontier: frontier.iter().map(|f| Message::new(*f, "t")).collect(),
        }]
    }

    #[test]
    fn test_parse_plain_array() {
        let rels = parse_llm_response(
            r#"[{"source_id":"a","target_id":"b","relation":"Causal","confidence":0.9,"evidence":"x"}]"#,
        )
        .unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relation, "Causal");
    }

    #[test]
    fn test_parse_single_object_wrapped() {
        let rels = parse_llm_response(
            r#"{"source_id":"a","target_id":"b","relation":"Causal","confidence":0.9,"evidence":"x"}"#,
        )
        .unwrap();
        assert_eq!(rels.len(), 1);
    }

    #[test]
    fn test_parse_fenced_response() {
        let fenced = "```json\n[{\"source_id\":\"a\",\"target_id\":\"b\",\"relation\":\"Contrast\",\"confidence\":0.7,\"evidence\":\"\"}]\n```";
        let rels = parse_llm_response(fenced).unwrap();
        assert_eq!(rels[0].relation, "Contrast");
    }

    #[test]
    fn test_parse_prose_wrapped_array() {
        let chatty = "Sure! Here are the relationships:\n[{\"source_id\":\"a\",\"target_id\":\"b\",\"relation\":\"Follow-up\",\"confidence\":0.6,\"evidence\":\"\"}]\nHope that helps.";
        let rels = parse_llm_response(chatty).unwrap();
        assert_eq!(rels.len(), 1);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_llm_response("I could not find any relationships.").is_err());
    }

    #[test]
    fn test_validate_rejects_empty_ids() {
        let (validation, _) = validate_relationship(rel("", "b"), &batch_with("a", &["b"]));
        assert!(matches!(validation, Validation::Rejected { .. }));
    }

    #[test]
    fn test_validate_accepts_in_frontier_silently() {
        let (validation, warnings) =
            validate_relationship(rel("a", "b"), &batch_with("a", &["b", "c"]));
        assert!(matches!(validation, Validation::Accepted(_)));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_validate_warns_unknown_source_but_accepts() {
        let (validation, warnings) =
            validate_relationship(rel("zz", "b"), &batch_with("a", &["b"]));
        assert!(matches!(validation, Validation::Accepted(_)));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("not found in current batch"));
    }

    #[test]
    fn test_validate_warns_target_outside_frontier() {
        let (validation, warnings) =
            validate_relationship(rel("a", "elsewhere"), &batch_with("a", &["b"]));
        assert!(matches!(validation, Validation::Accepted(_)));
        assert!(warnings[0].contains("not in frontier"));
    }

    #[test]
    fn test_validate_warns_unknown_label() {
        let mut odd = rel("a", "b");
        odd.relation = "Banter".to_string();
        let (validation, warnings) = validate_relationship(odd, &batch_with("a", &["b"]));
        assert!(matches!(validation, Validation::Accepted(_)));
        assert!(warnings.iter().any(|w| w.contains("not admitted")));
    }

    #[test]
    fn test_dedup_frontier_keeps_first_occurrence() {
        let frontier = vec![
            Message::new("w", "first"),
            Message::new("v", "other"),
            Message::new("w", "second"),
        ];
        let deduped = dedup_frontier(frontier);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "w");
        assert_eq!(deduped[0].text, "first");
        assert_eq!(deduped[1].id, "v");
    }
}
