//! Retrieval and question answering over the semantic graph.
//!
//! For a question, the [`InferenceEngine`]:
//!
//! 1. embeds the question and retrieves anchor messages by cosine search;
//! 2. traverses the graph from each anchor (bounded depth, confidence
//!    products) into one bin of [`RelatedMessage`]s per anchor;
//! 3. samples across the bins — greedy (exhaust the best anchor's bin
//!    first) or uniform (even quota per bin, remainder to the first bins);
//! 4. assembles a structured JSON prompt from the `inference.json` shell
//!    and asks the answering LLM;
//! 5. strips any markdown fence from the reply and parses it as a typed
//!    [`Response`].
//!
//! An empty anchor set is a [`InferenceError::NoMatches`] — no LLM call is
//! made. Failures are returned whole; there are no partial answers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::graph::GraphStore;
use crate::llm::LlmClient;
use crate::logfile::RunLog;
use crate::models::{Message, RelatedMessage, Relationship};
use crate::prompts::Prompts;
use crate::vector_index::VectorIndex;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no matching messages found")]
    NoMatches,
}

/// How the per-anchor bins are flattened into the prompt context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    /// Fill from the highest-ranked anchor's bin first.
    Greedy,
    /// Even quota per bin, remainder distributed to the first bins.
    Uniform,
}

/// The three preset retrieval strategies compared by the evaluation driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SimilarityOnly,
    SemanticOnly,
    Hybrid,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::SimilarityOnly,
        Strategy::SemanticOnly,
        Strategy::Hybrid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::SimilarityOnly => "similarity",
            Strategy::SemanticOnly => "semantic",
            Strategy::Hybrid => "hybrid",
        }
    }

    pub fn parse(name: &str) -> Option<Strategy> {
        match name {
            "similarity" => Some(Strategy::SimilarityOnly),
            "semantic" => Some(Strategy::SemanticOnly),
            "hybrid" => Some(Strategy::Hybrid),
            _ => None,
        }
    }
}

/// Everything one inference run needs, fully resolved.
#[derive(Debug, Clone)]
pub struct InferenceParams {
    pub question: String,
    pub max_similarity_anchors: usize,
    pub max_related_messages: usize,
    pub max_related_depth: usize,
    pub include_direct_matches: bool,
    pub system_prompt: String,
    pub sampling_strategy: SamplingStrategy,
    pub min_confidence: f64,
}

/// The answering LLM's parsed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub answer: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub supporting_evidence: Vec<SupportingEvidence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportingEvidence {
    pub message_id: String,
    #[serde(default)]
    pub relevance: String,
}

/// Sample up to `quota` related messages from the per-anchor bins.
pub fn sample_related(
    bins: &[Vec<RelatedMessage>],
    quota: usize,
    strategy: SamplingStrategy,
) -> Vec<RelatedMessage> {
    if bins.is_empty() || quota == 0 {
        return Vec::new();
    }

    let mut sampled = Vec::new();
    match strategy {
        SamplingStrategy::Greedy => {
            let mut remaining = quota;
            for bin in bins {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(bin.len());
                sampled.extend_from_slice(&bin[..take]);
                remaining -= take;
            }
        }
        SamplingStrategy::Uniform => {
            let per_bin = quota / bins.len();
            let extra = quota % bins.len();
            for (i, bin) in bins.iter().enumerate() {
                let mut take = per_bin;
                if i < extra {
                    take += 1;
                }
                sampled.extend_from_slice(&bin[..take.min(bin.len())]);
            }
        }
    }
    sampled
}

/// Strip a markdown code fence from an LLM reply, returning the inner
/// payload (language tag dropped). Replies without a fence pass through
/// trimmed.
pub fn strip_markdown_fence(answer: &str) -> String {
    if !answer.contains("```") {
        return answer.trim().to_string();
    }
    let parts: Vec<&str> = answer.split("```").collect();
    if parts.len() < 3 {
        return answer.trim().to_string();
    }
    let mut inner = parts[1].trim();
    if let Some(newline) = inner.find('\n') {
        // First line is a language tag like `json`
        let (first, rest) = inner.split_at(newline);
        if !first.trim_start().starts_with(['{', '[']) {
            inner = rest.trim();
        }
    }
    inner.to_string()
}

pub struct InferenceEngine {
    embedder: Box<dyn Embedder>,
    index: Box<dyn VectorIndex>,
    graph: Box<dyn GraphStore>,
    llm: Box<dyn LlmClient>,
    prompts: Prompts,
    defaults: crate::config::InferenceConfig,
    log: Mutex<RunLog>,
}

impl InferenceEngine {
    pub fn new(
        config: &Config,
        embedder: Box<dyn Embedder>,
        index: Box<dyn VectorIndex>,
        graph: Box<dyn GraphStore>,
        llm: Box<dyn LlmClient>,
        prompts: Prompts,
    ) -> Result<Self> {
        let log = RunLog::create(&config.logging.dir.join("inference"), "userinference")?;
        Ok(Self {
            embedder,
            index,
            graph,
            llm,
            prompts,
            defaults: config.inference.clone(),
            log: Mutex::new(log),
        })
    }

    /// Build an engine from configuration: all four providers plus the
    /// prompt assets, with the LLM health check run once up front.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = crate::embedding::create_embedder(config)?;
        let index = crate::vector_index::create_index(config).await?;
        let graph = crate::graph::create_graph(config).await?;
        let llm = crate::llm::create_llm(config)?;
        llm.health_check()
            .await
            .context("LLM health check failed")?;
        let prompts = Prompts::load(config)?;
        Self::new(config, embedder, index, graph, llm, prompts)
    }

    pub fn graph(&self) -> &dyn GraphStore {
        self.graph.as_ref()
    }

    /// Resolve a strategy preset into concrete parameters.
    ///
    /// With A configured anchors and M related messages: similarity-only
    /// widens the anchor set to A·M and skips traversal entirely;
    /// semantic-only keeps A anchors and samples M related messages
    /// uniformly with no direct matches; hybrid includes both.
    pub fn params_for(&self, strategy: Strategy, question: &str) -> InferenceParams {
        let anchors = self.defaults.max_similarity_anchors;
        let related = self.defaults.max_related_messages;
        let base = InferenceParams {
            question: question.to_string(),
            max_similarity_anchors: anchors,
            max_related_messages: related,
            max_related_depth: self.defaults.max_related_depth,
            include_direct_matches: true,
            system_prompt: self.prompts.inference_system.clone(),
            sampling_strategy: SamplingStrategy::Uniform,
            min_confidence: self.defaults.min_confidence,
        };
        match strategy {
            Strategy::SimilarityOnly => InferenceParams {
                max_similarity_anchors: anchors * related.max(1),
                max_related_messages: 0,
                sampling_strategy: SamplingStrategy::Greedy,
                ..base
            },
            Strategy::SemanticOnly => InferenceParams {
                include_direct_matches: false,
                ..base
            },
            Strategy::Hybrid => base,
        }
    }

    /// Answer a question. See the module docs for the full algorithm.
    pub async fn infer(&self, params: &InferenceParams) -> Result<Response> {
        let embedding = self
            .embedder
            .embed(&params.question)
            .await
            .context("failed to embed question")?;

        let anchors = self
            .index
            .search(&embedding, params.max_similarity_anchors)
            .await
            .context("anchor search failed")?;
        if anchors.is_empty() {
            return Err(InferenceError::NoMatches.into());
        }

        // One bin per anchor, in anchor rank order.
        let mut bins: Vec<Vec<RelatedMessage>> = Vec::with_capacity(anchors.len());
        if params.max_related_messages > 0 {
            for anchor in &anchors {
                let records = self
                    .graph
                    .find_related_paths(
                        &anchor.id,
                        params.min_confidence,
                        params.max_related_depth,
                        params.max_related_messages,
                    )
                    .await
                    .with_context(|| format!("traversal failed for anchor {}", anchor.id))?;
                bins.push(
                    records
                        .into_iter()
                        .map(|r| RelatedMessage {
                            message: Message::new(r.target_id.clone(), r.target_text),
                            relation: Relationship {
                                source_id: anchor.id.clone(),
                                target_id: r.target_id,
                                relation: r.relation,
                                confidence: r.confidence,
                                evidence: r.evidence,
                            },
                            path: r.path_ids,
                        })
                        .collect(),
                );
            }
        }

        let related = sample_related(&bins, params.max_related_messages, params.sampling_strategy);

        let user_prompt = self.assemble_prompt(params, &anchors, &related)?;
        let answer = self
            .llm
            .chat(&params.system_prompt, &user_prompt)
            .await
            .context("failed to get LLM inference")?;

        {
            let mut log = self.log.lock().unwrap();
            log.section("Inference Request");
            log.line(format!("Question: {}", params.question));
            log.section("Direct Matches");
            for anchor in &anchors {
                log.line(format!("{}  {}", anchor.id, anchor.text));
            }
            log.section("Related Messages");
            for msg in &related {
                log.line(format!(
                    "{}  [{} {:.2}]  {}",
                    msg.message.id, msg.relation.relation, msg.relation.confidence, msg.message.text
                ));
            }
            log.section("Prompt");
            log.line(&user_prompt);
            log.section("Response");
            log.line(&answer);
        }

        let cleaned = strip_markdown_fence(&answer);
        let response: Response =
            serde_json::from_str(&cleaned).context("failed to parse LLM response")?;
        info!(
            anchors = anchors.len(),
            related = related.len(),
            confidence = response.confidence,
            "answered question"
        );
        Ok(response)
    }

    /// Populate the `inference.json` shell with this run's input.
    fn assemble_prompt(
        &self,
        params: &InferenceParams,
        anchors: &[crate::vector_index::SearchHit],
        related: &[RelatedMessage],
    ) -> Result<String> {
        let direct_match: Vec<serde_json::Value> = if params.include_direct_matches {
            anchors
                .iter()
                .map(|a| serde_json::json!({ "id": a.id, "text": a.text }))
                .collect()
        } else {
            Vec::new()
        };

        let related_messages: Vec<serde_json::Value> = related
            .iter()
            .map(|r| {
                serde_json::json!({
                    "message": { "id": r.message.id, "text": r.message.text },
                    "relation": {
                        "type": r.relation.relation,
                        "confidence": r.relation.confidence,
                        "evidence": r.relation.evidence,
                    },
                    "path": r.path,
                })
            })
            .collect();

        let mut prompt = self.prompts.inference_shell.clone();
        prompt["input"] = serde_json::json!({
            "question": params.question,
            "context": {
                "direct_match": direct_match,
                "related_messages": related_messages,
            },
        });
        Ok(serde_json::to_string(&prompt)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn related(id: &str) -> RelatedMessage {
        RelatedMessage {
            message: Message::new(id, format!("text {}", id)),
            relation: Relationship {
                source_id: "anchor".to_string(),
                target_id: id.to_string(),
                relation: "Causal".to_string(),
                confidence: 0.9,
                evidence: String::new(),
            },
            path: vec!["anchor".to_string(), id.to_string()],
        }
    }

    fn bin(ids: &[&str]) -> Vec<RelatedMessage> {
        ids.iter().map(|id| related(id)).collect()
    }

    fn ids(sampled: &[RelatedMessage]) -> Vec<&str> {
        sampled.iter().map(|m| m.message.id.as_str()).collect()
    }

    #[test]
    fn test_greedy_single_bin_takes_prefix() {
        let bins = vec![bin(&["a", "b", "c"])];
        let sampled = sample_related(&bins, 2, SamplingStrategy::Greedy);
        assert_eq!(ids(&sampled), vec!["a", "b"]);
    }

    #[test]
    fn test_greedy_spills_into_next_bin() {
        let bins = vec![bin(&["a", "b"]), bin(&["c", "d"])];
        let sampled = sample_related(&bins, 3, SamplingStrategy::Greedy);
        assert_eq!(ids(&sampled), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_greedy_large_quota_returns_concatenation() {
        let bins = vec![bin(&["a"]), bin(&["b", "c"])];
        let sampled = sample_related(&bins, 10, SamplingStrategy::Greedy);
        assert_eq!(ids(&sampled), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_uniform_even_split() {
        let bins = vec![bin(&["a", "b", "c"]), bin(&["d", "e", "f"])];
        let sampled = sample_related(&bins, 4, SamplingStrategy::Uniform);
        assert_eq!(ids(&sampled), vec!["a", "b", "d", "e"]);
    }

    #[test]
    fn test_uniform_remainder_goes_to_first_bins() {
        let bins = vec![bin(&["a", "b"]), bin(&["c", "d"]), bin(&["e", "f"])];
        let sampled = sample_related(&bins, 4, SamplingStrategy::Uniform);
        // 4 / 3 = 1 each, remainder 1 to the first bin
        assert_eq!(ids(&sampled), vec!["a", "b", "c", "e"]);
    }

    #[test]
    fn test_uniform_never_exceeds_bin_length() {
        let bins = vec![bin(&["a"]), bin(&["b", "c", "d"])];
        let sampled = sample_related(&bins, 6, SamplingStrategy::Uniform);
        assert_eq!(ids(&sampled), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_sampling_empty_bins() {
        assert!(sample_related(&[], 5, SamplingStrategy::Greedy).is_empty());
        let bins = vec![Vec::new(), bin(&["a"])];
        let sampled = sample_related(&bins, 2, SamplingStrategy::Uniform);
        assert_eq!(ids(&sampled), vec!["a"]);
    }

    #[test]
    fn test_strip_fence_with_language_tag() {
        let fenced = "```json\n{\"answer\":\"hi\",\"confidence\":0.9}\n```";
        assert_eq!(
            strip_markdown_fence(fenced),
            "{\"answer\":\"hi\",\"confidence\":0.9}"
        );
    }

    #[test]
    fn test_strip_fence_without_language_tag() {
        let fenced = "```\n{\"answer\":\"hi\"}\n```";
        assert_eq!(strip_markdown_fence(fenced), "{\"answer\":\"hi\"}");
    }

    #[test]
    fn test_strip_fence_passthrough() {
        assert_eq!(
            strip_markdown_fence("  {\"answer\":\"hi\"} "),
            "{\"answer\":\"hi\"}"
        );
    }

    #[test]
    fn test_fenced_answer_parses() {
        let fenced = "```json\n{\"answer\":\"hi\",\"confidence\":0.9}\n```";
        let response: Response = serde_json::from_str(&strip_markdown_fence(fenced)).unwrap();
        assert_eq!(response.answer, "hi");
        assert!((response.confidence - 0.9).abs() < 1e-9);
        assert!(response.supporting_evidence.is_empty());
    }

    #[test]
    fn test_strategy_names_roundtrip() {
        for strategy in Strategy::ALL {
            assert_eq!(Strategy::parse(strategy.name()), Some(strategy));
        }
        assert_eq!(Strategy::parse("keyword"), None);
    }
}
