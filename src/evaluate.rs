//! Strategy evaluation driver.
//!
//! For every query in the batch file, runs all three retrieval strategies,
//! collects the candidate answers, and asks the LLM — under the evaluation
//! system prompt — to score each candidate against the reference answer.
//! Results land in `evaluations.jsonl`, one record per query. Per-query
//! failures are logged and skipped so one bad query never sinks a run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::builder::extract_json_array;
use crate::config::Config;
use crate::infer::{strip_markdown_fence, InferenceEngine, Strategy};
use crate::llm::LlmClient;

/// One line of the query input file.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(rename = "exampleCorrectAnswer", default)]
    pub example_correct_answer: String,
}

/// A candidate answer produced by one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub strategy: String,
    pub answer: String,
}

/// The evaluator's verdict for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub strategy_name: String,
    pub score: f64,
    #[serde(default)]
    pub explanation: String,
}

/// One line of the evaluation output file.
#[derive(Debug, Serialize)]
pub struct EvaluationRecord {
    pub query_id: String,
    pub question: String,
    pub evaluations: Vec<Evaluation>,
    pub candidates: Vec<Candidate>,
}

pub fn load_queries(path: &Path, difficulty: Option<&str>) -> Result<Vec<QueryRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read query file: {}", path.display()))?;

    let mut queries = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let query: QueryRecord = serde_json::from_str(line)
            .with_context(|| format!("invalid query at line {}", line_no + 1))?;
        if let Some(d) = difficulty {
            if query.difficulty != d {
                continue;
            }
        }
        queries.push(query);
    }
    Ok(queries)
}

pub struct EvaluationDriver<'a> {
    engine: &'a InferenceEngine,
    llm: &'a dyn LlmClient,
    evaluation_system: &'a str,
}

impl<'a> EvaluationDriver<'a> {
    pub fn new(
        engine: &'a InferenceEngine,
        llm: &'a dyn LlmClient,
        evaluation_system: &'a str,
    ) -> Self {
        Self {
            engine,
            llm,
            evaluation_system,
        }
    }

    /// Evaluate every query and write JSON-lines records to
    /// `<output_dir>/evaluations.jsonl`.
    pub async fn run(&self, config: &Config, queries: &[QueryRecord]) -> Result<()> {
        std::fs::create_dir_all(&config.data.output_dir)?;
        let out_path = config.data.output_dir.join("evaluations.jsonl");
        let mut out = std::fs::File::create(&out_path)?;

        for query in queries {
            info!(id = %query.id, "evaluating query");
            match self.evaluate_query(query).await {
                Ok(record) => {
                    writeln!(out, "{}", serde_json::to_string(&record)?)?;
                }
                Err(err) => {
                    warn!(id = %query.id, error = %err, "evaluation failed, skipping query");
                }
            }
        }
        println!("evaluations written to {}", out_path.display());
        Ok(())
    }

    async fn evaluate_query(&self, query: &QueryRecord) -> Result<EvaluationRecord> {
        let mut candidates = Vec::new();
        for strategy in Strategy::ALL {
            let params = self.engine.params_for(strategy, &query.question);
            let response = self
                .engine
                .infer(&params)
                .await
                .with_context(|| format!("strategy {} failed", strategy.name()))?;
            candidates.push(Candidate {
                strategy: strategy.name().to_string(),
                answer: response.answer,
            });
        }

        let evaluations = self.score_candidates(query, &candidates).await?;
        Ok(EvaluationRecord {
            query_id: query.id.clone(),
            question: query.question.clone(),
            evaluations,
            candidates,
        })
    }

    /// One scoring call covering all candidates for a query.
    async fn score_candidates(
        &self,
        query: &QueryRecord,
        candidates: &[Candidate],
    ) -> Result<Vec<Evaluation>> {
        let prompt = serde_json::to_string_pretty(&serde_json::json!({
            "question": query.question,
            "reference_answer": query.example_correct_answer,
            "candidates": candidates,
            "output_schema": [
                { "strategy_name": "string", "score": "number in [0,1]", "explanation": "string" }
            ],
        }))?;

        let reply = self
            .llm
            .chat(self.evaluation_system, &prompt)
            .await
            .context("evaluation LLM call failed")?;

        let cleaned = extract_json_array(&strip_markdown_fence(&reply))?;
        let mut evaluations: Vec<Evaluation> =
            serde_json::from_str(&cleaned).context("failed to parse evaluation response")?;
        for evaluation in &mut evaluations {
            // The rubric is the model's own; only the range is enforced.
            evaluation.score = evaluation.score.clamp(0.0, 1.0);
        }
        Ok(evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_queries_filters_by_difficulty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("queries.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"id\":\"q1\",\"question\":\"a?\",\"difficulty\":\"easy\"}\n",
                "{\"id\":\"q2\",\"question\":\"b?\",\"difficulty\":\"hard\"}\n",
            ),
        )
        .unwrap();

        let all = load_queries(&path, None).unwrap();
        assert_eq!(all.len(), 2);
        let hard = load_queries(&path, Some("hard")).unwrap();
        assert_eq!(hard.len(), 1);
        assert_eq!(hard[0].id, "q2");
    }

    #[test]
    fn test_query_record_reads_reference_answer() {
        let query: QueryRecord = serde_json::from_str(
            "{\"id\":\"q\",\"question\":\"x?\",\"exampleCorrectAnswer\":\"the answer\"}",
        )
        .unwrap();
        assert_eq!(query.example_correct_answer, "the answer");
    }
}
