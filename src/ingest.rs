//! Ingestion pipeline orchestration.
//!
//! Five stages, each independently enabled in `[ingestion] stages` (or via
//! `--stage` on the CLI), executed in pipeline order:
//!
//! 1. **embedding** — read `messages.jsonl`, compute missing ids, embed
//!    every message, write `messages_embeddings.jsonl`.
//! 2. **semantic_search** — create the vector collection and inject the
//!    embeddings file in batches of 100.
//! 3. **graph_construction** — connect to the graph store and ensure the
//!    message-id index.
//! 4. **graph_construction_pass_1** — build the similarity skeleton.
//! 5. **graph_construction_pass_2** — label semantic edges via the LLM.
//!
//! Components are initialized once, on first use, and shared by every
//! later stage, so in-process backends carry their state through the run.
//! Dev mode (`[devmode]`) first copies the head of the corpus into
//! `messages_dev.jsonl` so iterations stay fast.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::builder::GraphBuilder;
use crate::config::{Config, STAGES};
use crate::embedding::create_embedder;
use crate::graph::{create_graph, GraphStore};
use crate::llm::{create_llm, LlmClient};
use crate::models::message_id;
use crate::prompts::Prompts;
use crate::vector_index::{create_index, IndexedPoint, VectorIndex};

/// One line of the message input file.
#[derive(Debug, Deserialize)]
struct InputMessage {
    #[serde(default)]
    id: Option<String>,
    text: String,
}

/// Run the enabled stages in pipeline order.
///
/// `stage_overrides` (from `--stage` flags) replaces the config's stage
/// list when non-empty.
pub async fn run_ingest(config: &Config, stage_overrides: &[String]) -> Result<()> {
    let enabled: Vec<String> = if stage_overrides.is_empty() {
        config.ingestion.stages.clone()
    } else {
        for stage in stage_overrides {
            if !STAGES.contains(&stage.as_str()) {
                bail!(
                    "Unknown ingestion stage: '{}'. Available: {}",
                    stage,
                    STAGES.join(", ")
                );
            }
        }
        stage_overrides.to_vec()
    };

    if enabled.is_empty() {
        bail!("no ingestion stages enabled; set [ingestion] stages or pass --stage");
    }

    let mut index: Option<Box<dyn VectorIndex>> = None;
    let mut graph: Option<Box<dyn GraphStore>> = None;
    let mut llm: Option<Box<dyn LlmClient>> = None;

    for stage in STAGES {
        if !enabled.iter().any(|s| s == stage) {
            info!(stage, "skipping disabled stage");
            continue;
        }
        info!(stage, "executing stage");
        match stage {
            "embedding" => run_embedding_stage(config).await?,
            "semantic_search" => {
                let index = ensure_index(&mut index, config).await?;
                run_semantic_search_stage(config, index).await?;
            }
            "graph_construction" => {
                let graph = ensure_graph(&mut graph, config).await?;
                graph.ensure_message_index().await?;
                info!("graph store ready");
            }
            "graph_construction_pass_1" => {
                let index = ensure_index(&mut index, config).await?;
                let graph = ensure_graph(&mut graph, config).await?;
                GraphBuilder::new(config, index, graph).first_pass().await?;
            }
            "graph_construction_pass_2" => {
                let index = ensure_index(&mut index, config).await?;
                let graph = ensure_graph(&mut graph, config).await?;
                let llm = ensure_llm(&mut llm, config).await?;
                let prompts = Prompts::load(config)?;
                GraphBuilder::new(config, index, graph)
                    .second_pass(llm, &prompts)
                    .await?;
            }
            _ => unreachable!("stage names validated above"),
        }
        println!("stage {} ok", stage);
    }
    Ok(())
}

async fn ensure_index<'a>(
    slot: &'a mut Option<Box<dyn VectorIndex>>,
    config: &Config,
) -> Result<&'a dyn VectorIndex> {
    if slot.is_none() {
        *slot = Some(create_index(config).await?);
    }
    match slot.as_ref() {
        Some(index) => Ok(index.as_ref()),
        None => unreachable!(),
    }
}

async fn ensure_graph<'a>(
    slot: &'a mut Option<Box<dyn GraphStore>>,
    config: &Config,
) -> Result<&'a dyn GraphStore> {
    if slot.is_none() {
        *slot = Some(create_graph(config).await?);
    }
    match slot.as_ref() {
        Some(graph) => Ok(graph.as_ref()),
        None => unreachable!(),
    }
}

async fn ensure_llm<'a>(
    slot: &'a mut Option<Box<dyn LlmClient>>,
    config: &Config,
) -> Result<&'a dyn LlmClient> {
    if slot.is_none() {
        let llm = create_llm(config)?;
        llm.health_check()
            .await
            .context("LLM health check failed")?;
        *slot = Some(llm);
    }
    match slot.as_ref() {
        Some(llm) => Ok(llm.as_ref()),
        None => unreachable!(),
    }
}

/// Stage 1: embed the corpus into `messages_embeddings.jsonl`.
async fn run_embedding_stage(config: &Config) -> Result<()> {
    let input_name = if config.devmode.enabled {
        create_dev_file(config)?;
        "messages_dev.jsonl"
    } else {
        "messages.jsonl"
    };
    let input_path = config.data.input_dir.join(input_name);
    let messages = read_input_messages(&input_path)?;
    info!(count = messages.len(), file = %input_path.display(), "read messages");

    let embedder = create_embedder(config)?;
    std::fs::create_dir_all(&config.data.output_dir)?;
    let output_path = config.data.output_dir.join("messages_embeddings.jsonl");
    let mut output = std::fs::File::create(&output_path)?;

    let mut written = 0usize;
    for (id, text) in &messages {
        let embedding = match embedder.embed(text).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(id = %id, error = %err, "failed to embed message, skipping");
                continue;
            }
        };
        let record = IndexedPoint {
            id: id.clone(),
            text: text.clone(),
            embedding,
        };
        writeln!(output, "{}", serde_json::to_string(&record)?)?;
        written += 1;
    }
    info!(
        input_count = messages.len(),
        output_count = written,
        file = %output_path.display(),
        "generated embeddings"
    );
    Ok(())
}

/// Stage 2: inject the embeddings file into the vector index.
async fn run_semantic_search_stage(config: &Config, index: &dyn VectorIndex) -> Result<()> {
    index.ensure_collection().await?;

    let path = config.data.output_dir.join("messages_embeddings.jsonl");
    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open embeddings file: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut batch: Vec<IndexedPoint> = Vec::with_capacity(100);
    let mut count = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let point: IndexedPoint =
            serde_json::from_str(&line).context("failed to parse embedding record")?;
        batch.push(point);
        count += 1;
        if batch.len() == 100 {
            index.insert_batch(&batch).await?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        index.insert_batch(&batch).await?;
    }
    info!(count, "injected messages into vector index");
    Ok(())
}

fn read_input_messages(path: &Path) -> Result<Vec<(String, String)>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open input file: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut messages = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: InputMessage = serde_json::from_str(&line)
            .with_context(|| format!("invalid message at line {}", line_no + 1))?;
        let id = parsed
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| message_id(&parsed.text));
        messages.push((id, parsed.text));
    }
    Ok(messages)
}

/// Copy the first `max_messages` corpus lines into `messages_dev.jsonl`.
fn create_dev_file(config: &Config) -> Result<()> {
    let input_path = config.data.input_dir.join("messages.jsonl");
    let output_path = config.data.input_dir.join("messages_dev.jsonl");

    let file = std::fs::File::open(&input_path)
        .with_context(|| format!("failed to open input file: {}", input_path.display()))?;
    let reader = std::io::BufReader::new(file);
    let mut output = std::fs::File::create(&output_path)?;

    let mut count = 0usize;
    for line in reader.lines() {
        if count >= config.devmode.max_messages {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        writeln!(output, "{}", line)?;
        count += 1;
    }
    info!(count, file = %output_path.display(), "created dev corpus");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_input_messages_computes_missing_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("messages.jsonl");
        std::fs::write(
            &path,
            "{\"text\":\"first\"}\n{\"id\":\"custom\",\"text\":\"second\"}\n",
        )
        .unwrap();

        let messages = read_input_messages(&path).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, message_id("first"));
        assert_eq!(messages[1].0, "custom");
    }

    #[test]
    fn test_read_input_messages_rejects_bad_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("messages.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        assert!(read_input_messages(&path).is_err());
    }
}
