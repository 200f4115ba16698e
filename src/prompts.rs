//! Prompt asset loading and Pass-2 prompt rendering.
//!
//! Three JSON shells and three system prompts live under the configured
//! prompts directory (default `data/prompts/`):
//!
//! | File | Purpose |
//! |------|---------|
//! | `inputschema.json` | Schema of the batch document shown to the model |
//! | `outputschema.json` | Schema of the relationship array expected back |
//! | `inference.json` | Shell for the question-answering prompt |
//! | `build_system_prompt.txt` | System prompt for Pass-2 labeling |
//! | `inference_system_prompt.txt` | System prompt for answering |
//! | `evaluation_system_prompt.txt` | System prompt for strategy scoring |
//!
//! The schema files are parsed at load time so a malformed asset fails the
//! run up front rather than mid-pipeline.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

use crate::config::Config;
use crate::models::Message;

/// A Pass-2 work unit: one source message and its deduplicated frontier.
#[derive(Debug, Clone)]
pub struct FrontierPair {
    pub source: Message,
    pub frontier: Vec<Message>,
}

/// All prompt assets, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub input_schema: Value,
    pub output_schema: Value,
    /// The `inference.json` shell: `instructions`, `input_schema`,
    /// `output_schema`, and an empty `input` to be populated per question.
    pub inference_shell: Value,
    pub build_system: String,
    pub inference_system: String,
    pub evaluation_system: String,
}

impl Prompts {
    pub fn load(config: &Config) -> Result<Self> {
        let dir = &config.prompts.dir;
        let inference_shell = load_schema(&dir.join("inference.json"))?;
        if !inference_shell.is_object() {
            anyhow::bail!("inference.json must be a JSON object");
        }
        Ok(Self {
            input_schema: load_schema(&dir.join("inputschema.json"))?,
            output_schema: load_schema(&dir.join("outputschema.json"))?,
            inference_shell,
            build_system: load_text(&dir.join(&config.prompts.build_system_prompt_file))?,
            inference_system: load_text(&dir.join(&config.prompts.inference_system_prompt_file))?,
            evaluation_system: load_text(&dir.join(&config.prompts.evaluation_system_prompt_file))?,
        })
    }

    /// Render the Pass-2 user prompt for a batch of work units: a single
    /// JSON document with both schemas and the batch input.
    pub fn batch_prompt(&self, batch: &[FrontierPair]) -> Result<String> {
        let entries: Vec<Value> = batch
            .iter()
            .map(|pair| {
                serde_json::json!({
                    "source_message": slim(&pair.source),
                    "frontier_messages": pair.frontier.iter().map(slim).collect::<Vec<_>>(),
                })
            })
            .collect();

        let prompt = serde_json::json!({
            "input_schema": self.input_schema,
            "output_schema": self.output_schema,
            "input": { "batch": entries },
        });
        Ok(serde_json::to_string_pretty(&prompt)?)
    }
}

/// Reduce a message to the `{id, text}` wire shape used in prompts.
fn slim(message: &Message) -> Value {
    serde_json::json!({ "id": message.id, "text": message.text })
}

fn load_schema(path: &Path) -> Result<Value> {
    let content = load_text(path)?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in prompt file: {}", path.display()))
}

fn load_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts() -> Prompts {
        Prompts {
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "array"}),
            inference_shell: serde_json::json!({"instructions": "answer"}),
            build_system: "build".to_string(),
            inference_system: "infer".to_string(),
            evaluation_system: "evaluate".to_string(),
        }
    }

    #[test]
    fn test_batch_prompt_shape() {
        let batch = vec![FrontierPair {
            source: Message::new("s1", "source text"),
            frontier: vec![Message::new("f1", "frontier text")],
        }];
        let rendered = prompts().batch_prompt(&batch).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();

        assert!(parsed.get("input_schema").is_some());
        assert!(parsed.get("output_schema").is_some());
        let entries = parsed.pointer("/input/batch").unwrap().as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].pointer("/source_message/id").unwrap(),
            &Value::String("s1".to_string())
        );
        assert_eq!(
            entries[0]
                .pointer("/frontier_messages/0/text")
                .unwrap(),
            &Value::String("frontier text".to_string())
        );
        // Embeddings never leak into prompts
        assert!(entries[0].pointer("/source_message/embedding").is_none());
    }
}
