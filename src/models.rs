//! Core data types used throughout Persona Graph.
//!
//! These types flow through both subsystems. The lifecycle is:
//!
//! ```text
//! messages.jsonl → Message → embed() → vector index
//!                                 ↓
//!                        Pass-1 (IS_SIMILAR edges)
//!                                 ↓
//!                        Pass-2 (RELATED_TO edges via LLM)
//!                                 ↓
//!                find_related_paths() → RelatedMessage → prompt
//! ```
//!
//! A message's identity is the hex SHA-256 digest of its text; the vector
//! index addresses the same message by a UUID rendering of the first 16
//! digest bytes. Both derivations live here so every component agrees on
//! ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A single persona utterance.
///
/// Created once at ingestion and never mutated. `embedding` is present only
/// while the message travels through the embedding stage; `score` is a
/// transient value attached by vector search or traversal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Message {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding: None,
            score: None,
        }
    }
}

/// The admissible labels for `RELATED_TO` edges.
///
/// The LLM is prompted with exactly these eleven labels; anything else it
/// produces is stored verbatim on the edge but flagged as a validation
/// warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationType {
    Causal,
    FollowUp,
    Contrast,
    Elaboration,
    Reframe,
    RoleInstruction,
    ScenarioSetup,
    TopicSwitch,
    SelfReference,
    MetaPrompting,
    IdentityExpression,
}

impl RelationType {
    pub const ALL: [RelationType; 11] = [
        RelationType::Causal,
        RelationType::FollowUp,
        RelationType::Contrast,
        RelationType::Elaboration,
        RelationType::Reframe,
        RelationType::RoleInstruction,
        RelationType::ScenarioSetup,
        RelationType::TopicSwitch,
        RelationType::SelfReference,
        RelationType::MetaPrompting,
        RelationType::IdentityExpression,
    ];

    /// The canonical label as it appears on edges and in prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causal => "Causal",
            RelationType::FollowUp => "Follow-up",
            RelationType::Contrast => "Contrast",
            RelationType::Elaboration => "Elaboration",
            RelationType::Reframe => "Reframe/Correction",
            RelationType::RoleInstruction => "Role Instruction",
            RelationType::ScenarioSetup => "Scenario Setup",
            RelationType::TopicSwitch => "Topic Switch",
            RelationType::SelfReference => "Self-Reference",
            RelationType::MetaPrompting => "Meta-Prompting",
            RelationType::IdentityExpression => "Identity Expression",
        }
    }

    /// Look up a label produced by the LLM. Returns `None` for anything
    /// outside the admitted set.
    pub fn parse(label: &str) -> Option<RelationType> {
        Self::ALL.iter().copied().find(|r| r.as_str() == label)
    }
}

/// A semantic relationship between two messages, as emitted by the LLM
/// during Pass-2 and stored on `RELATED_TO` edges.
///
/// The field names match the output schema the model is instructed to
/// follow (`data/prompts/outputschema.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: String,
}

/// A message reached by graph traversal from an anchor.
///
/// `relation` carries the terminal edge's label and the path-product
/// confidence; `path` lists the node ids from anchor to target inclusive.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedMessage {
    pub message: Message,
    pub relation: Relationship,
    pub path: Vec<String>,
}

/// Derive the stable message id: hex SHA-256 of the text.
pub fn message_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Derive the vector-index key for a message id: the first 16 bytes of the
/// hex digest rendered as a UUID.
///
/// Fails when the id is not a hex digest of at least 16 bytes (ids supplied
/// in the input file must follow the same scheme).
pub fn vector_key(id: &str) -> anyhow::Result<String> {
    let bytes = hex_bytes(id)?;
    if bytes.len() < 16 {
        anyhow::bail!("message id too short for a vector key: {}", id);
    }
    let uuid = Uuid::from_slice(&bytes[..16])?;
    Ok(uuid.to_string())
}

fn hex_bytes(s: &str) -> anyhow::Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        anyhow::bail!("odd-length hex string");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| anyhow::anyhow!("invalid hex in message id: {}", s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_stable() {
        let a = message_id("hello");
        let b = message_id("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, message_id("hello "));
    }

    #[test]
    fn test_vector_key_shape() {
        let id = message_id("solo");
        let key = vector_key(&id).unwrap();
        // 8-4-4-4-12 hex groups
        let parts: Vec<&str> = key.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[4].len(), 12);
        // Deterministic for the same id
        assert_eq!(key, vector_key(&id).unwrap());
    }

    #[test]
    fn test_vector_key_rejects_non_hex() {
        assert!(vector_key("not-a-digest").is_err());
    }

    #[test]
    fn test_relation_type_roundtrip() {
        for r in RelationType::ALL {
            assert_eq!(RelationType::parse(r.as_str()), Some(r));
        }
        assert_eq!(RelationType::parse("Banter"), None);
    }
}
