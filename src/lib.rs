//! # Persona Graph
//!
//! **A personal-semantic knowledge graph over a message corpus, with
//! graph-guided question answering in the persona's voice.**
//!
//! Persona Graph ingests short messages (chat turns, diary entries,
//! utterances) authored by a single persona, wires them into a labeled
//! property graph in two passes, and answers natural-language questions by
//! traversing that graph around vector-search anchors.
//!
//! ## Architecture
//!
//! ```text
//! messages.jsonl ─▶ embed ─▶ vector index ─▶ Pass 1 ──▶ graph store
//!                                              │   IS_SIMILAR   │
//!                                              ▼                │
//!                                           Pass 2 (LLM) ───────┤
//!                                                RELATED_TO     │
//!                                                               ▼
//! question ─▶ embed ─▶ anchors ─▶ traversal ─▶ sampling ─▶ LLM ─▶ answer
//! ```
//!
//! ## Data Flow
//!
//! 1. The **embedding stage** ([`ingest`]) turns the corpus into
//!    `messages_embeddings.jsonl` and loads it into a [`vector_index`]
//!    (Qdrant, or the in-process JSONL fallback).
//! 2. **Pass 1** ([`builder`]) links every message to its top-K cosine
//!    neighbors with `IS_SIMILAR` edges.
//! 3. **Pass 2** ([`builder`]) walks each message's second-hop frontier,
//!    batches the work units, and asks the LLM to label `RELATED_TO`
//!    edges with one of eleven relation types, a confidence, and evidence.
//! 4. The **inference engine** ([`infer`]) answers questions: anchors by
//!    cosine search, bounded-depth confidence-product traversal, greedy or
//!    uniform sampling, structured prompt, parsed answer.
//! 5. The **evaluation driver** ([`evaluate`]) compares the three
//!    retrieval strategies on a query set with LLM-scored verdicts.
//!
//! ## Quick Start
//!
//! ```bash
//! pgraph ingest                        # run the stages enabled in config
//! pgraph ingest --stage embedding      # or run one stage
//! pgraph infer interactive             # ask questions at a prompt
//! pgraph infer batch --file queries.jsonl
//! pgraph infer evaluate --file queries.jsonl
//! pgraph server                        # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Message`, `RelationType`, `Relationship` |
//! | [`embedding`] | Embedding provider trait, Ollama and OpenAI variants |
//! | [`vector_index`] | Vector index trait, Qdrant adapter, JSONL fallback |
//! | [`graph`] | Graph store trait, Neo4j adapter, in-memory twin |
//! | [`llm`] | Chat LLM trait with shared retry policy |
//! | [`builder`] | Two-pass graph construction |
//! | [`prompts`] | Prompt assets and Pass-2 prompt rendering |
//! | [`infer`] | Retrieval, sampling, strategies, answer parsing |
//! | [`evaluate`] | Strategy comparison with LLM-scored verdicts |
//! | [`ingest`] | Five-stage pipeline orchestration |
//! | [`server`] | HTTP API (Axum) with CORS |
//! | [`logfile`] | Numbered per-run transcript logs |

pub mod builder;
pub mod config;
pub mod embedding;
pub mod evaluate;
pub mod graph;
pub mod infer;
pub mod ingest;
pub mod llm;
pub mod logfile;
pub mod models;
pub mod prompts;
pub mod server;
pub mod vector_index;
