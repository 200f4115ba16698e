//! # Persona Graph CLI (`pgraph`)
//!
//! The `pgraph` binary drives the whole system: corpus ingestion, question
//! answering, strategy evaluation, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! pgraph --config ./config/pgraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pgraph ingest` | Run the ingestion stages enabled in config |
//! | `pgraph ingest --stage <name>` | Run specific stages (repeatable) |
//! | `pgraph infer interactive` | Ask questions at a REPL prompt |
//! | `pgraph infer batch --file <queries.jsonl>` | Answer a query file |
//! | `pgraph infer evaluate --file <queries.jsonl>` | Compare all strategies |
//! | `pgraph server` | Start the HTTP API |
//!
//! Fatal errors print a one-line reason and exit non-zero.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use persona_graph::config::{self, Config};
use persona_graph::evaluate::{load_queries, EvaluationDriver};
use persona_graph::infer::{InferenceEngine, Strategy};
use persona_graph::llm::create_llm;
use persona_graph::prompts::Prompts;
use persona_graph::{ingest, server};

/// Persona Graph — build a personal-semantic knowledge graph from a
/// message corpus and answer questions in the persona's voice.
#[derive(Parser)]
#[command(
    name = "pgraph",
    about = "Persona Graph — a personal-semantic knowledge graph with graph-guided question answering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion pipeline.
    ///
    /// Executes the stages enabled in `[ingestion] stages`, or exactly the
    /// stages named with `--stage`, always in pipeline order: embedding,
    /// semantic_search, graph_construction, graph_construction_pass_1,
    /// graph_construction_pass_2.
    Ingest {
        /// Run only these stages (repeatable), overriding the config.
        #[arg(long = "stage")]
        stages: Vec<String>,
    },

    /// Answer questions against the graph.
    Infer {
        #[command(subcommand)]
        mode: InferMode,
    },

    /// Start the HTTP server.
    Server,
}

#[derive(Subcommand)]
enum InferMode {
    /// Read questions from stdin, one per line (`quit` to exit).
    Interactive,

    /// Answer every query in a JSON-lines file and print the answers.
    Batch {
        /// Path to the query file.
        #[arg(long)]
        file: PathBuf,

        /// Only process queries with this difficulty.
        #[arg(long)]
        difficulty: Option<String>,
    },

    /// Run all three strategies per query and score them with the LLM.
    Evaluate {
        /// Path to the query file.
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(err) = run().await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { stages } => {
            ingest::run_ingest(&cfg, &stages).await?;
        }
        Commands::Infer { mode } => match mode {
            InferMode::Interactive => {
                let engine = InferenceEngine::from_config(&cfg).await?;
                run_interactive(&engine).await?;
            }
            InferMode::Batch { file, difficulty } => {
                let engine = InferenceEngine::from_config(&cfg).await?;
                run_batch(&engine, &file, difficulty.as_deref()).await?;
            }
            InferMode::Evaluate { file } => {
                run_evaluate(&cfg, &file).await?;
            }
        },
        Commands::Server => {
            let engine = InferenceEngine::from_config(&cfg).await?;
            server::run_server(&cfg, engine).await?;
        }
    }

    Ok(())
}

async fn run_interactive(engine: &InferenceEngine) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    loop {
        print!("\nEnter your question (or 'quit' to exit): ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "quit" {
            break;
        }

        let params = engine.params_for(Strategy::Hybrid, question);
        match engine.infer(&params).await {
            Ok(response) => {
                println!(
                    "\nAnswer (confidence: {:.2}):\n{}",
                    response.confidence, response.answer
                );
            }
            Err(err) => {
                eprintln!("Error processing question: {:#}", err);
            }
        }
    }
    Ok(())
}

async fn run_batch(
    engine: &InferenceEngine,
    file: &PathBuf,
    difficulty: Option<&str>,
) -> anyhow::Result<()> {
    let queries = load_queries(file, difficulty)?;
    println!("processing {} queries", queries.len());

    for query in &queries {
        println!("\n{}: {}", query.id, query.question);
        let params = engine.params_for(Strategy::Hybrid, &query.question);
        match engine.infer(&params).await {
            Ok(response) => {
                println!(
                    "answer (confidence {:.2}): {}",
                    response.confidence, response.answer
                );
            }
            Err(err) => {
                eprintln!("error: {:#}", err);
            }
        }
    }
    Ok(())
}

async fn run_evaluate(cfg: &Config, file: &PathBuf) -> anyhow::Result<()> {
    let engine = InferenceEngine::from_config(cfg).await?;
    let llm = create_llm(cfg)?;
    let prompts = Prompts::load(cfg)?;
    let queries = load_queries(file, None)?;
    println!("evaluating {} queries across all strategies", queries.len());

    let driver = EvaluationDriver::new(&engine, llm.as_ref(), &prompts.evaluation_system);
    driver.run(cfg, &queries).await
}
