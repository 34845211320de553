//! # Vertex RAG CLI (`rag`)
//!
//! ```bash
//! rag --mode ingest                     # ingest everything under ingest.input_dir
//! rag --mode ingest docs/a.pdf b.txt    # ingest specific files
//! rag --mode ingest --dry-run           # parse and chunk only, write the manifest
//! rag --mode chat                       # interactive question answering
//! rag --config ./config/rag.toml --mode chat
//! ```
//!
//! Cloud identifiers may come from the config file, the environment or a
//! `.env` file in the working directory. Logs go to stderr (`RUST_LOG`,
//! else `LOG_LEVEL`); answers and ingestion reports go to stdout.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vertex_rag::agent::gemini::GeminiModel;
use vertex_rag::agent::Agent;
use vertex_rag::auth::TokenSource;
use vertex_rag::chat::run_chat;
use vertex_rag::config::{self, Config};
use vertex_rag::connector_fs;
use vertex_rag::index::vertex::VertexSearchIndex;
use vertex_rag::ingest::run_ingest;
use vertex_rag::search::SearchClient;
use vertex_rag::tools::{SearchKnowledgeBase, ToolRegistry};

/// Retrieval-augmented chat over documents indexed in Vertex AI Search.
#[derive(Parser)]
#[command(name = "rag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is allowed when every required value is set in the
    /// environment.
    #[arg(long, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// What to run.
    #[arg(long, value_enum)]
    mode: Mode,

    /// Parse and chunk without uploading (ingest mode only).
    #[arg(long)]
    dry_run: bool,

    /// Files to ingest instead of scanning `ingest.input_dir`.
    files: Vec<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Parse, chunk and upload documents to the search index.
    Ingest,
    /// Answer questions from the indexed documents.
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    init_logging();

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    tracing::debug!(project = %cfg.gcp.project_id, location = %cfg.gcp.location, "configuration loaded");

    let tokens = Arc::new(TokenSource::from_environment());
    let index = Arc::new(VertexSearchIndex::new(&cfg, tokens.clone())?);

    match cli.mode {
        Mode::Ingest => {
            let files = if cli.files.is_empty() {
                None
            } else {
                Some(connector_fs::from_paths(&cli.files))
            };
            run_ingest(&cfg, index.as_ref(), files, cli.dry_run).await?;
        }
        Mode::Chat => {
            let agent = build_agent(&cfg, index, tokens)?;
            let stdin = std::io::stdin();
            run_chat(&agent, stdin.lock(), std::io::stdout()).await?;
        }
    }

    Ok(())
}

fn build_agent(cfg: &Config, index: Arc<VertexSearchIndex>, tokens: Arc<TokenSource>) -> Result<Agent> {
    let client = SearchClient::new(index, cfg.search.timeout());
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(SearchKnowledgeBase::new(client)));
    let model = GeminiModel::new(cfg, tokens)?;
    Ok(Agent::new(Arc::new(model), tools, &cfg.agent))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| EnvFilter::new("vertex_rag=info,rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
