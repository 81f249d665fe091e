//! # Resume Search CLI (`rsx`)
//!
//! ## Usage
//!
//! ```bash
//! rsx --config ./config/rsx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rsx load [path]` | Normalize the source and print ingestion stats |
//! | `rsx index` | Embed and index the source if anything changed |
//! | `rsx query "<text>"` | Nearest resumes, optionally answered by a chat model |
//! | `rsx show <id>` | Print one resume |
//! | `rsx summarize <id>` | Short summary of one resume |
//! | `rsx adopt <file>` | Make a new file the source and schedule a reindex |
//! | `rsx reset` | Drop the collection |
//! | `rsx status` | Collection size and what it was built from |
//!
//! Reports go to stdout; logs and progress go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use resume_search::answer::{self, ChatClient, ChatCompletion};
use resume_search::config::{self, Config};
use resume_search::pipeline::{find_record, Pipeline};
use resume_search::progress::ProgressMode;
use resume_search::stats;

/// Resume Search: ingest resume exports, index them, and query by meaning.
#[derive(Parser)]
#[command(name = "rsx", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./config/rsx.toml`
    /// when present, otherwise built-in defaults apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output while embedding: `auto`, `off`, `human` or `json`.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize the source file and print ingestion statistics.
    Load {
        /// File to load instead of the configured or adopted source.
        path: Option<PathBuf>,

        /// Print the stats as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Bring the index up to date with the source and embedding settings.
    Index {
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Search resumes by meaning.
    Query {
        text: String,

        /// Number of hits (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Only return resumes in this category.
        #[arg(long)]
        category: Option<String>,

        /// Ask the chat model to answer from the hits.
        #[arg(long)]
        answer: bool,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,

        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Print one resume by id.
    Show {
        id: String,

        /// Also print the raw HTML.
        #[arg(long)]
        html: bool,
    },

    /// Summarize one resume, falling back to its highest-weighted sentences.
    Summarize { id: String },

    /// Copy a file into the upload directory and make it the source.
    Adopt { file: PathBuf },

    /// Drop the collection and forget what it was built from.
    Reset,

    /// Show collection size and index freshness.
    Status,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let progress: ProgressMode = cli.progress.parse()?;
    let (config_path, explicit) = match &cli.config {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from(config::DEFAULT_CONFIG_PATH), false),
    };
    let cfg = config::load_config(&config_path, explicit)?;

    match cli.command {
        Commands::Load { path, json } => run_load(&cfg, path.as_deref(), json).await?,
        Commands::Index { path } => {
            let pipeline = Pipeline::open(&cfg, path.as_deref()).await?;
            let session = pipeline.prepare(progress.reporter().as_ref()).await?;
            print!("{}", stats::render_outcome(&session.outcome));
            pipeline.close().await;
        }
        Commands::Query {
            text,
            top_k,
            category,
            answer,
            json,
            path,
        } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            run_query(
                &cfg,
                progress,
                &text,
                top_k,
                category.as_deref(),
                answer,
                json,
                path.as_deref(),
            )
            .await?;
        }
        Commands::Show { id, html } => {
            let pipeline = Pipeline::open(&cfg, None).await?;
            let (records, ingestion) = pipeline.load();
            pipeline.close().await;
            let Some(record) = find_record(&records, &id) else {
                if let Some(err) = ingestion.error {
                    bail!("Resume not found: {} ({})", id, err);
                }
                bail!("Resume not found: {}", id);
            };
            println!("--- Resume ---");
            println!("id:       {}", record.id);
            println!("category: {}", record.category);
            println!();
            println!("--- Text ---");
            println!("{}", record.text);
            if html && !record.raw_html.is_empty() {
                println!();
                println!("--- HTML ---");
                println!("{}", record.raw_html);
            }
        }
        Commands::Summarize { id } => {
            let pipeline = Pipeline::open(&cfg, None).await?;
            let (records, _) = pipeline.load();
            pipeline.close().await;
            let Some(record) = find_record(&records, &id) else {
                bail!("Resume not found: {}", id);
            };
            let client = match ChatClient::from_config(&cfg) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(error = %e, "chat unavailable, using extractive summary");
                    None
                }
            };
            let chat = client.as_ref().map(|c| c as &dyn ChatCompletion);
            println!("{}", answer::summarize_resume(chat, &cfg, &record.text).await);
        }
        Commands::Adopt { file } => {
            let pipeline = Pipeline::open(&cfg, None).await?;
            let target = pipeline.adopt(&file).await?;
            pipeline.close().await;
            println!("adopt");
            println!("  source:  {}", target.display());
            println!("  pending: reindex");
        }
        Commands::Reset => {
            let pipeline = Pipeline::open(&cfg, None).await?;
            pipeline.reset().await?;
            pipeline.close().await;
            println!("reset");
            println!("  collection: {}", cfg.store.collection);
            println!("ok");
        }
        Commands::Status => {
            let pipeline = Pipeline::open(&cfg, None).await?;
            let status = pipeline.status().await?;
            pipeline.close().await;
            print!("{}", stats::render_status(&status));
        }
    }

    Ok(())
}

async fn run_load(cfg: &Config, path: Option<&Path>, json: bool) -> Result<()> {
    let pipeline = Pipeline::open(cfg, path).await?;
    let (_, ingestion) = pipeline.load();
    pipeline.close().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&ingestion)?);
    } else {
        print!("{}", stats::render_ingestion(&ingestion));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_query(
    cfg: &Config,
    progress: ProgressMode,
    text: &str,
    top_k: usize,
    category: Option<&str>,
    answer: bool,
    json: bool,
    path: Option<&Path>,
) -> Result<()> {
    let pipeline = Pipeline::open(cfg, path).await?;
    let session = pipeline.prepare(progress.reporter().as_ref()).await?;
    let hits = session.query(text, top_k, category).await?;
    pipeline.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else if hits.is_empty() {
        println!("No results.");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            println!("{}. [{:.3}] {}", i + 1, hit.distance, hit.id);
            println!("    category: {}", hit.category());
            let excerpt: String = hit.document.chars().take(200).collect();
            println!("    excerpt: \"{}\"", excerpt.trim());
            println!();
        }
    }

    if answer && !hits.is_empty() {
        let client = ChatClient::from_config(cfg)?;
        let reply = answer::answer_question(&client, cfg, text, &hits).await?;
        println!("--- Answer ---");
        println!("{}", reply);
    }
    Ok(())
}
