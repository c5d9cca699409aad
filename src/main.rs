//! Fragmenta CLI
//!
//! Command-line interface over one configured stream:
//! - Ingest members from a JSON-lines file
//! - Resolve fragment identifiers
//! - List root buckets and index statistics
//! - Print a default configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use fragmenta::config::{generate_default_config, BackendKind, LoggingConfig};
use fragmenta::{Config, Engine, Member, ResolutionOutcome, WriteOutcome};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fragmenta")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve an append-only member stream as linked fragments")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the repository backend (memory, document, search)
    #[arg(short, long, global = true)]
    pub backend: Option<BackendKind>,

    /// Print fragments as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write members from a JSON-lines file
    Ingest {
        /// One member object per line
        path: PathBuf,
    },

    /// Resolve a fragment identifier, e.g. "1/2" or "a?timestamp=2024-01-01T00:00:00.000Z"
    Resolve {
        identifier: String,
        /// Follow redirects to the canonical fragment
        #[arg(short, long)]
        follow: bool,
    },

    /// List root buckets
    Roots,

    /// Show index statistics
    Stats,

    /// Print a default configuration file
    InitConfig {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(backend) = cli.backend {
        config.repository.backend = backend;
    }

    init_logging(&config.logging)?;
    tracing::info!("Fragmenta v{}", env!("CARGO_PKG_VERSION"));

    let engine = Engine::open(&config).await.context("opening stream")?;

    let result = run(&cli, &engine).await;
    engine.close().await?;
    result
}

async fn run(cli: &Cli, engine: &Engine) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Ingest { path } => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?;

            let (mut stored, mut duplicates, mut skipped, mut late) = (0usize, 0usize, 0usize, 0usize);
            for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let member: Member = serde_json::from_str(&line)
                    .with_context(|| format!("line {}: invalid member", number + 1))?;

                match engine.write(&member).await? {
                    WriteOutcome::Stored { .. } => stored += 1,
                    WriteOutcome::Duplicate => duplicates += 1,
                    WriteOutcome::Skipped(_) => skipped += 1,
                    WriteOutcome::Late(_) => late += 1,
                }
            }

            println!(
                "Stored {}, duplicates {}, skipped {}, late {}",
                stored, duplicates, skipped, late
            );
        }

        Commands::Resolve { identifier, follow } => {
            let mut outcome = engine.resolve(identifier).await?;
            if *follow {
                if let ResolutionOutcome::Redirect(target) = &outcome {
                    tracing::info!("Following redirect to {}", target);
                    outcome = engine.resolve(target).await?;
                }
            }

            match outcome {
                ResolutionOutcome::Found(fragment) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&fragment)?);
                }
                ResolutionOutcome::Found(fragment) => {
                    println!("Fragment: {}", fragment.identifier);
                    println!("Cache-Control: {}", fragment.cache);
                    println!("Members ({}):", fragment.members.len());
                    for member in &fragment.members {
                        println!("  {}", member.id);
                    }
                    println!("Relations ({}):", fragment.relations.len());
                    for relation in &fragment.relations {
                        println!("  {} -> {}", relation.kind.as_str(), relation.target);
                    }
                }
                ResolutionOutcome::Redirect(target) => println!("Redirect: {}", target),
                ResolutionOutcome::NotFound => anyhow::bail!("not found: {}", identifier),
            }
        }

        Commands::Roots => {
            for root in engine.roots().await? {
                println!("{}", root);
            }
        }

        Commands::Stats => {
            println!("{}", engine.stats().await);
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Install the tracing subscriber described by `[logging]`
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("fragmenta={}", logging.level).into());

    let file = match &logging.file {
        Some(path) => Some(Arc::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?,
        )),
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match (logging.format.as_str(), file) {
        ("json", Some(file)) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(file))
            .init(),
        ("json", None) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (_, Some(file)) => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
            .init(),
        (_, None) => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }

    Ok(())
}
