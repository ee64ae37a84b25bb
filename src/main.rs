use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use halgraph::config::{Config, LoggingConfig};

mod cli;

#[derive(Parser)]
#[command(name = "halgraph")]
#[command(author = "Intent Project Team")]
#[command(version)]
#[command(about = "Detect hallucinated APIs in generated Python code against ingested repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to .halgraph.toml in the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Graph database path, overriding the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest (or re-ingest) a repository checkout
    Ingest {
        /// Repository directory
        path: PathBuf,

        /// Repository identifier (URL or path); defaults to the directory
        #[arg(short, long)]
        repo: Option<String>,

        /// Revision recorded with the graph
        #[arg(long)]
        revision: Option<String>,
    },

    /// Validate candidate files against ingested repositories
    Validate {
        /// Candidate Python files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Repositories to validate against (all when omitted)
        #[arg(short, long = "repo")]
        repos: Vec<String>,

        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove a repository's graph
    Remove {
        /// Repository identifier
        repo: String,
    },

    /// List ingested repositories
    Repos,

    /// Show graph statistics
    Stats,
}

fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_project_dir("."),
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging(cli.debug, cli.verbose, &config.logging);
    info!("halgraph v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Ingest { path, repo, revision } => {
            cli::ingest::ingest_repository(&config, path, repo, revision).await?;
        }

        Commands::Validate { files, repos, format } => {
            cli::validate::validate_files(&config, files, repos, format).await?;
        }

        Commands::Remove { repo } => {
            cli::repos::remove_repository(&config, repo).await?;
        }

        Commands::Repos => {
            cli::repos::list_repositories(&config).await?;
        }

        Commands::Stats => {
            cli::stats::show_stats(&config, cli.verbose).await?;
        }
    }

    Ok(())
}
