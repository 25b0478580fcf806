//! # QA Harness CLI (`qah`)
//!
//! Builds a knowledge base from support documents and a target page, then
//! generates grounded test cases and browser-automation scripts from it.
//!
//! ## Usage
//!
//! ```bash
//! qah --config ./config/qah.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qah build` | Parse, chunk and embed sources; extract selectors; publish a new version |
//! | `qah generate "<query>"` | Retrieve context and generate grounded test cases (JSON) |
//! | `qah script <file>` | Generate a browser-automation script for one test case (JSON) |
//! | `qah selectors` | Show the selector map or look one element up |
//! | `qah stats` | Summarize the published knowledge base |
//!
//! ## Examples
//!
//! ```bash
//! # Build from a docs directory and a checkout page
//! qah build --docs ./support_docs --markup ./checkout.html
//!
//! # Generate test cases for a feature
//! qah generate "discount code validation rules" --top-k 3 --out cases.json
//!
//! # Turn one of them into a Selenium script
//! qah script cases.json --id TC-001 --out test_tc_001.py
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use qa_harness::commands;
use qa_harness::config::{self, Config};
use qa_harness::stats;

const DEFAULT_CONFIG: &str = "./config/qah.toml";

/// QA Harness CLI: grounded test cases and automation scripts from support
/// documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/qah.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "qah",
    about = "QA Harness: grounded test cases and browser-automation scripts from support docs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/qah.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and publish a new knowledge base.
    ///
    /// Sources are the listed files plus, when `--docs` is given or no files
    /// are listed, every matching file under the docs directory. Sources that
    /// fail to parse are reported and skipped.
    Build {
        /// Individual source files (.md, .txt, .json, .html, .pdf).
        files: Vec<PathBuf>,

        /// Directory of support documents (defaults to `[sources] root`).
        #[arg(long)]
        docs: Option<PathBuf>,

        /// Markup page to extract selectors from (defaults to `[sources] markup`).
        #[arg(long)]
        markup: Option<PathBuf>,
    },

    /// Generate grounded test cases for a query.
    Generate {
        /// What to test, e.g. "discount code validation rules".
        query: String,

        /// Number of context chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Write the JSON response to a file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate a browser-automation script for one test case.
    Script {
        /// JSON file with a test case, an array of them, or a `generate` response.
        input: PathBuf,

        /// Test_ID to pick when the file holds several test cases.
        #[arg(long)]
        id: Option<String>,

        /// Also write the script code to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show the selector map, or look one element up.
    Selectors {
        /// Extract from this markup file instead of the published snapshot.
        #[arg(long)]
        markup: Option<PathBuf>,

        /// Exact key, or a term contained in a key.
        #[arg(long)]
        find: Option<String>,
    },

    /// Summarize the published knowledge base.
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load(cli_config: &Path) -> anyhow::Result<Config> {
    if !cli_config.exists() && cli_config.as_os_str() == DEFAULT_CONFIG {
        debug!(path = %cli_config.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    config::load_config(cli_config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Build {
            files,
            docs,
            markup,
        } => {
            commands::run_build(&cfg, files, docs, markup).await?;
        }
        Commands::Generate { query, top_k, out } => {
            commands::run_generate(&cfg, &query, top_k, out).await?;
        }
        Commands::Script { input, id, out } => {
            commands::run_script(&cfg, &input, id.as_deref(), out).await?;
        }
        Commands::Selectors { markup, find } => {
            commands::run_selectors(&cfg, markup, find.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
