//! # Book Distill CLI (`distill`)
//!
//! ## Usage
//!
//! ```bash
//! distill --config ./config/distill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `distill serve` | Start the HTTP server |
//! | `distill analyze <file> --mode <mode>` | Distill one document locally |
//! | `distill modes` | List analysis modes and their labels |
//!
//! ## Examples
//!
//! ```bash
//! # Write a Blueprint report to stdout, progress to stderr
//! distill analyze ./books/thinking.epub --mode architect > blueprint.md
//!
//! # Machine-readable progress
//! distill analyze ./books/thinking.pdf --mode executor --progress json
//!
//! # Start the server
//! distill serve --config ./config/distill.toml
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use book_distill::config::{self, Config};
use book_distill::events::{EventSink, PipelineEvent};
use book_distill::modes::ModeCatalog;
use book_distill::pipeline::{AnalyzeRequest, Pipeline};
use book_distill::progress::ProgressMode;
use book_distill::server;
use book_distill::synthesis::ChatClient;

const DEFAULT_CONFIG: &str = "./config/distill.toml";

/// Book Distill: turn a book into a long-form structured report.
///
/// Settings are read from a TOML file. When `--config` is not given and
/// `./config/distill.toml` does not exist, built-in defaults apply.
#[derive(Parser)]
#[command(
    name = "distill",
    about = "Book Distill: turn book-length documents into structured reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Distill a single document.
    ///
    /// The report is written to stdout as it is generated and saved to the
    /// output directory. Progress goes to stderr.
    Analyze {
        /// Document to analyze (.pdf, .epub, .txt, .md).
        file: PathBuf,

        /// Analysis mode: architect, executor, or disruptor.
        #[arg(long, default_value = "architect")]
        mode: String,

        /// Progress output on stderr. Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List analysis modes and their report labels.
    Modes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,book_distill=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::load_config_or_default(Path::new(DEFAULT_CONFIG))?,
    };

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            file,
            mode,
            progress,
        } => {
            let ok = run_analyze(&cfg, &file, mode, progress).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Modes => {
            let catalog = ModeCatalog::from_config(&cfg.modes);
            for (mode, profile) in catalog.list() {
                println!("{:<10} {}", mode.as_str(), profile.label);
            }
        }
    }

    Ok(())
}

/// Runs one document through the pipeline. Returns `false` on an error event.
async fn run_analyze(
    cfg: &Config,
    file: &Path,
    mode: String,
    progress: Option<ProgressMode>,
) -> anyhow::Result<bool> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let client = ChatClient::from_config(&cfg.llm)?;
    let pipeline = Pipeline::from_config(cfg, Arc::new(client))?;
    let reporter = progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    let (sink, mut events) = EventSink::channel(64);
    let request = AnalyzeRequest {
        filename,
        bytes,
        mode,
    };
    let run = pipeline.run(request, sink);
    tokio::pin!(run);

    let mut ok = false;
    let mut finished = false;
    loop {
        tokio::select! {
            _ = &mut run, if !finished => finished = true,
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    PipelineEvent::Content { text } => {
                        let mut out = std::io::stdout().lock();
                        out.write_all(text.as_bytes())?;
                        out.flush()?;
                    }
                    PipelineEvent::Done { .. } => {
                        ok = true;
                        println!();
                        reporter.report(&event);
                    }
                    _ => reporter.report(&event),
                }
            }
        }
    }

    Ok(ok)
}
