//! # Deep Research CLI (`research`)
//!
//! Browse, view, export and delete research documents held in the remote
//! object store, start new generation jobs, or serve the library over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! research --config ./config/research.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `research list` | List documents, newest first |
//! | `research view <id>` | Print a document (markdown or HTML) |
//! | `research export <id>` | Render a document to PDF |
//! | `research delete <id>` | Delete a document after confirmation |
//! | `research generate` | Start a generation job and wait for it |
//! | `research topics` | Show research areas and topics |
//! | `research serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! research list --category Markets --search gdp
//! research export 6650f1c2 --out ./pdf
//! research generate --area Markets --topic GDP --depth Comprehensive --progress json
//! RUST_LOG=deep_research=debug research serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use deep_research::commands::{self, GenerateOptions};
use deep_research::config::{self, Config};
use deep_research::controller::{App, Confirmer, Preconfirmed, StdinConfirmer};
use deep_research::progress::{ProgressMode, ProgressReporter};
use deep_research::server;

/// Deep Research: a client for AI-generated research documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/research.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "research",
    about = "Deep Research: browse and generate AI research documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/research.toml`. Built-in defaults are used
    /// when the file does not exist.
    #[arg(long, global = true, default_value = "./config/research.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List documents, newest first.
    List {
        /// Only documents in this research area (`All` for every area).
        #[arg(long)]
        category: Option<String>,

        /// Case-insensitive match against title, area and topic.
        #[arg(long)]
        search: Option<String>,
    },

    /// Print a document.
    View {
        /// Document id.
        id: String,

        /// Print the rendered HTML instead of the markdown source.
        #[arg(long)]
        html: bool,
    },

    /// Render a document to `<title>.pdf`.
    Export {
        /// Document id.
        id: String,

        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Delete a document.
    Delete {
        /// Document id.
        id: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Start a generation job and wait until it completes, times out or
    /// fails. Ctrl-C stops tracking the job.
    Generate {
        /// Research area, e.g. `Markets`.
        #[arg(long)]
        area: String,

        /// Topic within the area, e.g. `GDP`.
        #[arg(long)]
        topic: String,

        /// `High-Level`, `Focused` or `Comprehensive`.
        #[arg(long)]
        depth: Option<String>,

        /// `Essential Points`, `Detailed Analysis` or `Exhaustive Research`.
        #[arg(long)]
        rigor: Option<String>,

        /// `Investment Research`, `Educational Summary` or `Technical Analysis`.
        #[arg(long)]
        focus: Option<String>,

        /// Progress output on stderr: `human`, `json` or `off`.
        /// Defaults to `human` on a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Show research areas and their topics.
    Topics,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Connect to the remote service and load the catalog.
async fn open_app(
    cfg: Config,
    reporter: Arc<dyn ProgressReporter>,
    confirmer: Arc<dyn Confirmer>,
) -> anyhow::Result<App> {
    let app = App::connect(cfg, reporter, confirmer)?;
    app.start().await;
    Ok(app)
}

fn quiet() -> Arc<dyn ProgressReporter> {
    Arc::from(ProgressMode::Off.reporter())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Topics => commands::run_topics(&cfg)?,
        Commands::Serve => server::run_server(cfg).await?,
        Commands::List { category, search } => {
            let app = open_app(cfg, quiet(), Arc::new(StdinConfirmer)).await?;
            commands::run_list(&app, category, search).await?;
        }
        Commands::View { id, html } => {
            let app = open_app(cfg, quiet(), Arc::new(StdinConfirmer)).await?;
            commands::run_view(&app, &id, html).await?;
        }
        Commands::Export { id, out } => {
            let app = open_app(cfg, quiet(), Arc::new(StdinConfirmer)).await?;
            commands::run_export(&app, &id, &out).await?;
        }
        Commands::Delete { id, yes } => {
            let confirmer: Arc<dyn Confirmer> = if yes {
                Arc::new(Preconfirmed(true))
            } else {
                Arc::new(StdinConfirmer)
            };
            let app = open_app(cfg, quiet(), confirmer).await?;
            commands::run_delete(&app, &id).await?;
        }
        Commands::Generate {
            area,
            topic,
            depth,
            rigor,
            focus,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter: Arc<dyn ProgressReporter> = Arc::from(mode.reporter());
            let app = open_app(cfg, reporter, Arc::new(Preconfirmed(false))).await?;
            let options = GenerateOptions {
                area,
                topic,
                depth,
                rigor,
                focus,
            };
            commands::run_generate(&app, options).await?;
        }
    }

    Ok(())
}
