//! # Guide2Govern CLI (`g2g`)
//!
//! ```bash
//! g2g --config ./config/g2g.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `g2g init` | Create the SQLite database and run schema migrations |
//! | `g2g ingest` | Index new and changed documents, prune removed ones |
//! | `g2g ask "<question>"` | Answer one question from the indexed documents |
//! | `g2g parse <file.docx>` | Show a document's paragraphs, images and links |
//! | `g2g sources` | List indexed documents |
//! | `g2g serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use guide2govern::{commands, config, migrate, server};

/// Guide2Govern: document-grounded answers over corporate `.docx` files.
///
/// All commands except `parse` read a TOML configuration file. See
/// `config/g2g.example.toml` for every option.
#[derive(Parser)]
#[command(name = "g2g", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/g2g.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index the documents and upload folders.
    ///
    /// Only new or changed documents are embedded; documents that were
    /// removed from disk are dropped from the index.
    Ingest {
        /// Re-index every document, even unchanged ones.
        #[arg(long)]
        full: bool,
    },

    /// Ask a question and print the grounded answer.
    Ask {
        question: String,

        /// Print the retrieved chunks before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Parse a `.docx` file and print its paragraph sequence.
    Parse { file: PathBuf },

    /// List indexed documents.
    Sources,

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guide2govern=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let load_config = || config::load_config(&cli.config);

    match cli.command {
        Commands::Init => {
            let cfg = load_config()?;
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { full } => {
            commands::run_ingest(&load_config()?, full).await?;
        }
        Commands::Ask {
            question,
            show_context,
        } => {
            commands::run_ask(&load_config()?, &question, show_context).await?;
        }
        Commands::Parse { file } => {
            // Needs no configuration.
            commands::run_parse(&file)?;
        }
        Commands::Sources => {
            commands::run_sources(&load_config()?).await?;
        }
        Commands::Serve => {
            server::run_server(&load_config()?).await?;
        }
    }

    Ok(())
}
