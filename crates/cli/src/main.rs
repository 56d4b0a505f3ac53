//! BinVault CLI - bv command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod locks;
mod util;

/// BinVault - snapshot version control for large binary assets
#[derive(Parser)]
#[command(name = "bv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a BinVault repository in the current directory
    Init,
    /// Snapshot a directory tree under a new tag
    Add {
        /// Directory to snapshot
        dir: PathBuf,

        /// Tag to register the snapshot under
        #[arg(short, long)]
        tag: String,

        /// Override the configured worker count
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Materialize a tagged snapshot into a destination directory
    Restore {
        /// Tag to check out
        tag: String,
        /// Destination root
        dest: PathBuf,

        /// Skip confirmation when the destination is not empty
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List all tags
    List,
    /// Show a snapshot's manifest without extracting content
    Show {
        /// Tag to inspect
        tag: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => cmd::init::run().await,
        Commands::Add { dir, tag, workers } => cmd::add::run(&dir, &tag, workers).await,
        Commands::Restore { tag, dest, yes } => cmd::restore::run(&tag, &dest, yes).await,
        Commands::List => cmd::list::run().await,
        Commands::Show { tag } => cmd::show::run(&tag).await,
    }
}
