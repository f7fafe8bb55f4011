//! Archivist — keep replicated folders in sync across storage containers.
//!
//! # Usage
//!
//! ```text
//! archivist [--archive-path <dir>] archive init
//! archivist container list [--json]
//! archivist container add <name> plain --storage-path <dir>
//! archivist container add <name> network --host <host> --remote-path <path>
//! archivist container mount|unmount|replicas|sync|commit <name>
//! archivist replica create <container>/<name> [--encrypted]
//! archivist replica sync|commit|mount|unmount|access-path|identity <container>/<name>
//! archivist replica clone <container>/<name> <container>/<name>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use archivist_core::Archive;
use commands::{archive::ArchiveCommand, container::ContainerCommand, replica::ReplicaCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "archivist",
    version,
    about = "Keep replicated folders in sync across storage containers",
    long_about = None,
)]
struct Cli {
    /// Archive directory holding container records [default: ~/.archivist].
    #[arg(long, global = true, env = "ARCHIVIST_PATH", value_name = "DIR")]
    archive_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up the archive directory.
    Archive {
        #[command(subcommand)]
        command: ArchiveCommand,
    },

    /// Register, mount and inspect storage containers.
    Container {
        #[command(subcommand)]
        command: ContainerCommand,
    },

    /// Create, clone and synchronise replicas.
    Replica {
        #[command(subcommand)]
        command: ReplicaCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let archive = open_archive(cli.archive_path)?;
    tracing::debug!("archive at {}", archive.root().display());

    match cli.command {
        Commands::Archive { command } => commands::archive::run(&archive, command),
        Commands::Container { command } => commands::container::run(&archive, command),
        Commands::Replica { command } => commands::replica::run(&archive, command),
    }
}

fn open_archive(path: Option<PathBuf>) -> Result<Archive> {
    match path {
        Some(path) => Ok(Archive::at(path)),
        None => Archive::open_default().context("could not locate the default archive"),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
