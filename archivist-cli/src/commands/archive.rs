//! `archivist archive init`

use anyhow::{Context, Result};
use clap::Subcommand;

use archivist_core::Archive;

#[derive(Subcommand, Debug)]
pub enum ArchiveCommand {
    /// Create the archive directory tree.
    Init,
}

pub fn run(archive: &Archive, cmd: ArchiveCommand) -> Result<()> {
    match cmd {
        ArchiveCommand::Init => {
            archive
                .init()
                .with_context(|| format!("failed to initialise {}", archive.root().display()))?;
            println!("✓ Initialised archive at {}", archive.root().display());
            println!("Next: archivist container add <name> plain --storage-path <dir>");
            Ok(())
        }
    }
}
