//! `archivist replica ...` — create, clone, sync and inspect one replica.
//!
//! Replicas are addressed as `<container>/<name>`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use archivist_core::{Archive, ReplicaKind};
use archivist_sync::mount::{Mountable, ReplicaMount};
use archivist_sync::pipeline::{self, SyncScope};
use archivist_sync::{identity, CloneCoordinator, GitAnnex};

use super::{print_sync_report, TerminalSink};

#[derive(Subcommand, Debug)]
pub enum ReplicaCommand {
    /// Initialise a new replica with a fresh group.
    Create {
        /// `<container>/<name>` of the new replica.
        target: String,

        /// Store the content in an encfs volume.
        #[arg(long)]
        encrypted: bool,
    },

    /// Commit, then exchange content with every reachable sibling.
    Sync { target: String },

    /// Commit pending changes without syncing.
    Commit { target: String },

    /// Clone a replica into another location; the clone joins its group.
    Clone {
        /// `<container>/<name>` of the existing replica.
        source: String,
        /// `<container>/<name>` of the new replica.
        destination: String,
    },

    /// Mount the decrypted view of an encrypted replica.
    Mount { target: String },

    /// Unmount the decrypted view of an encrypted replica.
    Unmount { target: String },

    /// Print the directory to work in.
    AccessPath { target: String },

    /// Print the replica's uuid and group id.
    Identity {
        target: String,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct IdentityJson {
    replica: String,
    uuid: String,
    group_id: String,
}

pub fn run(archive: &Archive, cmd: ReplicaCommand) -> Result<()> {
    let engine = GitAnnex::new();
    match cmd {
        ReplicaCommand::Create { target, encrypted } => {
            let (container, name) = archive.resolve(&target)?;
            let kind = if encrypted {
                ReplicaKind::Encrypted
            } else {
                ReplicaKind::Plain
            };
            let replica = CloneCoordinator::new(archive, &engine)
                .create(&container, &name, kind, &mut TerminalSink)
                .with_context(|| format!("failed to create '{target}'"))?;
            println!(
                "✓ Created {kind} replica '{}' in group {}",
                replica.qualified_name(),
                replica.group_id()
            );
            Ok(())
        }
        ReplicaCommand::Sync { target } => {
            let reports = pipeline::run(
                archive,
                &engine,
                SyncScope::Replica(target.clone()),
                &mut TerminalSink,
            )
            .with_context(|| format!("sync failed for '{target}'"))?;
            for report in &reports {
                print_sync_report(report);
            }
            Ok(())
        }
        ReplicaCommand::Commit { target } => {
            let committed = pipeline::commit(
                archive,
                &engine,
                SyncScope::Replica(target.clone()),
                &mut TerminalSink,
            )
            .with_context(|| format!("commit failed for '{target}'"))?;
            if committed.is_empty() {
                println!("✓ '{target}' — nothing to commit");
            } else {
                println!("✓ '{target}' committed");
            }
            Ok(())
        }
        ReplicaCommand::Clone {
            source,
            destination,
        } => {
            let source_replica = archive
                .find_replica(&source)
                .with_context(|| format!("failed to load '{source}'"))?;
            let (container, name) = archive.resolve(&destination)?;
            let replica = CloneCoordinator::new(archive, &engine)
                .clone_replica(&source_replica, &container, &name, &mut TerminalSink)
                .with_context(|| format!("failed to clone '{source}' into '{destination}'"))?;
            println!(
                "✓ Cloned '{source}' into '{}' ({})",
                replica.qualified_name(),
                replica.access_path.display()
            );
            Ok(())
        }
        ReplicaCommand::Mount { target } => {
            let replica = archive.find_replica(&target)?;
            let settings = archive.settings().context("failed to read archive settings")?;
            let mount = ReplicaMount::new(&replica, &settings);
            if !mount.supports_unmount() {
                println!("'{target}' is a plain replica; nothing to mount");
                return Ok(());
            }
            mount
                .mount(&mut TerminalSink)
                .with_context(|| format!("failed to mount '{target}'"))?;
            println!("✓ Mounted '{target}' at {}", replica.access_path.display());
            Ok(())
        }
        ReplicaCommand::Unmount { target } => {
            let replica = archive.find_replica(&target)?;
            let settings = archive.settings().context("failed to read archive settings")?;
            let mount = ReplicaMount::new(&replica, &settings);
            if !mount.supports_unmount() {
                println!("'{target}' is a plain replica; nothing to unmount");
                return Ok(());
            }
            mount
                .unmount(&mut TerminalSink)
                .with_context(|| format!("failed to unmount '{target}'"))?;
            println!("✓ Unmounted '{target}'");
            Ok(())
        }
        ReplicaCommand::AccessPath { target } => {
            let replica = archive.find_replica(&target)?;
            println!("{}", replica.access_path.display());
            Ok(())
        }
        ReplicaCommand::Identity { target, json } => {
            let replica = archive.find_replica(&target)?;
            let id = identity(&engine, &replica)
                .with_context(|| format!("failed to read identity of '{target}'"))?;
            if json {
                let payload = IdentityJson {
                    replica: replica.qualified_name(),
                    uuid: id.uuid.0,
                    group_id: id.group_id.0,
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload).context("failed to encode JSON")?
                );
            } else {
                println!("uuid:     {}", id.uuid);
                println!("group id: {}", id.group_id);
            }
            Ok(())
        }
    }
}
