//! `archivist container ...` — register, mount and inspect containers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use archivist_core::{Archive, Container, ContainerKind, ContainerName};
use archivist_sync::mount::{is_accessible, ContainerMount, Mountable};
use archivist_sync::pipeline::{self, SyncScope};
use archivist_sync::GitAnnex;

use super::{print_sync_report, TerminalSink};

#[derive(Subcommand, Debug)]
pub enum ContainerCommand {
    /// List registered containers and whether they are mounted.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Register a new container.
    Add(AddArgs),

    /// Mount a network container on its workdir.
    Mount { name: String },

    /// Unmount a network container.
    Unmount { name: String },

    /// List the replicas inside a mounted container.
    Replicas {
        name: String,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Sync every replica of a container with its siblings.
    Sync { name: String },

    /// Commit pending changes in every replica of a container.
    Commit { name: String },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Container name (a single path segment, e.g. "usb", "nas").
    pub name: String,

    #[command(subcommand)]
    pub kind: KindArgs,
}

#[derive(Subcommand, Debug)]
pub enum KindArgs {
    /// A directory on a local or already mounted filesystem.
    Plain {
        #[arg(long, value_name = "DIR")]
        storage_path: PathBuf,
    },

    /// A remote directory mounted through sshfs.
    Network {
        #[arg(long)]
        host: String,

        #[arg(long, value_name = "PATH")]
        remote_path: String,
    },
}

pub fn run(archive: &Archive, cmd: ContainerCommand) -> Result<()> {
    match cmd {
        ContainerCommand::List { json } => list(archive, json),
        ContainerCommand::Add(args) => add(archive, args),
        ContainerCommand::Mount { name } => {
            let container = load(archive, &name)?;
            let settings = archive.settings().context("failed to read archive settings")?;
            ContainerMount::new(&container, &settings)
                .mount(&mut TerminalSink)
                .with_context(|| format!("failed to mount '{name}'"))?;
            println!("✓ Mounted '{name}' at {}", container.access_path.display());
            Ok(())
        }
        ContainerCommand::Unmount { name } => {
            let container = load(archive, &name)?;
            let settings = archive.settings().context("failed to read archive settings")?;
            let mount = ContainerMount::new(&container, &settings);
            if !mount.supports_unmount() {
                println!("'{name}' is a plain container; nothing to unmount");
                return Ok(());
            }
            mount
                .unmount(&mut TerminalSink)
                .with_context(|| format!("failed to unmount '{name}'"))?;
            println!("✓ Unmounted '{name}'");
            Ok(())
        }
        ContainerCommand::Replicas { name, json } => replicas(archive, &name, json),
        ContainerCommand::Sync { name } => {
            let reports = pipeline::run(
                archive,
                &GitAnnex::new(),
                SyncScope::Container(name.clone()),
                &mut TerminalSink,
            )
            .with_context(|| format!("sync failed for container '{name}'"))?;
            if reports.is_empty() {
                println!("No reachable replicas in '{name}'.");
            }
            for report in &reports {
                print_sync_report(report);
            }
            Ok(())
        }
        ContainerCommand::Commit { name } => {
            let committed = pipeline::commit(
                archive,
                &GitAnnex::new(),
                SyncScope::Container(name.clone()),
                &mut TerminalSink,
            )
            .with_context(|| format!("commit failed for container '{name}'"))?;
            println!("✓ '{name}': {} replica(s) committed", committed.len());
            for replica in committed {
                println!("    - {replica}");
            }
            Ok(())
        }
    }
}

fn load(archive: &Archive, name: &str) -> Result<Container> {
    archive
        .load_container(&ContainerName::from(name))
        .with_context(|| format!("failed to load container '{name}'"))
}

fn add(archive: &Archive, args: AddArgs) -> Result<()> {
    let kind = match args.kind {
        KindArgs::Plain { storage_path } => {
            let storage_path = if storage_path.is_absolute() {
                storage_path
            } else {
                std::env::current_dir()
                    .context("could not determine current directory")?
                    .join(storage_path)
            };
            ContainerKind::Plain { storage_path }
        }
        KindArgs::Network { host, remote_path } => ContainerKind::NetworkMounted { host, remote_path },
    };
    let container = archive
        .add_container(ContainerName::from(args.name.clone()), kind)
        .with_context(|| format!("failed to add container '{}'", args.name))?;
    println!("✓ Added {} container '{}'", container.kind.label(), container.name);
    Ok(())
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ContainerJson {
    name: String,
    kind: ContainerKind,
    access_path: PathBuf,
    mounted: bool,
    replicas: Option<usize>,
    created_at: String,
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "container")]
    name: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "mounted")]
    mounted: String,
    #[tabled(rename = "replicas")]
    replicas: String,
    #[tabled(rename = "path")]
    path: String,
}

fn list(archive: &Archive, json: bool) -> Result<()> {
    let containers = archive
        .containers()
        .context("failed to read container records")?;

    let mut rows = Vec::new();
    for container in containers {
        let mounted = archive.is_mounted(&container);
        let replicas = if mounted {
            Some(
                archive
                    .replicas(&container)
                    .with_context(|| format!("failed to scan '{}'", container.name))?
                    .len(),
            )
        } else {
            None
        };
        rows.push(ContainerJson {
            name: container.name.0.clone(),
            access_path: container.access_path.clone(),
            kind: container.kind,
            mounted,
            replicas,
            created_at: container.created_at.to_rfc3339(),
        });
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to encode JSON")?
        );
        return Ok(());
    }

    if rows.is_empty() {
        println!("No containers registered.");
        println!("Run: archivist container add <name> plain --storage-path <dir>");
        return Ok(());
    }

    let table_rows: Vec<ContainerRow> = rows
        .into_iter()
        .map(|row| ContainerRow {
            name: row.name,
            kind: row.kind.label().to_string(),
            mounted: if row.mounted {
                "yes".green().to_string()
            } else {
                "no".bright_black().to_string()
            },
            replicas: row.replicas.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            path: row.access_path.display().to_string(),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// replicas
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ReplicaJson {
    name: String,
    kind: String,
    group_id: String,
    accessible: bool,
    access_path: PathBuf,
}

#[derive(Tabled)]
struct ReplicaRow {
    #[tabled(rename = "replica")]
    name: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "group")]
    group: String,
    #[tabled(rename = "accessible")]
    accessible: String,
}

fn replicas(archive: &Archive, name: &str, json: bool) -> Result<()> {
    let container = load(archive, name)?;
    let replicas = archive
        .replicas(&container)
        .with_context(|| format!("failed to scan '{name}'"))?;

    let rows: Vec<ReplicaJson> = replicas
        .iter()
        .map(|r| ReplicaJson {
            name: r.name.0.clone(),
            kind: r.kind.to_string(),
            group_id: r.group_id().0.clone(),
            accessible: is_accessible(r),
            access_path: r.access_path.clone(),
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to encode JSON")?
        );
        return Ok(());
    }

    if rows.is_empty() {
        println!("No replicas in '{name}'.");
        return Ok(());
    }
    println!("{}", name.to_uppercase().bold());
    let table_rows: Vec<ReplicaRow> = rows
        .into_iter()
        .map(|row| ReplicaRow {
            name: row.name,
            kind: row.kind,
            group: row.group_id,
            accessible: if row.accessible {
                "yes".green().to_string()
            } else {
                "locked".yellow().to_string()
            },
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
