//! Multi-replica synchronisation.
//!
//! ## `sync` — phases
//!
//! 1. DISCOVER: every replica in a mounted container with the same group id
//!    and a different uuid is a sibling.
//! 2. LINK: one ephemeral remote per sibling, named `archivist-<uuid>`.
//! 3. COMMIT_ALL: commit pending changes in the local replica and every
//!    sibling, before any content moves.
//! 4. SYNC_LOCAL: `sync_content` in the local replica.
//! 5. SYNC_SIBLINGS: `sync_content` in every sibling.
//! 6. UNLINK: remove every link from step 2, in creation order, whatever
//!    happened in steps 2-5.
//!
//! The replica is locked for the whole invocation; a second sync of the same
//! replica fails with [`SyncError::Busy`].

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use archivist_core::{Archive, Container, Replica, ReplicaIdentity, ReplicaUuid};

use crate::engine::StorageEngine;
use crate::error::{io_err, SyncError};
use crate::exec::{Discard, ProgressSink};
use crate::identity::{identity, sibling_uuids_ever_seen};
use crate::mount::{ensure_accessible, is_accessible};

/// Prefix of every ephemeral remote name.
pub const LINK_PREFIX: &str = "archivist-";

/// Lock file created inside the replica's engine directory.
pub const LOCK_FILE: &str = "archivist.lock";

/// Remote name used to link to the sibling with `uuid`.
pub fn link_name(uuid: &ReplicaUuid) -> String {
    format!("{LINK_PREFIX}{uuid}")
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Discover,
    Link,
    CommitAll,
    SyncLocal,
    SyncSiblings,
    Unlink,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Discover => "DISCOVER",
            SyncPhase::Link => "LINK",
            SyncPhase::CommitAll => "COMMIT_ALL",
            SyncPhase::SyncLocal => "SYNC_LOCAL",
            SyncPhase::SyncSiblings => "SYNC_SIBLINGS",
            SyncPhase::Unlink => "UNLINK",
        };
        f.write_str(name)
    }
}

/// What a successful sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Qualified name of the replica the sync was started on.
    pub replica: String,
    /// Qualified names of the siblings that took part.
    pub siblings: Vec<String>,
    /// Qualified names of the parties that had changes to commit.
    pub committed: Vec<String>,
    /// Phases that ran to completion, in order.
    pub phases: Vec<SyncPhase>,
    /// Links that could not be removed afterwards.
    pub stale_links: Vec<String>,
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

/// Advisory per-replica lock, released on drop.
#[derive(Debug)]
pub(crate) struct ReplicaLock {
    path: PathBuf,
}

impl ReplicaLock {
    pub(crate) fn acquire(replica: &Replica) -> Result<Self, SyncError> {
        let path = replica.engine_dir().join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SyncError::Busy { lock: path });
            }
            Err(e) => return Err(io_err(&path, e)),
        };
        // Informational only; existence is the lock.
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for ReplicaLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("could not remove lock {}: {e}", self.path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Ephemeral links
// ---------------------------------------------------------------------------

struct Link {
    remote: String,
    sibling: String,
}

/// The ephemeral links of one sync invocation.
///
/// [`LinkSet::release`] removes them in creation order; dropping a set that
/// still holds links releases them with output discarded.
struct LinkSet<'a, E: StorageEngine + ?Sized> {
    engine: &'a E,
    local: &'a Path,
    links: Vec<Link>,
}

impl<'a, E: StorageEngine + ?Sized> LinkSet<'a, E> {
    fn new(engine: &'a E, local: &'a Path) -> Self {
        Self {
            engine,
            local,
            links: Vec::new(),
        }
    }

    fn link(
        &mut self,
        sibling: &Replica,
        uuid: &ReplicaUuid,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let remote = link_name(uuid);
        self.engine
            .add_remote(self.local, &remote, &sibling.access_path, sink)
            .map_err(|source| SyncError::LinkFailed {
                sibling: sibling.qualified_name(),
                source,
            })?;
        tracing::debug!("linked {remote} -> {}", sibling.access_path.display());
        self.links.push(Link {
            remote,
            sibling: sibling.qualified_name(),
        });
        Ok(())
    }

    /// Remove every link. Failures are logged and echoed to `sink`; the
    /// remote names that could not be removed are returned.
    fn release(&mut self, sink: &mut dyn ProgressSink) -> Vec<String> {
        let mut stale = Vec::new();
        for link in self.links.drain(..) {
            let _ = sink.on_output_line(&format!("Unlinking {}\n", link.sibling));
            if let Err(e) = self.engine.remove_remote(self.local, &link.remote, sink) {
                tracing::warn!("failed to remove link {}: {e}", link.remote);
                let _ = sink.on_error_line(&format!(
                    "warning: failed to remove link {}: {e}\n",
                    link.remote
                ));
                stale.push(link.remote);
            }
        }
        stale
    }
}

impl<E: StorageEngine + ?Sized> Drop for LinkSet<'_, E> {
    fn drop(&mut self) {
        if !self.links.is_empty() {
            self.release(&mut Discard);
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct Sibling {
    replica: Replica,
    uuid: ReplicaUuid,
}

/// Runs commit and sync cycles against the replicas of one archive.
pub struct SyncCoordinator<'a, E: StorageEngine + ?Sized> {
    archive: &'a Archive,
    engine: &'a E,
}

impl<'a, E: StorageEngine + ?Sized> SyncCoordinator<'a, E> {
    pub fn new(archive: &'a Archive, engine: &'a E) -> Self {
        Self { archive, engine }
    }

    /// Commit, then exchange content with every reachable sibling of
    /// `replica`.
    pub fn sync(
        &self,
        replica: &Replica,
        sink: &mut dyn ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        self.ensure_reachable(replica)?;
        let _lock = ReplicaLock::acquire(replica)?;

        let mut report = SyncReport {
            replica: replica.qualified_name(),
            ..SyncReport::default()
        };

        progress(sink, &format!("Discovering siblings of {}", report.replica))?;
        let local = identity(self.engine, replica)?;
        let siblings = self.discover(replica, &local)?;
        report.siblings = siblings.iter().map(|s| s.replica.qualified_name()).collect();
        report.phases.push(SyncPhase::Discover);
        tracing::info!(
            "{}: {} sibling(s) reachable",
            report.replica,
            siblings.len()
        );

        let mut links = LinkSet::new(self.engine, &replica.access_path);
        let outcome = self.run_linked(replica, &siblings, &mut links, &mut report, sink);
        report.stale_links = links.release(sink);
        outcome?;
        report.phases.push(SyncPhase::Unlink);
        Ok(report)
    }

    /// Commit pending changes in `replica`. Returns whether a commit was made.
    pub fn commit(&self, replica: &Replica, sink: &mut dyn ProgressSink) -> Result<bool, SyncError> {
        self.ensure_reachable(replica)?;
        let _lock = ReplicaLock::acquire(replica)?;
        self.commit_party(replica, sink)
    }

    /// Sync every reachable replica of `container`, in name order.
    pub fn sync_container(
        &self,
        container: &Container,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<SyncReport>, SyncError> {
        let mut reports = Vec::new();
        for replica in self.container_replicas(container)? {
            if !is_accessible(&replica) {
                progress(sink, &format!("Skipping {} (not mounted)", replica.qualified_name()))?;
                continue;
            }
            progress(sink, &format!("Syncing {}", replica.name))?;
            reports.push(self.sync(&replica, sink)?);
        }
        Ok(reports)
    }

    /// Commit every reachable replica of `container`, in name order. Returns
    /// the qualified names of the replicas that had changes.
    pub fn commit_container(
        &self,
        container: &Container,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<String>, SyncError> {
        let mut committed = Vec::new();
        for replica in self.container_replicas(container)? {
            if !is_accessible(&replica) {
                progress(sink, &format!("Skipping {} (not mounted)", replica.qualified_name()))?;
                continue;
            }
            progress(sink, &format!("Committing {}", replica.name))?;
            if self.commit(&replica, sink)? {
                committed.push(replica.qualified_name());
            }
        }
        Ok(committed)
    }

    fn container_replicas(&self, container: &Container) -> Result<Vec<Replica>, SyncError> {
        if !self.archive.is_mounted(container) {
            return Err(SyncError::NotMounted {
                what: format!("container '{}'", container.name),
            });
        }
        Ok(self.archive.replicas(container)?)
    }

    fn ensure_reachable(&self, replica: &Replica) -> Result<(), SyncError> {
        let container = self.archive.load_container(&replica.container)?;
        if !self.archive.is_mounted(&container) {
            return Err(SyncError::NotMounted {
                what: format!("container '{}'", container.name),
            });
        }
        ensure_accessible(replica)
    }

    /// Reachable replicas sharing `local`'s group. Siblings the engine has
    /// exchanged history with before come first, in log order; the rest
    /// follow by name.
    fn discover(
        &self,
        replica: &Replica,
        local: &ReplicaIdentity,
    ) -> Result<Vec<Sibling>, SyncError> {
        let mut siblings = Vec::new();
        for candidate in self.archive.mounted_replicas()? {
            if candidate.group_id() != &local.group_id || !is_accessible(&candidate) {
                continue;
            }
            let uuid = self.engine.read_uuid(&candidate.access_path)?;
            if uuid == local.uuid {
                continue;
            }
            siblings.push(Sibling {
                replica: candidate,
                uuid,
            });
        }

        let seen = match sibling_uuids_ever_seen(self.engine, replica) {
            Ok(seen) => seen,
            Err(e) => {
                tracing::debug!("replication log of {} unavailable: {e}", replica.qualified_name());
                Vec::new()
            }
        };
        siblings.sort_by(|a, b| {
            let rank = |s: &Sibling| seen.iter().position(|u| *u == s.uuid).unwrap_or(usize::MAX);
            rank(a)
                .cmp(&rank(b))
                .then_with(|| a.replica.qualified_name().cmp(&b.replica.qualified_name()))
        });
        Ok(siblings)
    }

    fn run_linked(
        &self,
        replica: &Replica,
        siblings: &[Sibling],
        links: &mut LinkSet<'_, E>,
        report: &mut SyncReport,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), SyncError> {
        for sibling in siblings {
            progress(
                sink,
                &format!("Linking {} to {}", report.replica, sibling.replica.qualified_name()),
            )?;
            links.link(&sibling.replica, &sibling.uuid, sink)?;
        }
        report.phases.push(SyncPhase::Link);

        let parties = std::iter::once(replica).chain(siblings.iter().map(|s| &s.replica));
        for party in parties {
            if self.commit_party(party, sink)? {
                report.committed.push(party.qualified_name());
            }
        }
        report.phases.push(SyncPhase::CommitAll);

        progress(sink, &format!("Syncing {}", report.replica))?;
        self.engine.sync_content(&replica.access_path, sink)?;
        report.phases.push(SyncPhase::SyncLocal);

        for sibling in siblings {
            progress(sink, &format!("Syncing {}", sibling.replica.qualified_name()))?;
            self.engine.sync_content(&sibling.replica.access_path, sink)?;
        }
        report.phases.push(SyncPhase::SyncSiblings);
        Ok(())
    }

    fn commit_party(&self, replica: &Replica, sink: &mut dyn ProgressSink) -> Result<bool, SyncError> {
        let name = replica.qualified_name();
        progress(sink, &format!("Checking {name}"))?;
        if !self.engine.has_uncommitted_changes(&replica.access_path)? {
            progress(sink, &format!("Nothing to commit in {name}"))?;
            return Ok(false);
        }
        progress(sink, &format!("Committing {name}"))?;
        self.engine.commit(&replica.access_path, false, sink)?;
        Ok(true)
    }
}

/// Emit one progress line on `sink` and in the log.
pub(crate) fn progress(sink: &mut dyn ProgressSink, message: &str) -> Result<(), SyncError> {
    tracing::info!("{message}");
    sink.on_output_line(&format!("{message}\n"))
        .map_err(SyncError::Progress)
}
