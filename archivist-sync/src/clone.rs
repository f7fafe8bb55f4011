//! Creating replicas: from scratch, or as a clone that joins an existing
//! replica's group.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;

use archivist_core::catalog::{self, replica_metadata_path};
use archivist_core::types::decrypted_path;
use archivist_core::{
    Archive, Container, GroupId, Replica, ReplicaKind, ReplicaMetadata, ReplicaName,
};

use crate::coordinator::{progress, SyncCoordinator};
use crate::engine::StorageEngine;
use crate::error::{io_err, SyncError};
use crate::exec::ProgressSink;
use crate::identity::{identity, sibling_uuids_ever_seen};
use crate::mount::{ensure_accessible, mount_encrypted};

/// Remote that `clone_history` leaves pointing at the source.
const CLONE_ORIGIN: &str = "origin";

pub struct CloneCoordinator<'a, E: StorageEngine + ?Sized> {
    archive: &'a Archive,
    engine: &'a E,
}

impl<'a, E: StorageEngine + ?Sized> CloneCoordinator<'a, E> {
    pub fn new(archive: &'a Archive, engine: &'a E) -> Self {
        Self { archive, engine }
    }

    /// Path a new replica called `name` would occupy in `container`.
    ///
    /// Nothing is created. Fails with [`SyncError::NameConflict`] if the name
    /// escapes the container, the path is taken, or it lies inside another
    /// replica.
    pub fn reserve(&self, container: &Container, name: &ReplicaName) -> Result<PathBuf, SyncError> {
        if !self.archive.is_mounted(container) {
            return Err(SyncError::NotMounted {
                what: format!("container '{}'", container.name),
            });
        }
        let path = catalog::replica_path(container, name).map_err(|e| SyncError::NameConflict {
            path: container.access_path.join(&name.0),
            reason: e.to_string(),
        })?;
        let conflict = |reason: String| SyncError::NameConflict {
            path: path.clone(),
            reason,
        };

        if fs::symlink_metadata(&path).is_ok() {
            return Err(conflict("path already exists".into()));
        }
        if fs::symlink_metadata(decrypted_path(&path)).is_ok() {
            return Err(conflict("an encrypted view of that name already exists".into()));
        }

        let mut ancestor = container.access_path.clone();
        let relative = Path::new(&name.0);
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            let Component::Normal(segment) = component else {
                return Err(conflict("name escapes the container".into()));
            };
            if segment.to_string_lossy().ends_with(".Decrypted") {
                return Err(conflict("name lies inside an encrypted view".into()));
            }
            ancestor.push(segment);
            if is_replica_root(&ancestor) {
                return Err(conflict(format!(
                    "name lies inside replica {}",
                    ancestor.display()
                )));
            }
        }
        Ok(path)
    }

    /// Clone `source` into `container` as `name`, then catch the new replica
    /// up with its group.
    ///
    /// Any failure after the path was reserved leaves the partial directory
    /// in place and is reported as [`SyncError::PartialClone`].
    pub fn clone_replica(
        &self,
        source: &Replica,
        container: &Container,
        name: &ReplicaName,
        sink: &mut dyn ProgressSink,
    ) -> Result<Replica, SyncError> {
        ensure_accessible(source)?;
        let path = self.reserve(container, name)?;
        let source_identity = identity(self.engine, source)?;

        self.populate_clone(source, &source_identity.group_id, container, name, &path, sink)
            .map_err(|e| partial(&path, e))
    }

    fn populate_clone(
        &self,
        source: &Replica,
        group_id: &GroupId,
        container: &Container,
        name: &ReplicaName,
        path: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<Replica, SyncError> {
        let qualified = format!("{}/{}", container.name, name);
        progress(sink, &format!("Cloning {} into {qualified}", source.qualified_name()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        self.engine.clone_history(&source.access_path, path, sink)?;
        self.engine.remove_remote(path, CLONE_ORIGIN, sink)?;

        progress(sink, &format!("Initialising {qualified}"))?;
        self.engine.init(path, &qualified, sink)?;
        let uuid = self.engine.read_uuid(path)?;
        let mut taken = vec![self.engine.read_uuid(&source.access_path)?];
        match sibling_uuids_ever_seen(self.engine, source) {
            Ok(seen) => taken.extend(seen),
            Err(e) => tracing::debug!("replication log of {} unavailable: {e}", source.qualified_name()),
        }
        if taken.contains(&uuid) {
            return Err(SyncError::DuplicateUuid { uuid });
        }

        let metadata = ReplicaMetadata {
            kind: ReplicaKind::Plain,
            group_id: group_id.clone(),
            created_at: Utc::now(),
        };
        catalog::write_replica_metadata(path, &metadata)?;
        let replica = self.archive.load_replica(container, name)?;
        tracing::info!("cloned {} into {}", source.qualified_name(), qualified);

        SyncCoordinator::new(self.archive, self.engine).sync(&replica, sink)?;
        Ok(replica)
    }

    /// Initialise a brand-new replica with a fresh group id.
    ///
    /// Encrypted replicas get a new encfs volume; the engine is initialised
    /// inside its decrypted view.
    pub fn create(
        &self,
        container: &Container,
        name: &ReplicaName,
        kind: ReplicaKind,
        sink: &mut dyn ProgressSink,
    ) -> Result<Replica, SyncError> {
        let path = self.reserve(container, name)?;
        self.populate_new(container, name, kind, &path, sink)
            .map_err(|e| partial(&path, e))
    }

    fn populate_new(
        &self,
        container: &Container,
        name: &ReplicaName,
        kind: ReplicaKind,
        path: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<Replica, SyncError> {
        let qualified = format!("{}/{}", container.name, name);
        progress(sink, &format!("Creating {kind} replica {qualified}"))?;
        fs::create_dir_all(path).map_err(|e| io_err(path, e))?;

        let access = match kind {
            ReplicaKind::Plain => path.to_path_buf(),
            ReplicaKind::Encrypted => {
                let settings = self.archive.settings()?;
                let view = decrypted_path(path);
                mount_encrypted(&settings, path, &view, true, sink)?;
                view
            }
        };

        self.engine.init(&access, &qualified, sink)?;
        self.engine.commit(&access, true, sink)?;

        let metadata = ReplicaMetadata {
            kind,
            group_id: GroupId::generate(),
            created_at: Utc::now(),
        };
        catalog::write_replica_metadata(path, &metadata)?;
        tracing::info!("created {qualified} in group {}", metadata.group_id);
        Ok(self.archive.load_replica(container, name)?)
    }
}

fn is_replica_root(dir: &Path) -> bool {
    replica_metadata_path(dir, ReplicaKind::Plain).is_file()
        || replica_metadata_path(dir, ReplicaKind::Encrypted).is_file()
}

fn partial(path: &Path, source: SyncError) -> SyncError {
    SyncError::PartialClone {
        path: path.to_path_buf(),
        source: Box::new(source),
    }
}
