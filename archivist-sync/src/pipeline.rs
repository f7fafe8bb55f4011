//! Shared entrypoint for the sync and commit commands.

use archivist_core::{Archive, ContainerName};

use crate::coordinator::{SyncCoordinator, SyncReport};
use crate::engine::StorageEngine;
use crate::error::SyncError;
use crate::exec::ProgressSink;

/// What a sync or commit run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// One replica, as `<container>/<replica>`.
    Replica(String),
    /// Every reachable replica of the named container.
    Container(String),
}

/// Sync everything in `scope`.
pub fn run<E: StorageEngine + ?Sized>(
    archive: &Archive,
    engine: &E,
    scope: SyncScope,
    sink: &mut dyn ProgressSink,
) -> Result<Vec<SyncReport>, SyncError> {
    let coordinator = SyncCoordinator::new(archive, engine);
    match scope {
        SyncScope::Replica(qualified) => {
            let replica = archive.find_replica(&qualified)?;
            Ok(vec![coordinator.sync(&replica, sink)?])
        }
        SyncScope::Container(name) => {
            let container = archive.load_container(&ContainerName::from(name))?;
            coordinator.sync_container(&container, sink)
        }
    }
}

/// Commit everything in `scope`. Returns the qualified names of the replicas
/// that had changes.
pub fn commit<E: StorageEngine + ?Sized>(
    archive: &Archive,
    engine: &E,
    scope: SyncScope,
    sink: &mut dyn ProgressSink,
) -> Result<Vec<String>, SyncError> {
    let coordinator = SyncCoordinator::new(archive, engine);
    match scope {
        SyncScope::Replica(qualified) => {
            let replica = archive.find_replica(&qualified)?;
            let committed = coordinator.commit(&replica, sink)?;
            Ok(if committed {
                vec![replica.qualified_name()]
            } else {
                Vec::new()
            })
        }
        SyncScope::Container(name) => {
            let container = archive.load_container(&ContainerName::from(name))?;
            coordinator.commit_container(&container, sink)
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::engine::GitAnnex;
    use crate::exec::Discard;
    use archivist_core::CatalogError;

    #[test]
    fn unknown_container_is_reported_by_name() {
        let home = TempDir::new().expect("home");
        let archive = Archive::at(home.path().join("archive"));
        archive.init().expect("init");

        let err = run(
            &archive,
            &GitAnnex::new(),
            SyncScope::Container("missing".to_string()),
            &mut Discard,
        )
        .unwrap_err();
        assert!(
            matches!(
                err,
                SyncError::Catalog(CatalogError::ContainerNotFound { ref name }) if name == "missing"
            ),
            "got: {err}"
        );
    }

    #[test]
    fn malformed_replica_reference_is_rejected() {
        let home = TempDir::new().expect("home");
        let archive = Archive::at(home.path().join("archive"));
        archive.init().expect("init");

        let err = commit(
            &archive,
            &GitAnnex::new(),
            SyncScope::Replica("no-slash".to_string()),
            &mut Discard,
        )
        .unwrap_err();
        assert!(
            matches!(err, SyncError::Catalog(CatalogError::InvalidName { .. })),
            "got: {err}"
        );
    }
}
