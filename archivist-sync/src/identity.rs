//! Replica identity: group id from the metadata record, uuid from the engine.

use archivist_core::{catalog, Replica, ReplicaIdentity, ReplicaUuid};

use crate::engine::StorageEngine;
use crate::error::SyncError;

/// `{uuid, group_id}` of `replica`.
///
/// The metadata record is re-read on every call rather than trusted from the
/// catalog snapshot held in `replica`.
pub fn identity<E: StorageEngine + ?Sized>(
    engine: &E,
    replica: &Replica,
) -> Result<ReplicaIdentity, SyncError> {
    let metadata = catalog::read_replica_metadata(&replica.storage_path, replica.kind)?;
    let uuid = engine.read_uuid(&replica.access_path)?;
    Ok(ReplicaIdentity {
        uuid,
        group_id: metadata.group_id,
    })
}

/// Uuids of every other replica the engine has ever exchanged history with.
///
/// A discovery hint only: entries may name replicas that no longer exist or
/// are not reachable right now.
pub fn sibling_uuids_ever_seen<E: StorageEngine + ?Sized>(
    engine: &E,
    replica: &Replica,
) -> Result<Vec<ReplicaUuid>, SyncError> {
    let own = engine.read_uuid(&replica.access_path)?;
    Ok(engine
        .read_replication_log(&replica.access_path)?
        .into_iter()
        .filter(|uuid| *uuid != own)
        .collect())
}
