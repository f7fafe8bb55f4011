//! # archivist-sync
//!
//! Process execution, the git-annex storage engine, and the coordinators
//! that keep sibling replicas in step.
//!
//! Call [`SyncCoordinator::sync`] to commit and exchange content between a
//! replica and every reachable sibling, or [`CloneCoordinator::clone_replica`]
//! to add a new member to a replica's group.

pub mod clone;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod exec;
pub mod identity;
pub mod mount;
pub mod pipeline;

pub use clone::CloneCoordinator;
pub use coordinator::{SyncCoordinator, SyncPhase, SyncReport};
pub use engine::{GitAnnex, StorageEngine};
pub use error::{ExecError, SyncError};
pub use exec::{execute, Discard, ProgressSink, Transcript, TranscriptLine};
pub use identity::{identity, sibling_uuids_ever_seen};
pub use mount::{ContainerMount, Mountable, ReplicaMount};
pub use pipeline::SyncScope;
