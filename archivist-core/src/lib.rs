//! Archivist core library — domain types, archive catalog, settings, errors.
//!
//! - [`types`] — newtypes, container/replica kinds and records
//! - [`error`] — [`CatalogError`]
//! - [`catalog`] — container records and replica discovery
//! - [`config`] — archive-wide [`Settings`]

pub mod catalog;
pub mod config;
pub mod error;
pub mod types;

pub use catalog::Archive;
pub use config::Settings;
pub use error::CatalogError;
pub use types::{
    Container, ContainerKind, ContainerName, ContainerRecord, GroupId, Replica, ReplicaIdentity,
    ReplicaKind, ReplicaMetadata, ReplicaName, ReplicaUuid,
};
