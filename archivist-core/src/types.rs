//! Domain types for the archive catalog.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Persisted records (`ContainerRecord`, `ReplicaMetadata`) round-trip through
//! serde + serde_yaml.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a container record in the archive (a single path segment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerName(pub String);

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ContainerName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContainerName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a replica relative to its container root, e.g. `photos/2016`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaName(pub String);

impl fmt::Display for ReplicaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ReplicaName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReplicaName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Storage-engine identifier of one physical replica. Assigned by the engine
/// at init time and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaUuid(pub String);

impl fmt::Display for ReplicaUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ReplicaUuid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReplicaUuid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity shared by a replica and every replica cloned from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    /// A fresh group id for a replica that starts a new clone lineage.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a replica's content is stored inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaKind {
    #[default]
    Plain,
    /// Ciphertext on disk, decrypted view mounted at `<storage>.Decrypted`.
    Encrypted,
}

impl fmt::Display for ReplicaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaKind::Plain => write!(f, "plain"),
            ReplicaKind::Encrypted => write!(f, "encrypted"),
        }
    }
}

/// Backend of a container together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerKind {
    /// A directory on a local (or already mounted) filesystem.
    Plain { storage_path: PathBuf },
    /// A remote directory reached through `sshfs`.
    NetworkMounted { host: String, remote_path: String },
}

impl ContainerKind {
    pub fn label(&self) -> &'static str {
        match self {
            ContainerKind::Plain { .. } => "plain",
            ContainerKind::NetworkMounted { .. } => "network",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Plain { storage_path } => write!(f, "plain ({})", storage_path.display()),
            ContainerKind::NetworkMounted { host, remote_path } => {
                write!(f, "network ({host}:{remote_path})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// On-disk record of a container: `<archive>/containers/<name>.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: ContainerName,
    pub kind: ContainerKind,
    pub created_at: DateTime<Utc>,
}

/// Metadata written once next to a replica's engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaMetadata {
    pub kind: ReplicaKind,
    pub group_id: GroupId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Resolved handles
// ---------------------------------------------------------------------------

/// A container resolved against the archive: record plus the path under which
/// its content is reachable when mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: ContainerName,
    pub kind: ContainerKind,
    /// Storage path for plain containers, `<archive>/workdir/<name>` for
    /// network-mounted ones.
    pub access_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// One replica found inside a mounted container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub name: ReplicaName,
    pub container: ContainerName,
    pub kind: ReplicaKind,
    /// Directory of the replica inside the container.
    pub storage_path: PathBuf,
    /// Directory the storage engine operates in.
    pub access_path: PathBuf,
    pub metadata: ReplicaMetadata,
}

impl Replica {
    /// `<container>/<name>`, the form the CLI accepts.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }

    /// Engine state directory (`.git`) inside the access path.
    pub fn engine_dir(&self) -> PathBuf {
        self.access_path.join(".git")
    }

    pub fn group_id(&self) -> &GroupId {
        &self.metadata.group_id
    }
}

/// The pair that locates a replica in its clone lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaIdentity {
    pub uuid: ReplicaUuid,
    pub group_id: GroupId,
}

/// Where the decrypted view of an encrypted replica is mounted.
pub fn decrypted_path(storage_path: &Path) -> PathBuf {
    let mut raw = storage_path.as_os_str().to_owned();
    raw.push(".Decrypted");
    PathBuf::from(raw)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
