//! Archive catalog: container records and replica discovery.
//!
//! # Storage layout
//!
//! ```text
//! <archive>/                 (default ~/.archivist)
//!   config.yaml              (optional settings, see `config`)
//!   containers/
//!     <container>.yaml       (one record per container — mode 0600)
//!   workdir/
//!     <container>/           (mount point of network-mounted containers)
//! ```
//!
//! Replicas are not listed anywhere in the archive. They are discovered by
//! walking a mounted container and looking for the metadata record each
//! replica carries next to its engine state:
//!
//! ```text
//! <container>/<replica>/.git/archivist.yaml     plain replica
//! <container>/<replica>/.archivist.yaml         encrypted replica (ciphertext root)
//! ```
//!
//! # API pattern
//!
//! [`Archive::at`] takes an explicit root; tests always use it with a
//! `TempDir`. [`Archive::open_default`] derives `~/.archivist` from
//! `dirs::home_dir()` and is only used by the binary.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Settings;
use crate::error::{io_err, CatalogError};
use crate::types::{
    decrypted_path, Container, ContainerKind, ContainerName, ContainerRecord, Replica,
    ReplicaKind, ReplicaMetadata, ReplicaName,
};

const ARCHIVE_DIR: &str = ".archivist";
const CONTAINERS_DIR: &str = "containers";
const WORKDIR: &str = "workdir";
const CONFIG_FILE: &str = "config.yaml";

/// File name of the plain replica metadata record inside `.git/`.
pub const PLAIN_METADATA_FILE: &str = "archivist.yaml";
/// File name of the encrypted replica metadata record in the ciphertext root.
pub const ENCRYPTED_METADATA_FILE: &str = ".archivist.yaml";

/// Handle on an archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    /// Archive rooted at an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.archivist` (convenience — uses `dirs::home_dir()`).
    pub fn open_default() -> Result<Self, CatalogError> {
        let home = dirs::home_dir().ok_or(CatalogError::HomeNotFound)?;
        Ok(Self::at(home.join(ARCHIVE_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.root.join(CONTAINERS_DIR)
    }

    /// `<archive>/containers/<name>.yaml` — pure, no I/O.
    pub fn container_record_path(&self, name: &ContainerName) -> PathBuf {
        self.containers_dir().join(format!("{}.yaml", name.0))
    }

    /// `<archive>/workdir/<name>` — pure, no I/O.
    pub fn workdir_for(&self, name: &ContainerName) -> PathBuf {
        self.root.join(WORKDIR).join(&name.0)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    // -----------------------------------------------------------------------
    // 1. Init
    // -----------------------------------------------------------------------

    /// Create the archive directory tree. Fails if the root already exists.
    pub fn init(&self) -> Result<(), CatalogError> {
        if self.root.exists() {
            return Err(CatalogError::ArchiveExists {
                path: self.root.clone(),
            });
        }
        for dir in [self.root.clone(), self.containers_dir(), self.root.join(WORKDIR)] {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            set_dir_permissions(&dir)?;
        }
        Ok(())
    }

    /// Settings from `config.yaml`, or defaults when the file is absent.
    pub fn settings(&self) -> Result<Settings, CatalogError> {
        Settings::load_at(&self.config_path())
    }

    // -----------------------------------------------------------------------
    // 2. Containers
    // -----------------------------------------------------------------------

    /// Register a new container record.
    pub fn add_container(
        &self,
        name: ContainerName,
        kind: ContainerKind,
    ) -> Result<Container, CatalogError> {
        validate_container_name(&name.0)?;
        if !self.containers_dir().is_dir() {
            return Err(CatalogError::ArchiveNotFound {
                path: self.root.clone(),
            });
        }
        let path = self.container_record_path(&name);
        if path.exists() {
            return Err(CatalogError::ContainerExists { name: name.0 });
        }
        let record = ContainerRecord {
            name,
            kind,
            created_at: Utc::now(),
        };
        write_yaml_atomic(&path, &record)?;
        Ok(self.resolve_record(record))
    }

    /// Load one container record by name.
    ///
    /// Returns `CatalogError::ContainerNotFound` if absent,
    /// `CatalogError::Parse` (with path + line context) if malformed YAML.
    pub fn load_container(&self, name: &ContainerName) -> Result<Container, CatalogError> {
        validate_container_name(&name.0)?;
        let path = self.container_record_path(name);
        if !path.is_file() {
            return Err(CatalogError::ContainerNotFound {
                name: name.0.clone(),
            });
        }
        let record: ContainerRecord = read_yaml(&path)?;
        Ok(self.resolve_record(record))
    }

    /// All container records, sorted by name. Empty when the archive has not
    /// been initialised.
    pub fn containers(&self) -> Result<Vec<Container>, CatalogError> {
        let dir = self.containers_dir();
        if !dir.is_dir() {
            return Ok(vec![]);
        }
        let mut entries: Vec<_> = fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut result = Vec::new();
        for entry in entries {
            let fname = entry.file_name();
            if !fname.to_string_lossy().ends_with(".yaml") {
                continue;
            }
            let record: ContainerRecord = read_yaml(&entry.path())?;
            result.push(self.resolve_record(record));
        }
        Ok(result)
    }

    fn resolve_record(&self, record: ContainerRecord) -> Container {
        let access_path = match &record.kind {
            ContainerKind::Plain { storage_path } => storage_path.clone(),
            ContainerKind::NetworkMounted { .. } => self.workdir_for(&record.name),
        };
        Container {
            name: record.name,
            kind: record.kind,
            access_path,
            created_at: record.created_at,
        }
    }

    /// Whether the container's content is currently reachable.
    pub fn is_mounted(&self, container: &Container) -> bool {
        match container.kind {
            ContainerKind::Plain { .. } => container.access_path.is_dir(),
            ContainerKind::NetworkMounted { .. } => is_mount_point(&container.access_path),
        }
    }

    // -----------------------------------------------------------------------
    // 3. Replicas
    // -----------------------------------------------------------------------

    /// Every replica inside `container`, sorted by name.
    ///
    /// Does not descend into a replica once found, nor into hidden
    /// directories or the `.Decrypted` views of encrypted replicas.
    pub fn replicas(&self, container: &Container) -> Result<Vec<Replica>, CatalogError> {
        if !self.is_mounted(container) {
            return Err(CatalogError::NotMounted {
                name: container.name.0.clone(),
            });
        }
        let mut found = Vec::new();
        walk_replicas(container, &container.access_path, &mut Vec::new(), &mut found)?;
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// Every replica in every mounted container. Unmounted containers are
    /// skipped silently.
    pub fn mounted_replicas(&self) -> Result<Vec<Replica>, CatalogError> {
        let mut all = Vec::new();
        for container in self.containers()? {
            if !self.is_mounted(&container) {
                continue;
            }
            all.extend(self.replicas(&container)?);
        }
        Ok(all)
    }

    /// Load the replica called `name` inside `container`.
    pub fn load_replica(
        &self,
        container: &Container,
        name: &ReplicaName,
    ) -> Result<Replica, CatalogError> {
        if !self.is_mounted(container) {
            return Err(CatalogError::NotMounted {
                name: container.name.0.clone(),
            });
        }
        let storage_path = replica_path(container, name)?;
        match detect_replica(container, name.clone(), &storage_path)? {
            Some(replica) => Ok(replica),
            None => Err(CatalogError::ReplicaNotFound {
                container: container.name.0.clone(),
                name: name.0.clone(),
            }),
        }
    }

    /// Split `<container>/<replica>` and load the container record.
    pub fn resolve(&self, qualified: &str) -> Result<(Container, ReplicaName), CatalogError> {
        let Some((container, replica)) = qualified.split_once('/') else {
            return Err(CatalogError::InvalidName {
                name: qualified.to_string(),
                reason: "expected <container>/<replica>",
            });
        };
        let container = self.load_container(&ContainerName::from(container))?;
        let replica = ReplicaName::from(replica.trim_end_matches('/'));
        validate_replica_name(&replica.0)?;
        Ok((container, replica))
    }

    /// Resolve and load `<container>/<replica>` in one step.
    pub fn find_replica(&self, qualified: &str) -> Result<Replica, CatalogError> {
        let (container, name) = self.resolve(qualified)?;
        self.load_replica(&container, &name)
    }
}

// ---------------------------------------------------------------------------
// 4. Replica metadata
// ---------------------------------------------------------------------------

/// Where the metadata record of a replica stored at `storage_path` lives.
pub fn replica_metadata_path(storage_path: &Path, kind: ReplicaKind) -> PathBuf {
    match kind {
        ReplicaKind::Plain => storage_path.join(".git").join(PLAIN_METADATA_FILE),
        ReplicaKind::Encrypted => storage_path.join(ENCRYPTED_METADATA_FILE),
    }
}

/// Write the replica metadata record. Called once, at create or clone time.
pub fn write_replica_metadata(
    storage_path: &Path,
    metadata: &ReplicaMetadata,
) -> Result<PathBuf, CatalogError> {
    let path = replica_metadata_path(storage_path, metadata.kind);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    write_yaml_atomic(&path, metadata)?;
    Ok(path)
}

/// Read the metadata record of the replica stored at `storage_path`.
pub fn read_replica_metadata(
    storage_path: &Path,
    kind: ReplicaKind,
) -> Result<ReplicaMetadata, CatalogError> {
    read_yaml(&replica_metadata_path(storage_path, kind))
}

/// Path of replica `name` inside `container`, refusing names that would
/// escape the container root.
pub fn replica_path(container: &Container, name: &ReplicaName) -> Result<PathBuf, CatalogError> {
    validate_replica_name(&name.0)?;
    Ok(container.access_path.join(&name.0))
}

fn detect_replica(
    container: &Container,
    name: ReplicaName,
    storage_path: &Path,
) -> Result<Option<Replica>, CatalogError> {
    let kind = if replica_metadata_path(storage_path, ReplicaKind::Plain).is_file() {
        ReplicaKind::Plain
    } else if replica_metadata_path(storage_path, ReplicaKind::Encrypted).is_file() {
        ReplicaKind::Encrypted
    } else {
        return Ok(None);
    };
    let metadata = read_replica_metadata(storage_path, kind)?;
    let access_path = match kind {
        ReplicaKind::Plain => storage_path.to_path_buf(),
        ReplicaKind::Encrypted => decrypted_path(storage_path),
    };
    Ok(Some(Replica {
        name,
        container: container.name.clone(),
        kind,
        storage_path: storage_path.to_path_buf(),
        access_path,
        metadata,
    }))
}

fn walk_replicas(
    container: &Container,
    dir: &Path,
    segments: &mut Vec<String>,
    found: &mut Vec<Replica>,
) -> Result<(), CatalogError> {
    if !segments.is_empty() {
        let name = ReplicaName::from(segments.join("/"));
        if let Some(replica) = detect_replica(container, name, dir)? {
            found.push(replica);
            return Ok(());
        }
    }

    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let fname = entry.file_name().to_string_lossy().into_owned();
        if fname.starts_with('.') || fname.ends_with(".Decrypted") {
            continue;
        }
        segments.push(fname);
        walk_replicas(container, &entry.path(), segments, found)?;
        segments.pop();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Name validation
// ---------------------------------------------------------------------------

/// A container name is a single, non-hidden path segment.
pub fn validate_container_name(name: &str) -> Result<(), CatalogError> {
    let invalid = |reason| CatalogError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("container names cannot contain path separators"));
    }
    if name.starts_with('.') {
        return Err(invalid("names starting with '.' are reserved"));
    }
    Ok(())
}

/// A replica name is a relative path in normal form that stays inside the
/// container root.
pub fn validate_replica_name(name: &str) -> Result<(), CatalogError> {
    let invalid = |reason| CatalogError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(invalid("absolute paths are not allowed"));
    }
    let mut normal = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment.to_string_lossy();
                if segment.starts_with('.') {
                    return Err(invalid("names starting with '.' are reserved"));
                }
                normal.push(segment.into_owned());
            }
            _ => return Err(invalid("name escapes the container root")),
        }
    }
    if normal.join("/") != name {
        return Err(invalid("name is not in normal form"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| CatalogError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write flow: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CatalogError> {
    let yaml = serde_yaml::to_string(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// True when `path` is the root of a mounted filesystem.
#[cfg(unix)]
pub fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let Some(parent) = path.parent() else {
        return true;
    };
    let Ok(parent_meta) = fs::metadata(parent) else {
        return false;
    };
    meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino()
}

#[cfg(not(unix))]
pub fn is_mount_point(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CatalogError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CatalogError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CatalogError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CatalogError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupId;
    use tempfile::TempDir;

    fn make_archive() -> (TempDir, Archive) {
        let tmp = TempDir::new().expect("tempdir");
        let archive = Archive::at(tmp.path().join("archive"));
        archive.init().expect("init");
        (tmp, archive)
    }

    fn plain_container(archive: &Archive, tmp: &TempDir, name: &str) -> Container {
        let storage = tmp.path().join(format!("{name}-disk"));
        fs::create_dir_all(&storage).unwrap();
        archive
            .add_container(
                ContainerName::from(name),
                ContainerKind::Plain {
                    storage_path: storage,
                },
            )
            .expect("add container")
    }

    fn fake_replica(dir: &Path, group: &str) {
        write_replica_metadata(
            dir,
            &ReplicaMetadata {
                kind: ReplicaKind::Plain,
                group_id: GroupId::from(group),
                created_at: Utc::now(),
            },
        )
        .expect("metadata");
    }

    #[test]
    fn init_twice_fails() {
        let (_tmp, archive) = make_archive();
        let err = archive.init().unwrap_err();
        assert!(matches!(err, CatalogError::ArchiveExists { .. }));
    }

    #[test]
    fn add_container_requires_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = Archive::at(tmp.path().join("missing"));
        let err = archive
            .add_container(
                ContainerName::from("usb"),
                ContainerKind::Plain {
                    storage_path: tmp.path().to_path_buf(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::ArchiveNotFound { .. }));
    }

    #[test]
    fn container_record_written_with_perms() {
        let (tmp, archive) = make_archive();
        plain_container(&archive, &tmp, "usb");
        let path = archive.container_record_path(&ContainerName::from("usb"));
        assert!(path.is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn network_container_access_path_is_workdir() {
        let (_tmp, archive) = make_archive();
        let container = archive
            .add_container(
                ContainerName::from("nas"),
                ContainerKind::NetworkMounted {
                    host: "nas.local".into(),
                    remote_path: "/srv".into(),
                },
            )
            .unwrap();
        assert_eq!(container.access_path, archive.workdir_for(&container.name));
        assert!(!archive.is_mounted(&container));
    }

    #[test]
    fn discovery_stops_at_replica_roots() {
        let (tmp, archive) = make_archive();
        let container = plain_container(&archive, &tmp, "usb");
        let outer = container.access_path.join("photos");
        fake_replica(&outer, "g1");
        // A nested replica-looking directory must not be reported.
        fake_replica(&outer.join("inner"), "g2");
        fake_replica(&container.access_path.join("work").join("notes"), "g3");
        fs::create_dir_all(container.access_path.join("empty")).unwrap();

        let replicas = archive.replicas(&container).expect("replicas");
        let names: Vec<_> = replicas.iter().map(|r| r.name.0.as_str()).collect();
        assert_eq!(names, vec!["photos", "work/notes"]);
        assert_eq!(replicas[0].group_id(), &GroupId::from("g1"));
    }

    #[test]
    fn unmounted_container_is_skipped_by_mounted_replicas() {
        let (tmp, archive) = make_archive();
        let container = plain_container(&archive, &tmp, "usb");
        fake_replica(&container.access_path.join("docs"), "g1");
        archive
            .add_container(
                ContainerName::from("gone"),
                ContainerKind::Plain {
                    storage_path: tmp.path().join("does-not-exist"),
                },
            )
            .unwrap();

        let all = archive.mounted_replicas().expect("mounted replicas");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].qualified_name(), "usb/docs");
    }

    #[test]
    fn find_replica_resolves_qualified_name() {
        let (tmp, archive) = make_archive();
        let container = plain_container(&archive, &tmp, "usb");
        fake_replica(&container.access_path.join("a").join("b"), "g1");
        let replica = archive.find_replica("usb/a/b").expect("find");
        assert_eq!(replica.name, ReplicaName::from("a/b"));
        assert_eq!(replica.access_path, container.access_path.join("a").join("b"));
    }

    #[test]
    fn find_replica_missing_is_not_found() {
        let (tmp, archive) = make_archive();
        plain_container(&archive, &tmp, "usb");
        let err = archive.find_replica("usb/nothing").unwrap_err();
        assert!(matches!(err, CatalogError::ReplicaNotFound { .. }));
    }

    #[test]
    fn encrypted_replica_uses_decrypted_access_path() {
        let (tmp, archive) = make_archive();
        let container = plain_container(&archive, &tmp, "usb");
        let storage = container.access_path.join("secret");
        write_replica_metadata(
            &storage,
            &ReplicaMetadata {
                kind: ReplicaKind::Encrypted,
                group_id: GroupId::from("g9"),
                created_at: Utc::now(),
            },
        )
        .unwrap();
        fs::create_dir_all(decrypted_path(&storage)).unwrap();

        let replicas = archive.replicas(&container).unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].kind, ReplicaKind::Encrypted);
        assert_eq!(replicas[0].access_path, decrypted_path(&storage));
    }

    #[test]
    fn replica_name_validation() {
        assert!(validate_replica_name("docs").is_ok());
        assert!(validate_replica_name("photos/2016").is_ok());
        for bad in ["", "/etc", "../up", "a/../../b", "a//b", "a/", ".hidden", "./a"] {
            assert!(validate_replica_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn container_name_validation() {
        assert!(validate_container_name("usb").is_ok());
        assert!(validate_container_name("a/b").is_err());
        assert!(validate_container_name(".x").is_err());
        assert!(validate_container_name("").is_err());
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let (tmp, archive) = make_archive();
        plain_container(&archive, &tmp, "usb");
        let tmp_path = archive
            .container_record_path(&ContainerName::from("usb"))
            .with_file_name("usb.yaml.tmp");
        assert!(!tmp_path.exists(), ".tmp must be gone after successful save");
    }
}
