//! Mounting containers and encrypted replicas through external FUSE tools.
//!
//! | target                | mount                                   | unmount               |
//! |-----------------------|-----------------------------------------|-----------------------|
//! | plain container       | nothing to do                           | not supported         |
//! | network container     | `sshfs host:path <workdir>`             | `fusermount -u`       |
//! | plain replica         | nothing to do                           | not supported         |
//! | encrypted replica     | `encfs [--extpass=P] -i 10 <s> <s>.Decrypted` | `fusermount -u` |

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use archivist_core::catalog::is_mount_point;
use archivist_core::{Container, ContainerKind, Replica, ReplicaKind, Settings};

use crate::error::{io_err, SyncError};
use crate::exec::{execute, ProgressSink};

/// Idle minutes after which encfs detaches an encrypted view on its own.
const ENCFS_IDLE_MINUTES: &str = "10";

/// Uniform mount interface over container and replica kinds.
pub trait Mountable {
    fn mount(&self, sink: &mut dyn ProgressSink) -> Result<(), SyncError>;
    fn unmount(&self, sink: &mut dyn ProgressSink) -> Result<(), SyncError>;
    fn is_mounted(&self) -> bool;
    fn supports_unmount(&self) -> bool;
}

/// A container together with the settings its mount tools need.
pub struct ContainerMount<'a> {
    container: &'a Container,
    settings: &'a Settings,
}

impl<'a> ContainerMount<'a> {
    pub fn new(container: &'a Container, settings: &'a Settings) -> Self {
        Self {
            container,
            settings,
        }
    }

    fn what(&self) -> String {
        format!("container '{}'", self.container.name)
    }
}

impl Mountable for ContainerMount<'_> {
    fn mount(&self, sink: &mut dyn ProgressSink) -> Result<(), SyncError> {
        let ContainerKind::NetworkMounted { host, remote_path } = &self.container.kind else {
            return Ok(());
        };
        if self.is_mounted() {
            return Err(SyncError::AlreadyMounted { what: self.what() });
        }
        let target = &self.container.access_path;
        fs::create_dir_all(target).map_err(|e| io_err(target, e))?;

        let mut command: Vec<OsString> = vec![
            "sshfs".into(),
            format!("{host}:{remote_path}").into(),
            target.as_os_str().to_owned(),
        ];
        for option in &self.settings.sshfs_options {
            command.push("-o".into());
            command.push(option.into());
        }
        tracing::info!("mounting {} at {}", self.what(), target.display());
        execute(&command, None, Some(sink))?;
        Ok(())
    }

    fn unmount(&self, sink: &mut dyn ProgressSink) -> Result<(), SyncError> {
        if !self.supports_unmount() {
            return Ok(());
        }
        if !self.is_mounted() {
            return Err(SyncError::NotMounted { what: self.what() });
        }
        fuse_unmount(self.settings, &self.container.access_path, sink)
    }

    fn is_mounted(&self) -> bool {
        match &self.container.kind {
            ContainerKind::Plain { .. } => self.container.access_path.is_dir(),
            ContainerKind::NetworkMounted { .. } => is_mount_point(&self.container.access_path),
        }
    }

    fn supports_unmount(&self) -> bool {
        matches!(self.container.kind, ContainerKind::NetworkMounted { .. })
    }
}

/// A replica together with the settings its mount tools need.
pub struct ReplicaMount<'a> {
    replica: &'a Replica,
    settings: &'a Settings,
}

impl<'a> ReplicaMount<'a> {
    pub fn new(replica: &'a Replica, settings: &'a Settings) -> Self {
        Self { replica, settings }
    }

    fn what(&self) -> String {
        format!("replica '{}'", self.replica.qualified_name())
    }
}

impl Mountable for ReplicaMount<'_> {
    fn mount(&self, sink: &mut dyn ProgressSink) -> Result<(), SyncError> {
        if self.replica.kind == ReplicaKind::Plain {
            return Ok(());
        }
        if self.is_mounted() {
            return Err(SyncError::AlreadyMounted { what: self.what() });
        }
        mount_encrypted(
            self.settings,
            &self.replica.storage_path,
            &self.replica.access_path,
            false,
            sink,
        )
    }

    fn unmount(&self, sink: &mut dyn ProgressSink) -> Result<(), SyncError> {
        if !self.supports_unmount() {
            return Ok(());
        }
        if !self.is_mounted() {
            return Err(SyncError::NotMounted { what: self.what() });
        }
        fuse_unmount(self.settings, &self.replica.access_path, sink)
    }

    fn is_mounted(&self) -> bool {
        is_accessible(self.replica)
    }

    fn supports_unmount(&self) -> bool {
        self.replica.kind == ReplicaKind::Encrypted
    }
}

/// Whether the engine can operate in `replica`'s access path right now.
pub fn is_accessible(replica: &Replica) -> bool {
    match replica.kind {
        ReplicaKind::Plain => replica.access_path.is_dir(),
        ReplicaKind::Encrypted => is_mount_point(&replica.access_path),
    }
}

/// Fail with [`SyncError::NotMounted`] unless `replica` is accessible.
pub fn ensure_accessible(replica: &Replica) -> Result<(), SyncError> {
    if is_accessible(replica) {
        Ok(())
    } else {
        Err(SyncError::NotMounted {
            what: format!("replica '{}'", replica.qualified_name()),
        })
    }
}

/// Mount the encfs volume at `storage` on `access`. With `create`, encfs
/// initialises a new volume using its standard configuration.
pub(crate) fn mount_encrypted(
    settings: &Settings,
    storage: &Path,
    access: &Path,
    create: bool,
    sink: &mut dyn ProgressSink,
) -> Result<(), SyncError> {
    fs::create_dir_all(access).map_err(|e| io_err(access, e))?;

    let mut command: Vec<OsString> = vec!["encfs".into()];
    if let Some(askpass) = &settings.askpass {
        let mut flag = OsString::from("--extpass=");
        flag.push(askpass);
        command.push(flag);
    }
    if create {
        command.push("--standard".into());
    }
    command.extend([
        OsString::from("-i"),
        OsString::from(ENCFS_IDLE_MINUTES),
        storage.as_os_str().to_owned(),
        access.as_os_str().to_owned(),
    ]);
    tracing::info!("mounting encrypted view {}", access.display());
    execute(&command, None, Some(sink))?;
    Ok(())
}

fn fuse_unmount(
    settings: &Settings,
    target: &Path,
    sink: &mut dyn ProgressSink,
) -> Result<(), SyncError> {
    let command: Vec<OsString> = vec![
        settings.fuse_unmount.clone().into(),
        "-u".into(),
        target.as_os_str().to_owned(),
    ];
    tracing::info!("unmounting {}", target.display());
    execute(&command, None, Some(sink))?;

    // Leave no empty mount point behind.
    let empty = fs::read_dir(target)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        fs::remove_dir(target).map_err(|e| io_err(target, e))?;
    }
    Ok(())
}
