//! Error types for archivist-sync.

use std::path::PathBuf;

use thiserror::Error;

use archivist_core::{CatalogError, ReplicaUuid};

/// Failure of a single external command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    /// The program could not be started (not installed, not executable, ...).
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited non-zero (or was killed by a signal).
    #[error("`{command}` {}", describe_exit(.exit_code))]
    ProcessFailed {
        command: String,
        exit_code: Option<i32>,
    },

    /// Reading one of the output pipes failed.
    #[error("failed reading output of `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The caller's progress sink returned an error.
    #[error("progress sink failed while running `{command}`: {source}")]
    Sink {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from `{command}`: {detail}")]
    UnexpectedOutput { command: String, detail: String },
}

impl ExecError {
    /// Exit code of a failed process, if the error is a [`ExecError::ProcessFailed`].
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::ProcessFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// All errors that can arise from sync, clone and mount operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Process failures bubble up unmodified.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Destination exists or escapes its container root. Nothing was created.
    #[error("cannot use {path}: {reason}")]
    NameConflict { path: PathBuf, reason: String },

    #[error("{what} is not mounted")]
    NotMounted { what: String },

    #[error("{what} is already mounted")]
    AlreadyMounted { what: String },

    /// Establishing an ephemeral link to a sibling failed; the sync was
    /// aborted before any commit.
    #[error("failed to link sibling {sibling}: {source}")]
    LinkFailed {
        sibling: String,
        #[source]
        source: ExecError,
    },

    /// Another sync of the same replica holds the lock file.
    #[error("replica is busy: lock {lock} is held by another sync")]
    Busy { lock: PathBuf },

    #[error("storage engine reused uuid {uuid} for a new replica")]
    DuplicateUuid { uuid: ReplicaUuid },

    /// A create or clone failed after the destination directory was
    /// reserved. The directory is left in place for the operator.
    #[error("partially created replica left at {path}: {source}")]
    PartialClone {
        path: PathBuf,
        #[source]
        source: Box<SyncError>,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a progress line to the caller's sink failed.
    #[error("progress output failed: {0}")]
    Progress(#[source] std::io::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
