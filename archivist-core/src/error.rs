//! Error types for archivist-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from archive catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.archivist/`.
    #[error("cannot determine home directory; set $HOME or pass --archive-path")]
    HomeNotFound,

    #[error("archive already exists at {path}")]
    ArchiveExists { path: PathBuf },

    #[error("archive not found at {path}; run `archivist archive init` first")]
    ArchiveNotFound { path: PathBuf },

    #[error("container '{name}' not found")]
    ContainerNotFound { name: String },

    #[error("container '{name}' already exists")]
    ContainerExists { name: String },

    #[error("replica '{name}' not found in container '{container}'")]
    ReplicaNotFound { container: String, name: String },

    /// A container or replica name that is empty, absolute, or walks out of
    /// its parent directory.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("container '{name}' is not mounted")]
    NotMounted { name: String },
}

/// Convenience constructor for [`CatalogError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.into(),
        source,
    }
}
