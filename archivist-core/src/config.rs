//! Archive-wide settings, read from `<archive>/config.yaml`.
//!
//! Every field is optional on disk; a missing file yields [`Settings::default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CatalogError};

/// Settings that tune how external mount tools are invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Program handed to `encfs --extpass` to obtain the volume password.
    /// When unset, encfs prompts on the terminal.
    pub askpass: Option<PathBuf>,
    /// Extra `-o` options passed to `sshfs`.
    pub sshfs_options: Vec<String>,
    /// Program used to detach FUSE mounts.
    pub fuse_unmount: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            askpass: None,
            sshfs_options: vec![],
            fuse_unmount: "fusermount".to_string(),
        }
    }
}

impl Settings {
    pub fn load_at(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| CatalogError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
