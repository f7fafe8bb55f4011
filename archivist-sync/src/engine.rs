//! Storage engine capability contract and its git-annex implementation.
//!
//! The coordinators only ever talk to the engine through [`StorageEngine`];
//! argument vectors are a detail of [`GitAnnex`].

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::Path;

use archivist_core::ReplicaUuid;

use crate::error::ExecError;
use crate::exec::{capture, execute, ProgressSink};

/// Message used for every commit the engine creates.
pub const COMMIT_MESSAGE: &str = "Snapshot";

/// Everything the coordinators need from the version-controlled store.
///
/// `path` is always the directory the engine operates in (a replica's access
/// path). Operations that can print progress take the caller's sink.
pub trait StorageEngine {
    /// Make `path` a first-class replica; the engine assigns a fresh uuid.
    fn init(&self, path: &Path, description: &str, sink: &mut dyn ProgressSink)
        -> Result<(), ExecError>;

    /// Stage every pending modification and commit it.
    fn commit(&self, path: &Path, allow_empty: bool, sink: &mut dyn ProgressSink)
        -> Result<(), ExecError>;

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, ExecError>;

    /// Exchange history and content with every configured remote.
    fn sync_content(&self, path: &Path, sink: &mut dyn ProgressSink) -> Result<(), ExecError>;

    /// Point remote `name` at `target`. Creates it, or updates it if a remote
    /// of that name is already configured.
    fn add_remote(
        &self,
        path: &Path,
        name: &str,
        target: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError>;

    fn remove_remote(&self, path: &Path, name: &str, sink: &mut dyn ProgressSink)
        -> Result<(), ExecError>;

    /// Copy the full history of `source` into the new directory `destination`.
    fn clone_history(
        &self,
        source: &Path,
        destination: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError>;

    fn read_uuid(&self, path: &Path) -> Result<ReplicaUuid, ExecError>;

    /// Every replica uuid the engine has ever recorded, first-seen order.
    fn read_replication_log(&self, path: &Path) -> Result<Vec<ReplicaUuid>, ExecError>;
}

/// [`StorageEngine`] backed by the `git` and `git annex` command-line tools.
#[derive(Debug, Clone)]
pub struct GitAnnex {
    git: OsString,
}

impl Default for GitAnnex {
    fn default() -> Self {
        Self { git: "git".into() }
    }
}

impl GitAnnex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `git` binary.
    pub fn with_git(git: impl Into<OsString>) -> Self {
        Self { git: git.into() }
    }

    fn command<'a>(&self, args: impl IntoIterator<Item = &'a OsStr>) -> Vec<OsString> {
        std::iter::once(self.git.clone())
            .chain(args.into_iter().map(OsStr::to_os_string))
            .collect()
    }

    fn run(&self, path: &Path, args: &[&str], sink: &mut dyn ProgressSink) -> Result<(), ExecError> {
        let command = self.command(args.iter().map(OsStr::new));
        execute(&command, Some(path), Some(sink))
    }

    fn query(&self, path: &Path, args: &[&str]) -> Result<String, ExecError> {
        let command = self.command(args.iter().map(OsStr::new));
        capture(&command, Some(path))
    }

    fn remotes(&self, path: &Path) -> Result<Vec<String>, ExecError> {
        Ok(self
            .query(path, &["remote"])?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl StorageEngine for GitAnnex {
    fn init(
        &self,
        path: &Path,
        description: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError> {
        self.run(path, &["init", "-q", "."], sink)?;
        self.run(path, &["annex", "init", description], sink)
    }

    fn commit(
        &self,
        path: &Path,
        allow_empty: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError> {
        self.run(path, &["add", "--all", "."], sink)?;
        let mut args = vec!["commit", "-q", "-m", COMMIT_MESSAGE];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(path, &args, sink)
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, ExecError> {
        let status = self.query(path, &["status", "--porcelain"])?;
        Ok(!status.trim().is_empty())
    }

    fn sync_content(&self, path: &Path, sink: &mut dyn ProgressSink) -> Result<(), ExecError> {
        self.run(path, &["annex", "sync", "--content"], sink)
    }

    fn add_remote(
        &self,
        path: &Path,
        name: &str,
        target: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError> {
        let verb = if self.remotes(path)?.iter().any(|r| r == name) {
            "set-url"
        } else {
            "add"
        };
        let command = self.command([
            OsStr::new("remote"),
            OsStr::new(verb),
            OsStr::new(name),
            target.as_os_str(),
        ]);
        execute(&command, Some(path), Some(sink))
    }

    fn remove_remote(
        &self,
        path: &Path,
        name: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError> {
        self.run(path, &["remote", "remove", name], sink)
    }

    fn clone_history(
        &self,
        source: &Path,
        destination: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError> {
        let command = self.command([
            OsStr::new("clone"),
            source.as_os_str(),
            destination.as_os_str(),
        ]);
        execute(&command, None, Some(sink))
    }

    fn read_uuid(&self, path: &Path) -> Result<ReplicaUuid, ExecError> {
        let raw = self.query(path, &["config", "annex.uuid"])?;
        let uuid = raw.trim();
        if uuid.is_empty() {
            return Err(ExecError::UnexpectedOutput {
                command: "git config annex.uuid".into(),
                detail: format!("no uuid configured in {}", path.display()),
            });
        }
        Ok(ReplicaUuid::from(uuid))
    }

    fn read_replication_log(&self, path: &Path) -> Result<Vec<ReplicaUuid>, ExecError> {
        let log = self.query(path, &["show", "git-annex:uuid.log"])?;
        Ok(parse_uuid_log(&log))
    }
}

/// `uuid.log` lines look like `<uuid> <description> timestamp=<t>`; only the
/// first field matters. Duplicates keep their first position.
pub(crate) fn parse_uuid_log(log: &str) -> Vec<ReplicaUuid> {
    let mut seen = HashSet::new();
    log.lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|uuid| seen.insert(uuid.to_string()))
        .map(ReplicaUuid::from)
        .collect()
}
