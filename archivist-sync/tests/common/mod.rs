//! In-memory storage engine and archive fixtures for coordinator tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use archivist_core::catalog::{self, Archive};
use archivist_core::{
    Container, ContainerKind, ContainerName, GroupId, Replica, ReplicaKind, ReplicaMetadata,
    ReplicaName, ReplicaUuid,
};
use archivist_sync::{ExecError, ProgressSink, StorageEngine};
use chrono::Utc;
use tempfile::TempDir;

/// One mutating engine call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init(PathBuf),
    Commit(PathBuf, bool),
    Sync(PathBuf),
    AddRemote(PathBuf, String, PathBuf),
    RemoveRemote(PathBuf, String),
    CloneHistory(PathBuf, PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Init,
    Commit,
    Sync,
    AddRemote,
    RemoveRemote,
    CloneHistory,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    uuid_reads: Vec<PathBuf>,
    uuids: HashMap<PathBuf, ReplicaUuid>,
    logs: HashMap<PathBuf, Vec<ReplicaUuid>>,
    remotes: HashMap<PathBuf, Vec<String>>,
    dirty: HashSet<PathBuf>,
    failures: Vec<(Op, PathBuf)>,
    forced_uuid: Option<ReplicaUuid>,
    next: u32,
}

/// Records every call and keeps just enough state (uuids, remotes, pending
/// changes) for the coordinators to make decisions.
#[derive(Default)]
pub struct FakeEngine {
    state: RefCell<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `path` a fresh uuid, as `init` would.
    pub fn register(&self, path: &Path) -> ReplicaUuid {
        let mut state = self.state.borrow_mut();
        state.next += 1;
        let uuid = ReplicaUuid::from(format!("uuid-{}", state.next));
        state.uuids.insert(path.to_path_buf(), uuid.clone());
        state.logs.entry(path.to_path_buf()).or_default().push(uuid.clone());
        uuid
    }

    /// Mark `path` as having uncommitted changes.
    pub fn touch(&self, path: &Path) {
        self.state.borrow_mut().dirty.insert(path.to_path_buf());
    }

    pub fn set_log(&self, path: &Path, log: Vec<ReplicaUuid>) {
        self.state.borrow_mut().logs.insert(path.to_path_buf(), log);
    }

    /// Make every `op` on `path` exit with status 1. `AddRemote` is keyed by
    /// the link target, `CloneHistory` by the source.
    pub fn fail_on(&self, op: Op, path: &Path) {
        self.state.borrow_mut().failures.push((op, path.to_path_buf()));
    }

    /// Make the next `init` hand out `uuid` instead of a fresh one.
    pub fn force_uuid(&self, uuid: ReplicaUuid) {
        self.state.borrow_mut().forced_uuid = Some(uuid);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Paths whose uuid was queried, in order.
    pub fn uuid_reads(&self) -> Vec<PathBuf> {
        self.state.borrow().uuid_reads.clone()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.borrow_mut();
        state.calls.clear();
        state.uuid_reads.clear();
    }

    pub fn remotes(&self, path: &Path) -> Vec<String> {
        self.state.borrow().remotes.get(path).cloned().unwrap_or_default()
    }

    pub fn uuid_of(&self, path: &Path) -> Option<ReplicaUuid> {
        self.state.borrow().uuids.get(path).cloned()
    }

    fn record(&self, op: Op, path: &Path, call: Call) -> Result<(), ExecError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if state.failures.iter().any(|(o, p)| *o == op && p == path) {
            return Err(ExecError::ProcessFailed {
                command: format!("fake {op:?} in {}", path.display()),
                exit_code: Some(1),
            });
        }
        Ok(())
    }
}

impl StorageEngine for FakeEngine {
    fn init(&self, path: &Path, _description: &str, sink: &mut dyn ProgressSink) -> Result<(), ExecError> {
        self.record(Op::Init, path, Call::Init(path.to_path_buf()))?;
        fs::create_dir_all(path.join(".git")).map_err(io_failure)?;
        let forced = self.state.borrow_mut().forced_uuid.take();
        let uuid = match forced {
            Some(uuid) => {
                let mut state = self.state.borrow_mut();
                state.uuids.insert(path.to_path_buf(), uuid.clone());
                state.logs.entry(path.to_path_buf()).or_default().push(uuid.clone());
                uuid
            }
            None => self.register(path),
        };
        let _ = sink.on_output_line(&format!("init {uuid}\n"));
        Ok(())
    }

    fn commit(&self, path: &Path, allow_empty: bool, _sink: &mut dyn ProgressSink) -> Result<(), ExecError> {
        self.record(Op::Commit, path, Call::Commit(path.to_path_buf(), allow_empty))?;
        self.state.borrow_mut().dirty.remove(path);
        Ok(())
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, ExecError> {
        Ok(self.state.borrow().dirty.contains(path))
    }

    fn sync_content(&self, path: &Path, sink: &mut dyn ProgressSink) -> Result<(), ExecError> {
        self.record(Op::Sync, path, Call::Sync(path.to_path_buf()))?;
        let _ = sink.on_error_line("sync: ok\n");
        Ok(())
    }

    fn add_remote(
        &self,
        path: &Path,
        name: &str,
        target: &Path,
        _sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError> {
        self.record(
            Op::AddRemote,
            target,
            Call::AddRemote(path.to_path_buf(), name.to_string(), target.to_path_buf()),
        )?;
        let mut state = self.state.borrow_mut();
        let remotes = state.remotes.entry(path.to_path_buf()).or_default();
        if !remotes.iter().any(|r| r == name) {
            remotes.push(name.to_string());
        }
        Ok(())
    }

    fn remove_remote(&self, path: &Path, name: &str, _sink: &mut dyn ProgressSink) -> Result<(), ExecError> {
        self.record(
            Op::RemoveRemote,
            path,
            Call::RemoveRemote(path.to_path_buf(), name.to_string()),
        )?;
        let mut state = self.state.borrow_mut();
        if let Some(remotes) = state.remotes.get_mut(path) {
            remotes.retain(|r| r != name);
        }
        Ok(())
    }

    fn clone_history(
        &self,
        source: &Path,
        destination: &Path,
        _sink: &mut dyn ProgressSink,
    ) -> Result<(), ExecError> {
        self.record(
            Op::CloneHistory,
            source,
            Call::CloneHistory(source.to_path_buf(), destination.to_path_buf()),
        )?;
        fs::create_dir_all(destination.join(".git")).map_err(io_failure)?;
        let mut state = self.state.borrow_mut();
        let log = state.logs.get(source).cloned().unwrap_or_default();
        state.logs.insert(destination.to_path_buf(), log);
        state
            .remotes
            .insert(destination.to_path_buf(), vec!["origin".to_string()]);
        Ok(())
    }

    fn read_uuid(&self, path: &Path) -> Result<ReplicaUuid, ExecError> {
        self.state.borrow_mut().uuid_reads.push(path.to_path_buf());
        self.state
            .borrow()
            .uuids
            .get(path)
            .cloned()
            .ok_or_else(|| ExecError::UnexpectedOutput {
                command: "fake read_uuid".into(),
                detail: format!("no uuid configured in {}", path.display()),
            })
    }

    fn read_replication_log(&self, path: &Path) -> Result<Vec<ReplicaUuid>, ExecError> {
        Ok(self.state.borrow().logs.get(path).cloned().unwrap_or_default())
    }
}

fn io_failure(source: io::Error) -> ExecError {
    ExecError::Io {
        command: "fake".into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Archive fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub root: TempDir,
    pub archive: Archive,
    pub engine: FakeEngine,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        let archive = Archive::at(root.path().join("archive"));
        archive.init().expect("init archive");
        Self {
            root,
            archive,
            engine: FakeEngine::new(),
        }
    }

    /// A plain container whose storage directory exists (mounted).
    pub fn container(&self, name: &str) -> Container {
        let storage = self.root.path().join("disks").join(name);
        fs::create_dir_all(&storage).expect("mkdir storage");
        self.add(name, storage)
    }

    /// A plain container whose storage directory is absent (unmounted).
    pub fn unmounted_container(&self, name: &str) -> Container {
        self.add(name, self.root.path().join("disks").join(name))
    }

    fn add(&self, name: &str, storage_path: PathBuf) -> Container {
        self.archive
            .add_container(ContainerName::from(name), ContainerKind::Plain { storage_path })
            .expect("add container")
    }

    /// A plain replica in `container` belonging to `group`, registered with
    /// the engine under a fresh uuid.
    pub fn replica(&self, container: &Container, name: &str, group: &str) -> Replica {
        let path = container.access_path.join(name);
        fs::create_dir_all(path.join(".git")).expect("mkdir replica");
        let metadata = ReplicaMetadata {
            kind: ReplicaKind::Plain,
            group_id: GroupId::from(group),
            created_at: Utc::now(),
        };
        catalog::write_replica_metadata(&path, &metadata).expect("write metadata");
        self.engine.register(&path);
        self.archive
            .load_replica(container, &ReplicaName::from(name))
            .expect("load replica")
    }
}

/// Every line a sink received, tagged by stream.
#[derive(Default)]
pub struct Lines {
    pub output: Vec<String>,
    pub error: Vec<String>,
}

impl ProgressSink for Lines {
    fn on_output_line(&mut self, line: &str) -> io::Result<()> {
        self.output.push(line.to_string());
        Ok(())
    }

    fn on_error_line(&mut self, line: &str) -> io::Result<()> {
        self.error.push(line.to_string());
        Ok(())
    }
}
