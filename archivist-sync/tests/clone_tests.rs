//! CloneCoordinator tests against the recording engine: lineage, name
//! reservation, and partial failures.

mod common;

use std::path::PathBuf;

use archivist_core::{ReplicaKind, ReplicaName, ReplicaUuid};
use archivist_sync::coordinator::link_name;
use archivist_sync::{identity, CloneCoordinator, Discard, ExecError, SyncError};
use rstest::rstest;

use common::{Call, Fixture, Lines, Op};

#[test]
fn clone_joins_the_source_group_under_a_new_uuid_and_catches_up() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let nas = fx.container("nas");
    let a = fx.replica(&usb, "a", "g1");

    let b = CloneCoordinator::new(&fx.archive, &fx.engine)
        .clone_replica(&a, &nas, &ReplicaName::from("a-copy"), &mut Discard)
        .expect("clone");

    let dest = nas.access_path.join("a-copy");
    assert_eq!(b.access_path, dest);
    assert_eq!(b.kind, ReplicaKind::Plain);
    assert_eq!(b.qualified_name(), "nas/a-copy");

    let id_a = identity(&fx.engine, &a).expect("identity a");
    let id_b = identity(&fx.engine, &b).expect("identity b");
    assert_eq!(id_b.group_id, id_a.group_id);
    assert_ne!(id_b.uuid, id_a.uuid);

    let link = link_name(&id_a.uuid);
    assert_eq!(
        fx.engine.calls(),
        vec![
            Call::CloneHistory(a.access_path.clone(), dest.clone()),
            Call::RemoveRemote(dest.clone(), "origin".into()),
            Call::Init(dest.clone()),
            Call::AddRemote(dest.clone(), link.clone(), a.access_path.clone()),
            Call::Sync(dest.clone()),
            Call::Sync(a.access_path.clone()),
            Call::RemoveRemote(dest.clone(), link),
        ]
    );
    assert!(fx.engine.remotes(&dest).is_empty(), "no permanent link to the source");
}

#[test]
fn clone_uuid_differs_from_every_replica_of_the_group() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let a = fx.replica(&usb, "a", "g1");
    let b = fx.replica(&usb, "b", "g1");
    let cloner = CloneCoordinator::new(&fx.archive, &fx.engine);

    let c = cloner
        .clone_replica(&b, &usb, &ReplicaName::from("c"), &mut Discard)
        .expect("clone");

    let uuids: Vec<ReplicaUuid> = [&a, &b, &c]
        .iter()
        .map(|r| fx.engine.uuid_of(&r.access_path).expect("uuid"))
        .collect();
    assert_ne!(uuids[2], uuids[0]);
    assert_ne!(uuids[2], uuids[1]);
    assert_eq!(c.group_id().0, "g1");
}

#[test]
fn clone_reports_its_progress() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let a = fx.replica(&usb, "a", "g1");

    let mut lines = Lines::default();
    CloneCoordinator::new(&fx.archive, &fx.engine)
        .clone_replica(&a, &usb, &ReplicaName::from("b"), &mut lines)
        .expect("clone");

    assert_eq!(lines.output[0], "Cloning usb/a into usb/b\n");
    assert_eq!(lines.output[1], "Initialising usb/b\n");
    assert!(lines
        .output
        .contains(&"Discovering siblings of usb/b\n".to_string()));
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

#[rstest]
#[case::existing("a")]
#[case::parent_traversal("../escape")]
#[case::nested_traversal("x/../../escape")]
#[case::absolute("/tmp/escape")]
#[case::empty("")]
#[case::inside_a_replica("a/inner")]
#[case::inside_a_view("vault.Decrypted/inner")]
fn conflicting_names_are_rejected_before_anything_is_created(#[case] name: &str) {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let a = fx.replica(&usb, "a", "g1");

    let err = CloneCoordinator::new(&fx.archive, &fx.engine)
        .clone_replica(&a, &usb, &ReplicaName::from(name), &mut Discard)
        .unwrap_err();

    assert!(matches!(err, SyncError::NameConflict { .. }), "got: {err}");
    assert!(fx.engine.calls().is_empty());
}

#[test]
fn reserve_returns_a_path_inside_the_container() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let path = CloneCoordinator::new(&fx.archive, &fx.engine)
        .reserve(&usb, &ReplicaName::from("photos/2024"))
        .expect("reserve");
    assert_eq!(path, usb.access_path.join("photos/2024"));
    assert!(!path.exists(), "reservation creates nothing");
}

#[test]
fn clone_into_unmounted_container_is_rejected() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let offline = fx.unmounted_container("offline");
    let a = fx.replica(&usb, "a", "g1");

    let err = CloneCoordinator::new(&fx.archive, &fx.engine)
        .clone_replica(&a, &offline, &ReplicaName::from("a"), &mut Discard)
        .unwrap_err();

    assert!(matches!(err, SyncError::NotMounted { .. }), "got: {err}");
    assert!(fx.engine.calls().is_empty());
    assert!(fx.engine.uuid_reads().is_empty(), "source uuid read before the mount check");
}

// ---------------------------------------------------------------------------
// Partial failures
// ---------------------------------------------------------------------------

fn partial_path(err: &SyncError) -> (&PathBuf, &SyncError) {
    match err {
        SyncError::PartialClone { path, source } => (path, source.as_ref()),
        other => panic!("expected PartialClone, got: {other}"),
    }
}

#[test]
fn failed_history_copy_names_the_partial_path() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let a = fx.replica(&usb, "a", "g1");
    fx.engine.fail_on(Op::CloneHistory, &a.access_path);

    let err = CloneCoordinator::new(&fx.archive, &fx.engine)
        .clone_replica(&a, &usb, &ReplicaName::from("b"), &mut Discard)
        .unwrap_err();

    let (path, source) = partial_path(&err);
    assert_eq!(path, &usb.access_path.join("b"));
    assert!(matches!(
        source,
        SyncError::Exec(ExecError::ProcessFailed { .. })
    ));
    assert!(err.to_string().contains("partially created replica"));
}

#[test]
fn failed_init_leaves_the_directory_for_the_operator() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let a = fx.replica(&usb, "a", "g1");
    let dest = usb.access_path.join("b");
    fx.engine.fail_on(Op::Init, &dest);

    let err = CloneCoordinator::new(&fx.archive, &fx.engine)
        .clone_replica(&a, &usb, &ReplicaName::from("b"), &mut Discard)
        .unwrap_err();

    let (path, _) = partial_path(&err);
    assert_eq!(path, &dest);
    assert!(dest.is_dir(), "no rollback");
}

#[test]
fn reused_uuid_is_reported_as_duplicate() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let a = fx.replica(&usb, "a", "g1");
    let source_uuid = fx.engine.uuid_of(&a.access_path).expect("uuid");
    fx.engine.force_uuid(source_uuid.clone());

    let err = CloneCoordinator::new(&fx.archive, &fx.engine)
        .clone_replica(&a, &usb, &ReplicaName::from("b"), &mut Discard)
        .unwrap_err();

    let (_, source) = partial_path(&err);
    assert!(
        matches!(source, SyncError::DuplicateUuid { uuid } if *uuid == source_uuid),
        "got: {source}"
    );
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[test]
fn create_initialises_and_commits_a_fresh_group() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    let cloner = CloneCoordinator::new(&fx.archive, &fx.engine);

    let docs = cloner
        .create(&usb, &ReplicaName::from("docs"), ReplicaKind::Plain, &mut Discard)
        .expect("create docs");
    let music = cloner
        .create(&usb, &ReplicaName::from("media/music"), ReplicaKind::Plain, &mut Discard)
        .expect("create music");

    assert_eq!(docs.access_path, usb.access_path.join("docs"));
    assert_eq!(music.qualified_name(), "usb/media/music");
    assert_ne!(docs.group_id(), music.group_id());
    assert_eq!(
        &fx.engine.calls()[..2],
        &[
            Call::Init(docs.access_path.clone()),
            Call::Commit(docs.access_path.clone(), true),
        ]
    );
}

#[test]
fn create_over_an_existing_replica_is_a_conflict() {
    let fx = Fixture::new();
    let usb = fx.container("usb");
    fx.replica(&usb, "docs", "g1");

    let err = CloneCoordinator::new(&fx.archive, &fx.engine)
        .create(&usb, &ReplicaName::from("docs"), ReplicaKind::Plain, &mut Discard)
        .unwrap_err();

    assert!(matches!(err, SyncError::NameConflict { .. }), "got: {err}");
}
