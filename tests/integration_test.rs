// tests/integration_test.rs

//! Integration tests for Depot
//!
//! These tests verify end-to-end functionality across modules.

use depot::config::Layout;
use depot::db::models::DeltaInformation;
use depot::delta::{self, DeltaBackend, ZstdDelta};
use depot::packages::{FilenameReader, PackageMetadata};
use depot::{Error, Manager, api};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tempfile::TempDir;

/// Package contents sharing most bytes between releases
fn package_bytes(release: u32) -> Vec<u8> {
    let mut state = 0x9e37_79b9u32;
    let mut data: Vec<u8> = (0..128 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect();
    data.extend_from_slice(format!("release {}", release).as_bytes());
    data
}

fn write_package(dir: &TempDir, file_name: &str, release: u32) -> PathBuf {
    let path = dir.path().join("incoming").join(file_name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, package_bytes(release)).unwrap();
    path
}

fn open_manager(dir: &TempDir) -> Manager {
    Manager::open_default(Layout::new(dir.path().join("state"))).unwrap()
}

/// Backend that always fails, counting its invocations
struct FailingBackend {
    calls: Arc<AtomicUsize>,
}

impl DeltaBackend for FailingBackend {
    fn compute(&self, _old: &Path, _new: &Path, _out: &Path) -> depot::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::DeltaFailed {
            delta_id: String::new(),
            reason: "undiffable".to_string(),
        })
    }
}

#[test]
fn test_shannon_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open_manager(&dir);

    manager.create_repo("shannon").unwrap();
    assert!(matches!(
        manager.create_repo("shannon"),
        Err(Error::AlreadyExists(_))
    ));

    manager.index("shannon").unwrap();
    assert!(manager.get_package_names("shannon").unwrap().is_empty());

    let foo = write_package(&dir, "foo-1.0-1.eopkg", 1);
    manager.add_packages("shannon", &[foo]).unwrap();

    let builds = manager.get_packages("shannon", "foo").unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].release, 1);
    assert_eq!(builds[0], PackageMetadata::new("foo", "1.0", 1, "x86_64"));

    assert!(matches!(
        manager.create_delta("shannon", "foo-1.0-1.eopkg", "foo-1.0-1.eopkg"),
        Err(Error::InvalidPair(_))
    ));
}

#[test]
fn test_delta_round_trip_through_repository() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open_manager(&dir);
    manager.create_repo("shannon").unwrap();

    let old = write_package(&dir, "foo-1.0-1.eopkg", 1);
    let new = write_package(&dir, "foo-1.0-2.eopkg", 2);
    manager.add_packages("shannon", &[old.clone(), new.clone()]).unwrap();

    let delta_path = manager
        .create_delta("shannon", "foo-1.0-1.eopkg", "foo-1.0-2.eopkg")
        .unwrap();
    assert!(fs::metadata(&delta_path).unwrap().len() < fs::metadata(&new).unwrap().len());

    // The delta rebuilds the new package from the old one
    let rebuilt = dir.path().join("rebuilt.eopkg");
    ZstdDelta::default().apply(&old, &delta_path, &rebuilt).unwrap();
    assert_eq!(fs::read(&rebuilt).unwrap(), fs::read(&new).unwrap());

    let info = manager
        .get_delta(&delta::delta_id("foo-1.0-1.eopkg", "foo-1.0-2.eopkg"))
        .unwrap()
        .unwrap();
    manager.add_delta("shannon", &delta_path, &info).unwrap();
    assert!(manager
        .has_delta("shannon", "foo-1.0-2.eopkg", &delta_path.display().to_string())
        .unwrap());
}

#[test]
fn test_failed_delta_is_never_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::new(dir.path().join("state"));
    let calls = Arc::new(AtomicUsize::new(0));
    let id = delta::delta_id("foo-1.0-1.eopkg", "foo-1.0-2.eopkg");

    {
        let manager = Manager::open(
            layout.clone(),
            Arc::new(FilenameReader::new()),
            Arc::new(FailingBackend {
                calls: Arc::clone(&calls),
            }),
        )
        .unwrap();
        manager.create_repo("shannon").unwrap();
        let paths = vec![
            write_package(&dir, "foo-1.0-1.eopkg", 1),
            write_package(&dir, "foo-1.0-2.eopkg", 2),
        ];
        manager.add_packages("shannon", &paths).unwrap();

        assert!(matches!(
            manager.create_delta("shannon", "foo-1.0-1.eopkg", "foo-1.0-2.eopkg"),
            Err(Error::DeltaFailed { .. })
        ));
    }

    // After a restart the failure is still known and nothing is recomputed
    let manager = Manager::open(
        layout,
        Arc::new(FilenameReader::new()),
        Arc::new(FailingBackend {
            calls: Arc::clone(&calls),
        }),
    )
    .unwrap();
    assert!(manager.get_delta_failed(&id).unwrap());
    assert!(matches!(
        manager.create_delta("shannon", "foo-1.0-1.eopkg", "foo-1.0-2.eopkg"),
        Err(Error::PreviouslyFailed(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Clearing the failure lets an operator retry explicitly
    manager.clear_delta_failure(&id).unwrap();
    assert!(matches!(
        manager.create_delta("shannon", "foo-1.0-1.eopkg", "foo-1.0-2.eopkg"),
        Err(Error::DeltaFailed { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = open_manager(&dir);
        manager.create_repo("shannon").unwrap();
        manager.create_repo("unstable").unwrap();
        let foo = write_package(&dir, "foo-1.0-1.eopkg", 1);
        manager.add_packages("unstable", &[foo]).unwrap();
    }

    let manager = open_manager(&dir);
    assert_eq!(
        manager.list_repos().unwrap(),
        vec!["shannon".to_string(), "unstable".to_string()]
    );
    assert_eq!(
        manager.get_package_names("unstable").unwrap(),
        vec!["foo".to_string()]
    );
}

#[test]
fn test_mark_delta_failed_through_manager() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open_manager(&dir);
    let info = DeltaInformation::new(
        "d1".to_string(),
        "a.eopkg".to_string(),
        "b.eopkg".to_string(),
    );

    assert!(!manager.get_delta_failed("d1").unwrap());
    manager.mark_delta_failed("d1", &info).unwrap();
    manager.mark_delta_failed("d1", &info).unwrap();
    assert!(manager.get_delta_failed("d1").unwrap());
}

#[test]
fn test_readers_never_see_partial_batches() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(open_manager(&dir));
    manager.create_repo("shannon").unwrap();

    let batches: Vec<Vec<PathBuf>> = (0..5u32)
        .map(|batch| {
            vec![
                write_package(&dir, &format!("a{}-1.0-1.eopkg", batch), batch * 2),
                write_package(&dir, &format!("b{}-1.0-1.eopkg", batch), batch * 2 + 1),
            ]
        })
        .collect();

    let reader = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            for _ in 0..200 {
                // Batches add two names at once
                let names = manager.get_package_names("shannon").unwrap();
                assert_eq!(names.len() % 2, 0, "partial batch visible: {:?}", names);
            }
        })
    };

    for batch in &batches {
        manager.add_packages("shannon", batch).unwrap();
    }
    reader.join().unwrap();

    assert_eq!(manager.get_package_names("shannon").unwrap().len(), 10);
}

#[test]
fn test_control_api_envelopes() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open_manager(&dir);

    let created = api::handle(&manager, "GET", "/api/v1/create_repo/shannon");
    assert_eq!(created.body["error"], false);

    let again = api::handle(&manager, "GET", "/api/v1/create_repo/shannon");
    assert_eq!(again.body["error"], true);
    assert_eq!(again.body["errorString"], "resource already exists");

    let missing = api::handle(&manager, "GET", "/api/v1/index_repo/unknown");
    assert_eq!(missing.body["errorString"], "unknown resource");
}
