//! Single-flight protection and recovery from interrupted runs.

use pv::engine::SCRATCH_PREFIX;
use pv::error::PvError;
use pv::state::Operation;

use crate::common::assertions::{assert_dir_empty, list_files};
use crate::common::fixtures::{TestDataDir, seed_learner};
use crate::common::init_test_logging;

#[tokio::test]
async fn operations_are_rejected_while_one_runs() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    let archive = engine.create_backup().await.unwrap().archive.path;

    let guard = engine.state().try_begin(Operation::Restore).unwrap();
    assert_eq!(engine.status().unwrap().state.running, Some(Operation::Restore));

    assert!(matches!(engine.create_backup().await, Err(PvError::Busy)));
    assert!(matches!(engine.restore_backup(&archive).await, Err(PvError::Busy)));
    assert!(matches!(engine.inspect(&archive).await, Err(PvError::Busy)));
    assert!(matches!(engine.sweep_orphaned_scratch(), Err(PvError::Busy)));

    drop(guard);
    engine.restore_backup(&archive).await.unwrap();
    assert!(engine.status().unwrap().state.running.is_none());
}

#[tokio::test]
async fn concurrent_backups_never_overlap() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    seed_learner(engine.stores(), &data.outside());

    let other = engine.clone();
    let (a, b) = tokio::join!(engine.create_backup(), other.create_backup());
    let mut finished = 0;
    for result in [a, b] {
        match result {
            Ok(_) => finished += 1,
            Err(PvError::Busy) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(finished >= 1);
    assert_eq!(list_files(&engine.layout().backup_dir).len(), finished);
    assert!(!engine.state().is_busy());
}

#[tokio::test]
async fn failed_operation_releases_the_slot() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();

    let missing = data.outside().join("does-not-exist.zip");
    let err = engine.restore_backup(&missing).await.unwrap_err();
    assert!(matches!(err, PvError::Io(_)));
    assert!(!engine.state().is_busy());

    engine.create_backup().await.unwrap();
}

#[test]
fn opening_sweeps_interrupted_runs() {
    init_test_logging();
    let data = TestDataDir::new();
    let layout = {
        let engine = data.engine();
        engine.layout().clone()
    };

    let orphan = layout.scratch_dir.join(format!("{SCRATCH_PREFIX}crashed"));
    std::fs::create_dir_all(orphan.join("assets")).unwrap();
    std::fs::write(orphan.join("manifest.json"), b"{}").unwrap();
    std::fs::write(layout.backup_dir.join("backup-20260101-000000.zip.partial"), b"PK").unwrap();
    std::fs::write(layout.backup_dir.join("backup-20251231-235959.zip"), b"PK").unwrap();

    let engine = data.engine();
    assert_dir_empty(&engine.layout().scratch_dir);
    assert_eq!(
        list_files(&engine.layout().backup_dir),
        vec!["backup-20251231-235959.zip"]
    );
    assert_eq!(engine.status().unwrap().backups.len(), 1);
}

#[tokio::test]
async fn last_backup_time_survives_reopen() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    assert!(engine.last_backup_time().is_none());

    engine.create_backup().await.unwrap();
    let recorded = engine.last_backup_time().unwrap();
    drop(engine);

    let reopened = data.engine();
    assert_eq!(reopened.last_backup_time(), Some(recorded));
    assert_eq!(reopened.status().unwrap().state.last_backup_at, Some(recorded));
}
