//! Hostile and malformed archives are rejected before anything is written.

use pv::config::{ArchiveLimits, EngineConfig};
use pv::engine::BackupEngine;
use pv::error::{FormatError, PvError, SecurityError};
use pv::snapshot::{AssetHandle, MANIFEST_ENTRY};

use crate::common::assertions::{assert_dir_empty, list_files};
use crate::common::fixtures::{
    ArchiveBuilder, TestDataDir, currency, manifest_with_currency, seed_learner, vocab_texts,
};
use crate::common::init_test_logging;

/// Restores `archive` into a seeded data directory and checks that the
/// attempt changed nothing and wrote nothing.
async fn restore_rejected(data: &TestDataDir, engine: &BackupEngine, archive: Vec<u8>) -> PvError {
    let path = data.outside().join("hostile.zip");
    std::fs::write(&path, archive).unwrap();
    let before = list_files(data.dir.path());

    let err = engine.restore_backup(&path).await.unwrap_err();

    assert_eq!(currency(engine.stores()), Some(40), "live state changed");
    assert_eq!(vocab_texts(engine.stores()), vec!["cat", "big red bus"]);
    assert_dir_empty(&engine.layout().scratch_dir);
    assert_eq!(list_files(data.dir.path()), before, "files were written");
    assert!(!engine.state().is_busy());
    err
}

fn seeded() -> (TestDataDir, BackupEngine) {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    seed_learner(engine.stores(), &data.outside());
    (data, engine)
}

fn asset_name() -> String {
    format!("assets/{}.png", AssetHandle::mint())
}

#[tokio::test]
async fn parent_traversal_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest_with_currency(10))
        .file(&asset_name(), b"fine")
        .file("../../escaped.txt", b"evil")
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Security(SecurityError::Traversal { .. })
    ));
}

#[tokio::test]
async fn nested_traversal_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest_with_currency(10))
        .file("assets/../../../escaped.png", b"evil")
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Security(SecurityError::Traversal { .. })
    ));
}

#[tokio::test]
async fn absolute_path_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest_with_currency(10))
        .file("/tmp/pv-escaped.txt", b"evil")
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Security(SecurityError::AbsolutePath { .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_entry_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest_with_currency(10))
        .symlink(&asset_name(), "/etc/passwd")
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Security(SecurityError::LinkEntry { .. })
    ));
}

#[tokio::test]
async fn unexpected_entry_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest_with_currency(10))
        .file("run-me.sh", b"#!/bin/sh")
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Security(SecurityError::UnexpectedEntry { .. })
    ));
}

#[tokio::test]
async fn duplicate_manifest_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest_with_currency(10))
        .file("./manifest.json", &manifest_with_currency(999))
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Security(SecurityError::DuplicateEntry { .. })
    ));
}

#[tokio::test]
async fn foreign_version_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, br#"{"formatVersion": 2, "currencyBalance": 10}"#)
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Format(FormatError::VersionMismatch {
            found: 2,
            supported: 1
        })
    ));
}

#[tokio::test]
async fn missing_manifest_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .dir("assets/")
        .file(&asset_name(), b"orphan")
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(err, PvError::Format(FormatError::MissingManifest)));
}

#[tokio::test]
async fn garbage_manifest_is_rejected() {
    let (data, engine) = seeded();
    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, b"{ not json")
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(err, PvError::Format(FormatError::Unparsable(_))));
}

#[tokio::test]
async fn non_archive_is_rejected() {
    let (data, engine) = seeded();
    let err = restore_rejected(&data, &engine, b"PK but not really".to_vec()).await;
    assert!(matches!(err, PvError::Format(FormatError::InvalidArchive(_))));
}

#[tokio::test]
async fn configured_limits_apply() {
    init_test_logging();
    let data = TestDataDir::new();
    let config = EngineConfig {
        limits: ArchiveLimits {
            max_entry_bytes: 16,
            ..ArchiveLimits::default()
        },
        ..data.config()
    };
    let engine = BackupEngine::open(&config).unwrap();
    seed_learner(engine.stores(), &data.outside());

    let archive = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest_with_currency(10))
        .file(&asset_name(), &[7u8; 4096])
        .finish();

    let err = restore_rejected(&data, &engine, archive).await;
    assert!(matches!(
        err,
        PvError::Security(SecurityError::EntryTooLarge { limit: 16, .. })
    ));
}
