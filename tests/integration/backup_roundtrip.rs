//! Backup then restore through the engine with file-backed stores.

use std::fs::File;
use std::io::Read;

use pv::snapshot::{MANIFEST_ENTRY, StoredCatalogItem, codec};
use pv::store::{PrefValue, PreferenceStore, RecordStore, keys};
use zip::ZipArchive;

use crate::common::assertions::{assert_dir_empty, list_files};
use crate::common::fixtures::{TestDataDir, currency, seed_learner, vocab_texts};
use crate::common::init_test_logging;

#[tokio::test]
async fn backup_and_restore_into_fresh_data_dir() {
    init_test_logging();
    let source = TestDataDir::new();
    let engine = source.engine();
    let seeded = seed_learner(engine.stores(), &source.outside());

    let outcome = engine.create_backup().await.unwrap();
    assert_eq!(outcome.summary.currency_balance, 40);
    assert_eq!(outcome.summary.vocabulary_count, 2);
    assert_eq!(outcome.summary.custom_item_count, 1);
    assert_eq!(outcome.summary.asset_count, 2);
    assert_eq!(outcome.summary.sticker_total, 4);
    assert_eq!(outcome.archive.assets_written, 2);
    assert_eq!(outcome.archive.assets_missing, 0);
    assert_eq!(outcome.archive.sha256.len(), 64);

    let name = outcome.archive.path.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("backup-") && name.ends_with(".zip"), "{name}");
    assert_eq!(list_files(&engine.layout().backup_dir), vec![name.to_string()]);

    let target = TestDataDir::new();
    let restored_engine = target.engine();
    let summary = restored_engine
        .restore_backup(&outcome.archive.path)
        .await
        .unwrap();
    assert_eq!(summary.currency_balance, 40);
    assert_eq!(summary.vocabulary_inserted, 2);
    assert_eq!(summary.vocabulary_skipped, 0);
    assert_eq!(summary.missing_assets, 0);

    let stores = restored_engine.stores();
    let layout = restored_engine.layout();
    assert_eq!(currency(stores), Some(seeded.currency));
    assert_eq!(vocab_texts(stores), seeded.vocab_texts);

    let records = stores.records().unwrap().list_user_records().unwrap();
    let cat_image = records[0].image_path.as_ref().expect("cat keeps its image");
    assert!(cat_image.starts_with(&layout.vocab_assets_dir));
    assert_eq!(
        std::fs::read(cat_image).unwrap(),
        std::fs::read(&seeded.vocab_image).unwrap()
    );
    assert!(records[1].image_path.is_none());

    let prefs = stores.prefs().unwrap().entries().unwrap();
    let custom: Vec<StoredCatalogItem> =
        serde_json::from_str(prefs[keys::CUSTOM_CATALOG_ITEMS].as_text().unwrap()).unwrap();
    let rocket = custom[0].image_path.as_ref().expect("custom item keeps its image");
    assert!(rocket.starts_with(&layout.catalog_assets_dir));
    assert_eq!(rocket.extension().unwrap(), "png");
    assert_eq!(
        std::fs::read(rocket).unwrap(),
        std::fs::read(&seeded.custom_image).unwrap()
    );

    assert_eq!(
        prefs[keys::EQUIPPED_THEME],
        PrefValue::Text("theme_ocean".into())
    );
    assert_eq!(prefs[keys::EQUIPPED_EFFECT], PrefValue::Text("snow".into()));
    assert_eq!(prefs["price_override.theme_ocean"], PrefValue::Int(5));
    assert_eq!(prefs[keys::LAST_DAILY_REWARD_DAY], PrefValue::Int(20_300));

    assert_dir_empty(&layout.scratch_dir);
}

#[tokio::test]
async fn archive_layout_carries_no_live_paths() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    let outside = data.outside();
    seed_learner(engine.stores(), &outside);

    let outcome = engine.create_backup().await.unwrap();
    let mut archive = ZipArchive::new(File::open(&outcome.archive.path).unwrap()).unwrap();

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    assert!(names.contains(&MANIFEST_ENTRY.to_string()));
    assert_eq!(
        names.iter().filter(|n| n.starts_with("assets/")).count(),
        2,
        "{names:?}"
    );

    let mut manifest = Vec::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .unwrap()
        .read_to_end(&mut manifest)
        .unwrap();
    let text = String::from_utf8(manifest.clone()).unwrap();
    assert!(!text.contains(&*outside.to_string_lossy()));
    assert!(text.contains("\"formatVersion\": 1"));

    let snapshot = codec::decode(&manifest).unwrap();
    assert_eq!(snapshot.vocabulary_records.len(), 2);
    assert_eq!(snapshot.asset_handles().len(), 2);
}

#[tokio::test]
async fn backup_of_empty_state_restores_cleanly() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();

    let outcome = engine.create_backup().await.unwrap();
    assert_eq!(outcome.summary.currency_balance, 0);
    assert_eq!(outcome.summary.owned_item_count, 1);
    assert_eq!(outcome.summary.vocabulary_count, 0);
    assert_eq!(outcome.archive.assets_written, 0);

    let report = engine.inspect(&outcome.archive.path).await.unwrap();
    assert_eq!(report.summary, outcome.summary);
    assert_eq!(report.missing_assets, 0);

    let summary = engine.restore_backup(&outcome.archive.path).await.unwrap();
    assert_eq!(summary.vocabulary_inserted, 0);
    assert_eq!(currency(engine.stores()), Some(0));
}

#[tokio::test]
async fn deleted_asset_is_omitted_and_tolerated() {
    init_test_logging();
    let source = TestDataDir::new();
    let engine = source.engine();
    let seeded = seed_learner(engine.stores(), &source.outside());
    std::fs::remove_file(&seeded.vocab_image).unwrap();

    let outcome = engine.create_backup().await.unwrap();
    assert_eq!(outcome.archive.assets_written, 1);
    assert_eq!(outcome.archive.assets_missing, 1);

    let target = TestDataDir::new();
    let restored_engine = target.engine();
    let report = restored_engine.inspect(&outcome.archive.path).await.unwrap();
    assert_eq!(report.missing_assets, 1);

    let summary = restored_engine
        .restore_backup(&outcome.archive.path)
        .await
        .unwrap();
    assert_eq!(summary.missing_assets, 1);
    assert_eq!(summary.vocabulary_inserted, 2);

    let records = restored_engine
        .stores()
        .records()
        .unwrap()
        .list_user_records()
        .unwrap();
    let cat = records.iter().find(|r| r.text == "cat").unwrap();
    assert!(cat.image_path.is_none());
}

#[tokio::test]
async fn inspect_leaves_live_state_untouched() {
    init_test_logging();
    let source = TestDataDir::new();
    let engine = source.engine();
    seed_learner(engine.stores(), &source.outside());
    let outcome = engine.create_backup().await.unwrap();

    let target = TestDataDir::new();
    let other = target.engine();
    let report = other.inspect(&outcome.archive.path).await.unwrap();

    assert_eq!(report.path, outcome.archive.path);
    assert_eq!(report.summary.currency_balance, 40);
    assert!(report.extracted_bytes > 0);
    assert_eq!(currency(other.stores()), None);
    assert!(vocab_texts(other.stores()).is_empty());
    assert!(list_files(&other.layout().vocab_assets_dir).is_empty());
    assert_dir_empty(&other.layout().scratch_dir);
}
