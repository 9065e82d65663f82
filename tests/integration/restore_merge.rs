//! Restore semantics: progress is overwritten, vocabulary is merged.

use std::collections::BTreeSet;

use pv::snapshot::{AssetHandle, MANIFEST_ENTRY, Presence, Snapshot, VocabRecord, codec};
use pv::store::{PrefValue, PreferenceStore, RecordStore, keys};

use crate::common::assertions::list_files;
use crate::common::fixtures::{
    ArchiveBuilder, TestDataDir, add_vocab, currency, put_prefs, seed_learner, vocab_texts,
};
use crate::common::init_test_logging;

fn pref(engine: &pv::engine::BackupEngine, key: &str) -> Option<PrefValue> {
    engine.stores().prefs().unwrap().get(key).unwrap()
}

#[tokio::test]
async fn currency_is_overwritten_not_added() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    seed_learner(engine.stores(), &data.outside());
    put_prefs(engine.stores(), vec![(keys::CURRENCY_BALANCE, PrefValue::Int(10))]);

    let outcome = engine.create_backup().await.unwrap();
    put_prefs(engine.stores(), vec![(keys::CURRENCY_BALANCE, PrefValue::Int(40))]);

    let summary = engine.restore_backup(&outcome.archive.path).await.unwrap();
    assert_eq!(summary.currency_balance, 10);
    assert_eq!(currency(engine.stores()), Some(10));
}

#[tokio::test]
async fn ownership_is_replaced_wholesale() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    seed_learner(engine.stores(), &data.outside());
    let outcome = engine.create_backup().await.unwrap();

    let owned: BTreeSet<String> = ["theme_default", "theme_forest"]
        .into_iter()
        .map(String::from)
        .collect();
    put_prefs(
        engine.stores(),
        vec![
            (keys::OWNED_ITEMS, PrefValue::TextSet(owned)),
            ("price_override.theme_forest", PrefValue::Int(1)),
        ],
    );

    engine.restore_backup(&outcome.archive.path).await.unwrap();

    let owned = pref(&engine, keys::OWNED_ITEMS).unwrap();
    let owned = owned.as_text_set().unwrap();
    assert!(owned.contains("theme_ocean"));
    assert!(owned.contains("custom_rocket"));
    assert!(!owned.contains("theme_forest"));
    assert_eq!(pref(&engine, "price_override.theme_forest"), None);
    assert_eq!(
        pref(&engine, "price_override.theme_ocean"),
        Some(PrefValue::Int(5))
    );
}

#[tokio::test]
async fn vocabulary_merge_is_additive_and_idempotent() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    seed_learner(engine.stores(), &data.outside());
    let outcome = engine.create_backup().await.unwrap();

    add_vocab(engine.stores(), "dog", None);

    let first = engine.restore_backup(&outcome.archive.path).await.unwrap();
    assert_eq!(first.vocabulary_inserted, 0);
    assert_eq!(first.vocabulary_skipped, 2);

    let second = engine.restore_backup(&outcome.archive.path).await.unwrap();
    assert_eq!(second.vocabulary_inserted, 0);
    assert_eq!(vocab_texts(engine.stores()), vec!["cat", "big red bus", "dog"]);
    // Skipped records stage no images.
    assert_eq!(list_files(&engine.layout().vocab_assets_dir).len(), 0);
}

#[tokio::test]
async fn restore_into_other_install_assigns_fresh_ids() {
    init_test_logging();
    let source = TestDataDir::new();
    let engine = source.engine();
    seed_learner(engine.stores(), &source.outside());
    let outcome = engine.create_backup().await.unwrap();

    let target = TestDataDir::new();
    let other = target.engine();
    for word in ["sun", "moon", "star"] {
        add_vocab(other.stores(), word, None);
    }
    other.restore_backup(&outcome.archive.path).await.unwrap();

    let records = other.stores().records().unwrap().list_user_records().unwrap();
    let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, ["sun", "moon", "star", "cat", "big red bus"]);
    let ids: BTreeSet<_> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), records.len());
}

#[tokio::test]
async fn unset_effect_clears_live_effect() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    let outcome = engine.create_backup().await.unwrap();

    put_prefs(
        engine.stores(),
        vec![(keys::EQUIPPED_EFFECT, PrefValue::Text("rain".into()))],
    );
    engine.restore_backup(&outcome.archive.path).await.unwrap();
    assert_eq!(pref(&engine, keys::EQUIPPED_EFFECT), None);
}

#[tokio::test]
async fn absent_effect_leaves_live_effect() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();
    put_prefs(
        engine.stores(),
        vec![(keys::EQUIPPED_EFFECT, PrefValue::Text("rain".into()))],
    );

    let mut snapshot = Snapshot::new();
    snapshot.equipped_effect = Presence::Absent;
    let manifest = codec::encode(&snapshot).unwrap();
    assert!(!String::from_utf8_lossy(&manifest).contains("equippedEffect"));

    let path = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &manifest)
        .write_to(&data.outside().join("older.zip"));
    engine.restore_backup(&path).await.unwrap();

    assert_eq!(
        pref(&engine, keys::EQUIPPED_EFFECT),
        Some(PrefValue::Text("rain".into()))
    );
}

#[tokio::test]
async fn asset_missing_from_archive_is_tolerated() {
    init_test_logging();
    let data = TestDataDir::new();
    let engine = data.engine();

    let mut snapshot = Snapshot::new();
    snapshot.vocabulary_records.push(VocabRecord {
        source_id: 7,
        text: "kite".into(),
        syllables: vec!["kite".into()],
        image_asset: Some(AssetHandle::mint()),
        audio_uri: None,
        category: Some("toys".into()),
    });
    let path = ArchiveBuilder::new()
        .file(MANIFEST_ENTRY, &codec::encode(&snapshot).unwrap())
        .write_to(&data.outside().join("partial-assets.zip"));

    let summary = engine.restore_backup(&path).await.unwrap();
    assert_eq!(summary.missing_assets, 1);
    assert_eq!(summary.vocabulary_inserted, 1);

    let records = engine.stores().records().unwrap().list_user_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text, "kite");
    assert_eq!(records[0].category.as_deref(), Some("toys"));
    assert!(records[0].image_path.is_none());
}
