//! Robot-mode end-to-end tests.

use serde_json::Value;

use crate::common::assertions::assert_json_has_fields;
use crate::common::cli::CliRunner;
use crate::common::fixtures::{ArchiveBuilder, TestDataDir, currency, seed_learner};
use crate::common::init_test_logging;

#[test]
fn robot_quick_start_outputs_json() {
    init_test_logging();
    let cli = CliRunner::new();
    let result = cli.run(&["--robot"]);
    result.assert_success();

    let json = result.json();
    assert_eq!(json.get("tool").and_then(Value::as_str), Some("pv"));
    assert!(json.get("commands").is_some());
    assert!(json.get("restore_semantics").is_some());
    assert!(json.get("output_modes").is_some());
}

#[test]
fn robot_version_reports_manifest_format() {
    init_test_logging();
    let cli = CliRunner::new();
    let result = cli.run(&["version", "--format=json"]);
    result.assert_success();

    let json = assert_json_has_fields(result.stdout.trim(), &["version", "git_sha", "target"]);
    assert_eq!(json["manifest_format_version"], 1);
}

#[test]
fn robot_status_on_fresh_data_dir() {
    init_test_logging();
    let data = TestDataDir::new();
    let cli = CliRunner::new().with_data_dir(&data.data_dir());
    let result = cli.run_robot(&["status"]);
    result
        .assert_success()
        .assert_json_field("/last_backup_at", &Value::Null)
        .assert_json_field("/running", &Value::Null)
        .assert_json_field("/live/vocabulary_count", &Value::from(0))
        .assert_json_array_len("/backups", 0);
}

#[test]
fn robot_backup_restore_cycle() {
    init_test_logging();
    let data = TestDataDir::new();
    {
        let engine = data.engine();
        seed_learner(engine.stores(), &data.outside());
    }
    let cli = CliRunner::new().with_data_dir(&data.data_dir());

    let backup = cli.run_robot(&["backup"]);
    backup
        .assert_success()
        .assert_json_field("/summary/currency_balance", &Value::from(40))
        .assert_json_field("/summary/vocabulary_count", &Value::from(2))
        .assert_json_field("/archive/assets_written", &Value::from(2));
    let archive = backup.json()["archive"]["path"]
        .as_str()
        .expect("archive path")
        .to_string();

    cli.run_robot(&["status"])
        .assert_success()
        .assert_json_field("/live/currency_balance", &Value::from(40))
        .assert_json_array_len("/backups", 1);

    let inspect = cli.run_robot(&["inspect", &archive]);
    inspect
        .assert_success()
        .assert_json_field("/summary/custom_item_count", &Value::from(1))
        .assert_json_field("/missing_assets", &Value::from(0));

    let restore = cli.run_robot(&["restore", &archive]);
    restore
        .assert_success()
        .assert_json_field("/currency_balance", &Value::from(40))
        .assert_json_field("/vocabulary_inserted", &Value::from(0))
        .assert_json_field("/vocabulary_skipped", &Value::from(2));

    let engine = data.engine();
    assert_eq!(currency(engine.stores()), Some(40));
}

#[test]
fn robot_backup_to_explicit_directory() {
    init_test_logging();
    let data = TestDataDir::new();
    let out = data.outside().join("usb");
    let cli = CliRunner::new().with_data_dir(&data.data_dir());

    let result = cli.run(&["backup", "--out", out.to_str().unwrap(), "--format", "json-compact"]);
    result.assert_success();
    assert_eq!(result.stdout.trim().lines().count(), 1);

    let path = result.json()["archive"]["path"].as_str().unwrap().to_string();
    assert!(path.starts_with(out.to_str().unwrap()), "{path}");
    assert!(std::path::Path::new(&path).is_file());
}

#[test]
fn robot_hostile_archive_reports_security_error() {
    init_test_logging();
    let data = TestDataDir::new();
    let archive = ArchiveBuilder::new()
        .file("manifest.json", br#"{"formatVersion": 1}"#)
        .file("../../escaped.txt", b"evil")
        .write_to(&data.outside().join("hostile.zip"));

    let cli = CliRunner::new().with_data_dir(&data.data_dir());
    let result = cli.run_robot(&["restore", archive.to_str().unwrap()]);
    result.assert_failure().assert_exit_code(1).assert_stdout_is_empty();

    let json = result.error_json();
    assert_eq!(json.get("kind").and_then(Value::as_str), Some("security"));
    assert_eq!(json.get("recoverable").and_then(Value::as_bool), Some(true));
    assert!(json.get("suggestion").and_then(Value::as_str).is_some());
}

#[test]
fn robot_version_mismatch_is_a_format_error() {
    init_test_logging();
    let data = TestDataDir::new();
    let archive = ArchiveBuilder::new()
        .file("manifest.json", br#"{"formatVersion": 99}"#)
        .write_to(&data.outside().join("future.zip"));

    let cli = CliRunner::new().with_data_dir(&data.data_dir());
    let result = cli.run_robot(&["inspect", archive.to_str().unwrap()]);
    result.assert_failure();

    let json = result.error_json();
    assert_eq!(json["kind"], "format");
    assert!(json["message"].as_str().unwrap().contains("formatVersion 99"));
}

#[test]
fn robot_missing_archive_is_an_io_error() {
    init_test_logging();
    let data = TestDataDir::new();
    let cli = CliRunner::new().with_data_dir(&data.data_dir());
    let missing = data.outside().join("nope.zip");
    let result = cli.run_robot(&["restore", missing.to_str().unwrap()]);
    result.assert_failure();

    let json = result.error_json();
    assert_eq!(json["kind"], "io");
    assert_eq!(json["recoverable"], false);
}

#[test]
fn robot_cleanup_reports_removed_count() {
    init_test_logging();
    let data = TestDataDir::new();
    let cli = CliRunner::new().with_data_dir(&data.data_dir());
    cli.run_robot(&["cleanup"])
        .assert_success()
        .assert_json_field("/removed", &Value::from(0))
        .assert_json_field("/ok", &Value::Bool(true));
}
