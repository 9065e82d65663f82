//! Human-mode end-to-end tests.

use crate::common::assertions::assert_no_ansi;
use crate::common::cli::CliRunner;
use crate::common::fixtures::{TestDataDir, seed_learner};
use crate::common::init_test_logging;

#[test]
fn human_version_is_not_json() {
    init_test_logging();
    let cli = CliRunner::new();
    let result = cli.run(&["version"]);
    result
        .assert_success()
        .assert_stdout_matches(r"^pv \d+\.\d+\.\d+")
        .assert_stdout_contains("manifest format: 1");

    assert!(
        serde_json::from_str::<serde_json::Value>(result.stdout.trim()).is_err(),
        "Human mode output should not be JSON"
    );
}

#[test]
fn human_quick_start_lists_commands() {
    init_test_logging();
    let cli = CliRunner::new();
    cli.run(&[])
        .assert_success()
        .assert_stdout_contains("QUICK START")
        .assert_stdout_contains("pv backup")
        .assert_stdout_contains("pv restore");
}

#[test]
fn no_color_disables_ansi() {
    init_test_logging();
    let data = TestDataDir::new();
    let cli = CliRunner::new()
        .with_data_dir(&data.data_dir())
        .with_env("NO_COLOR", "1");
    let result = cli.run(&["status"]);
    result.assert_success().assert_stdout_contains("Last backup:");
    assert_no_ansi(&result.stdout);
}

#[test]
fn human_backup_and_restore_summaries() {
    init_test_logging();
    let data = TestDataDir::new();
    {
        let engine = data.engine();
        seed_learner(engine.stores(), &data.outside());
    }
    let cli = CliRunner::new().with_data_dir(&data.data_dir());

    let backup = cli.run(&["backup"]);
    backup
        .assert_success()
        .assert_stdout_contains("Backup written:")
        .assert_stdout_matches(r"backup-\d{8}-\d{6}\.zip")
        .assert_stdout_contains("currency:    40");

    let status = cli.run(&["status"]);
    status.assert_success().assert_stdout_not_contains("never");
    let archive = status
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| line.ends_with(".zip"))
        .expect("status lists the archive")
        .to_string();
    let archive = data.data_dir().join("backups").join(archive);

    cli.run(&["restore", archive.to_str().unwrap()])
        .assert_success()
        .assert_stdout_contains("0 added, 2 already present");
}

#[test]
fn human_error_includes_hint() {
    init_test_logging();
    let data = TestDataDir::new();
    let bogus = data.outside().join("notes.zip");
    std::fs::write(&bogus, b"shopping list").unwrap();

    let cli = CliRunner::new()
        .with_data_dir(&data.data_dir())
        .with_env("NO_COLOR", "1");
    cli.run(&["restore", bogus.to_str().unwrap()])
        .assert_failure()
        .assert_stderr_contains("Error: Invalid backup format")
        .assert_stderr_contains("Hint:");
}

#[test]
fn completions_name_the_binary() {
    init_test_logging();
    let cli = CliRunner::new();
    cli.run(&["completions", "bash"])
        .assert_success()
        .assert_stdout_contains("pv");
}
