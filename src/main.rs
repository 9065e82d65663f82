//! Progress Vault CLI - snapshot backup and restore of learner progress.
//!
//! Provides both human-friendly and agent-friendly (robot mode) interfaces.
#![forbid(unsafe_code)]

use std::io::{self, IsTerminal};
use std::path::Path;

use clap::Parser;
use console::style;
use serde::Serialize;

use pv::cli::{self, Cli, Commands};
use pv::config::{EngineConfig, resolve_path};
use pv::engine::BackupEngine;
use pv::error::{PvError, Result};
use pv::logging::init_logging;

/// Build information embedded at compile time.
mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    pub fn git_sha() -> &'static str {
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    }

    pub fn git_dirty() -> &'static str {
        option_env!("VERGEN_GIT_DIRTY").unwrap_or("false")
    }

    pub fn build_timestamp() -> &'static str {
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    }

    pub fn rustc_semver() -> &'static str {
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown")
    }

    pub fn target() -> &'static str {
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Handle no-color flag or non-TTY
    if cli.no_color || !io::stdout().is_terminal() {
        console::set_colors_enabled(false);
    }
    if cli.no_color || !io::stderr().is_terminal() {
        console::set_colors_enabled_stderr(false);
    }

    init_logging(cli.use_json(), cli.verbose, cli.quiet);

    if let Err(e) = run(&cli).await {
        output_error(&cli, &e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        None => print_quick_start(cli),
        Some(Commands::Backup(args)) => cmd_backup(cli, args).await,
        Some(Commands::Restore(args)) => cmd_restore(cli, args).await,
        Some(Commands::Inspect(args)) => cmd_inspect(cli, args).await,
        Some(Commands::Status) => cmd_status(cli),
        Some(Commands::Cleanup) => cmd_cleanup(cli),
        Some(Commands::Version) => cmd_version(cli),
        Some(Commands::Completions(args)) => cmd_completions(cli, args),
    }
}

/// Loads the engine config and applies command-line overrides.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        let cwd = std::env::current_dir()?;
        config.data_dir = Some(resolve_path(dir, &cwd)?);
    }
    Ok(config)
}

fn open_engine(cli: &Cli) -> Result<BackupEngine> {
    BackupEngine::open(&load_config(cli)?)
}

// === Quick Start (Robot Mode Optimized) ===

/// Prints quick-start help optimized for both humans and AI agents.
#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn print_quick_start(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(cli, &robot_quick_start());
    } else {
        print_human_quick_start();
    }
    Ok(())
}

fn robot_quick_start() -> RobotQuickStart {
    RobotQuickStart {
        tool: "pv",
        version: build_info::VERSION,
        description: "Snapshot backup and restore of learner progress, vocabulary and images",
        commands: RobotCommands {
            backup: "pv backup --robot [--out DIR]",
            restore: "pv restore <ARCHIVE> --robot",
            inspect: "pv inspect <ARCHIVE> --robot",
            status: "pv status --robot",
            cleanup: "pv cleanup --robot",
        },
        restore_semantics: RestoreSemantics {
            progress: "currency, items, stickers, theme and catalog are overwritten by the backup",
            vocabulary: "records are added; text already present is skipped",
            safety: "archives are validated in full before anything is extracted or changed",
        },
        output_modes: OutputModes {
            human: "--format=text (default)",
            robot: "--robot or --format=json",
            compact: "--format=json-compact",
        },
        data_dir: "--data-dir <DIR> or PV_DATA_DIR",
    }
}

fn print_human_quick_start() {
    println!(
        "{} {} - progress backup & restore\n",
        style("pv").bold().cyan(),
        build_info::VERSION
    );

    println!("{}", style("QUICK START").bold().underlined());
    println!();
    println!("  {}  Back up current progress", style("pv backup").green());
    println!(
        "  {}  Restore a backup",
        style("pv restore backup-20260118-093012.zip").green()
    );
    println!(
        "  {}  Check an archive without restoring",
        style("pv inspect <ARCHIVE>").green()
    );
    println!("  {}  Show last backup and archives", style("pv status").green());
    println!();

    println!("{}", style("ROBOT MODE (for AI agents)").bold().underlined());
    println!();
    println!("  {}  JSON output", style("pv --robot <command>").cyan());
    println!("  {}  Quick-start JSON", style("pv --robot").cyan());
    println!();

    println!("Run {} for full help", style("pv --help").yellow());
}

// === Robot Mode JSON Structures ===

#[derive(Serialize)]
struct RobotQuickStart {
    tool: &'static str,
    version: &'static str,
    description: &'static str,
    commands: RobotCommands,
    restore_semantics: RestoreSemantics,
    output_modes: OutputModes,
    data_dir: &'static str,
}

#[derive(Serialize)]
struct RobotCommands {
    backup: &'static str,
    restore: &'static str,
    inspect: &'static str,
    status: &'static str,
    cleanup: &'static str,
}

#[derive(Serialize)]
struct RestoreSemantics {
    progress: &'static str,
    vocabulary: &'static str,
    safety: &'static str,
}

#[derive(Serialize)]
struct OutputModes {
    human: &'static str,
    robot: &'static str,
    compact: &'static str,
}

// === Command Implementations ===

async fn cmd_backup(cli: &Cli, args: &cli::BackupArgs) -> Result<()> {
    let engine = open_engine(cli)?;
    let outcome = match &args.out {
        Some(dir) => engine.create_backup_in(dir.clone()).await?,
        None => engine.create_backup().await?,
    };

    if cli.use_json() {
        output_json(cli, &outcome);
    } else if !cli.quiet {
        let summary = &outcome.summary;
        println!(
            "{} {}",
            style("Backup written:").green().bold(),
            outcome.archive.path.display()
        );
        println!("  size:        {}", format_bytes(outcome.archive.size_bytes));
        println!("  sha256:      {}", outcome.archive.sha256);
        println!("  currency:    {}", summary.currency_balance);
        println!("  stickers:    {} ({} placed)", summary.sticker_total, summary.placement_count);
        println!("  vocabulary:  {}", summary.vocabulary_count);
        println!("  custom items: {}", summary.custom_item_count);
        println!("  images:      {}", outcome.archive.assets_written);
        if outcome.archive.assets_missing > 0 {
            println!(
                "  {} {} image(s) no longer exist and were left out",
                style("note:").yellow(),
                outcome.archive.assets_missing
            );
        }
    }
    Ok(())
}

async fn cmd_restore(cli: &Cli, args: &cli::RestoreArgs) -> Result<()> {
    ensure_archive_exists(&args.archive)?;
    let engine = open_engine(cli)?;
    let summary = engine.restore_backup(&args.archive).await?;

    if cli.use_json() {
        output_json(cli, &summary);
    } else if !cli.quiet {
        println!(
            "{} {}",
            style("Restored backup from").green().bold(),
            summary.backup_created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("  currency:    {}", summary.currency_balance);
        println!("  stickers:    {} ({} placed)", summary.sticker_total, summary.placement_count);
        println!(
            "  vocabulary:  {} added, {} already present",
            summary.vocabulary_inserted, summary.vocabulary_skipped
        );
        println!("  custom items: {}", summary.custom_item_count);
        if summary.missing_assets > 0 {
            println!(
                "  {} {} image(s) were missing from the archive",
                style("note:").yellow(),
                summary.missing_assets
            );
        }
    }
    Ok(())
}

async fn cmd_inspect(cli: &Cli, args: &cli::InspectArgs) -> Result<()> {
    ensure_archive_exists(&args.archive)?;
    let engine = open_engine(cli)?;
    let report = engine.inspect(&args.archive).await?;

    if cli.use_json() {
        output_json(cli, &report);
    } else {
        let summary = &report.summary;
        println!("{} {}", style("Archive:").bold(), report.path.display());
        println!(
            "  created:     {}",
            summary.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("  currency:    {}", summary.currency_balance);
        println!("  owned items: {}", summary.owned_item_count);
        println!("  stickers:    {} ({} placed)", summary.sticker_total, summary.placement_count);
        println!("  vocabulary:  {}", summary.vocabulary_count);
        println!("  custom items: {}", summary.custom_item_count);
        println!(
            "  images:      {} ({} missing)",
            summary.asset_count, report.missing_assets
        );
        println!("  unpacked:    {}", format_bytes(report.extracted_bytes));
    }
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let engine = open_engine(cli)?;
    let status = engine.status()?;

    if cli.use_json() {
        output_json(cli, &status);
    } else {
        println!("{} {}", style("Data:").bold(), status.data_dir.display());
        println!("{} {}", style("Backups:").bold(), status.backup_dir.display());
        println!(
            "Currency: {}   Vocabulary: {}",
            status.live.currency_balance, status.live.vocabulary_count
        );
        match status.state.last_backup_at {
            Some(at) => println!("Last backup: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("Last backup: {}", style("never").dim()),
        }
        if status.backups.is_empty() {
            println!("No backup archives found");
        } else {
            println!();
            for path in &status.backups {
                let name = path.file_name().map_or_else(
                    || path.display().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                );
                println!("  {name}");
            }
        }
    }
    Ok(())
}

fn cmd_cleanup(cli: &Cli) -> Result<()> {
    // Opening already sweeps; a second pass reports what is left.
    let engine = open_engine(cli)?;
    let removed = engine.sweep_orphaned_scratch()?;

    if cli.use_json() {
        output_json(cli, &serde_json::json!({ "removed": removed, "ok": true }));
    } else if !cli.quiet {
        println!("Removed {removed} leftover item(s)");
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_version(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "version": build_info::VERSION,
                "git_sha": build_info::git_sha(),
                "git_dirty": build_info::git_dirty() == "true",
                "build_timestamp": build_info::build_timestamp(),
                "rustc_version": build_info::rustc_semver(),
                "target": build_info::target(),
                "manifest_format_version": pv::snapshot::FORMAT_VERSION,
            }),
        );
    } else {
        println!("pv {}", build_info::VERSION);
        println!(
            "git: {}{}",
            build_info::git_sha(),
            if build_info::git_dirty() == "true" {
                " (dirty)"
            } else {
                ""
            }
        );
        println!("built: {}", build_info::build_timestamp());
        println!("rustc: {}", build_info::rustc_semver());
        println!("target: {}", build_info::target());
        println!("manifest format: {}", pv::snapshot::FORMAT_VERSION);
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_completions(_cli: &Cli, args: &cli::CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    clap_complete::generate(args.shell, &mut Cli::command(), "pv", &mut io::stdout());
    Ok(())
}

// === Utility Functions ===

fn ensure_archive_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PvError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("archive not found: {}", path.display()),
        )))
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn output_json<T: Serialize>(cli: &Cli, data: &T) {
    let json = if cli.use_compact_json() {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    match json {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to encode output: {e}"),
    }
}

fn output_error(cli: &Cli, error: &PvError) {
    if cli.use_json() {
        let json = serde_json::json!({
            "error": true,
            "kind": error.kind(),
            "message": error.to_string(),
            "suggestion": error.suggestion(),
            "recoverable": error.is_user_recoverable(),
        });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| error.to_string())
        );
    } else {
        eprintln!("{}: {}", style("Error").red().bold(), error);
        if let Some(suggestion) = error.suggestion() {
            eprintln!("{}: {}", style("Hint").yellow(), suggestion);
        }
    }
}
