//! CLI argument definitions and command dispatch.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Progress Vault - back up and restore learner progress, vocabulary and images.
///
/// Robot Mode: Use --robot or --json for machine-parseable output optimized for AI agents.
#[derive(Parser, Debug)]
#[command(name = "pv", version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)] // CLI flags naturally use multiple bools
pub struct Cli {
    /// Output format (text for humans, json for agents/scripts)
    #[arg(
        long,
        short = 'f',
        default_value = "text",
        global = true,
        env = "PV_FORMAT"
    )]
    pub format: OutputFormat,

    /// Robot mode: equivalent to --format=json (optimized for AI agents)
    #[arg(long, global = true)]
    pub robot: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Path to the engine config file
    #[arg(long, short = 'c', global = true, env = "PV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root of the live application data (overrides the config file)
    #[arg(long, global = true, env = "PV_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with optional color
    #[default]
    Text,
    /// JSON output for scripts and agents
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

impl Cli {
    /// Returns true if output should be JSON (robot mode or explicit --format=json).
    pub const fn use_json(&self) -> bool {
        self.robot || matches!(self.format, OutputFormat::Json | OutputFormat::JsonCompact)
    }

    /// Returns true if output should be compact JSON.
    pub const fn use_compact_json(&self) -> bool {
        matches!(self.format, OutputFormat::JsonCompact)
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    // === Backup & Restore ===
    /// Write the current progress to a new backup archive
    Backup(BackupArgs),

    /// Merge a backup archive into the current progress
    Restore(RestoreArgs),

    /// Validate a backup archive and summarize its contents
    Inspect(InspectArgs),

    // === Maintenance ===
    /// Show engine status and existing backups
    Status,

    /// Remove scratch data left by interrupted runs
    Cleanup,

    // === Utilities ===
    /// Show version and build information
    Version,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// === Argument Structs ===

#[derive(Parser, Debug)]
pub struct BackupArgs {
    /// Directory to write the archive into (defaults to the backup directory)
    #[arg(long, short = 'o', value_name = "DIR")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct RestoreArgs {
    /// Backup archive to restore
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Backup archive to inspect
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
