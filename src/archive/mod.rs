//! Backup archive container.
//!
//! An archive is a ZIP file holding exactly one `manifest.json` at the root
//! and zero or more `assets/<handle>.<ext>` entries. The writer produces that
//! layout deterministically; the reader treats every archive as hostile and
//! refuses anything else.

mod reader;
mod writer;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use reader::{ArchiveReader, ExtractedArchive};
pub use writer::ArchiveWriter;

use crate::snapshot::{AssetHandle, is_valid_extension};

/// Directory holding asset entries.
pub const ASSETS_DIR: &str = "assets";

/// Extension of finished archives.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Suffix of an archive still being written.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Where a finished archive landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLocator {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 of the archive bytes.
    pub sha256: String,
    pub assets_written: usize,
    /// Assets referenced by the manifest whose live file was gone.
    pub assets_missing: usize,
}

/// Entry name of an asset.
pub fn asset_entry_name(handle: &AssetHandle, extension: &str) -> String {
    format!("{ASSETS_DIR}/{handle}.{extension}")
}

/// Splits an asset file name (`<handle>.<ext>`) into its parts.
pub fn parse_asset_file_name(file_name: &str) -> Option<(AssetHandle, &str)> {
    let (stem, extension) = file_name.split_once('.')?;
    let handle = AssetHandle::parse(stem).ok()?;
    is_valid_extension(extension).then_some((handle, extension))
}

/// File name for an archive created at `created_at`.
pub fn archive_file_name(created_at: DateTime<Utc>) -> String {
    format!(
        "backup-{}.{ARCHIVE_EXTENSION}",
        created_at.format("%Y%m%d-%H%M%S")
    )
}

/// First unused archive path in `dir` for `created_at`.
pub fn unique_archive_path(dir: &Path, created_at: DateTime<Utc>) -> PathBuf {
    let base = archive_file_name(created_at);
    let candidate = dir.join(&base);
    if !candidate.exists() {
        return candidate;
    }
    let stem = base.trim_end_matches(&format!(".{ARCHIVE_EXTENSION}"));
    (1..)
        .map(|n| dir.join(format!("{stem}-{n}.{ARCHIVE_EXTENSION}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
