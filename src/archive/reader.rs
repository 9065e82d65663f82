//! Archive reader.
//!
//! Archives are untrusted input. Reading happens in two passes: the central
//! directory is validated in full before a single byte is extracted, and
//! extraction then re-checks every destination against the scratch root and
//! enforces the size limits on the bytes actually inflated.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use zip::ZipArchive;

use super::{ASSETS_DIR, parse_asset_file_name};
use crate::config::ArchiveLimits;
use crate::error::{FormatError, PvError, Result, SecurityError};
use crate::snapshot::{AssetHandle, AssetResolver, MANIFEST_ENTRY};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// The validated contents of an archive, extracted into a scratch directory.
#[derive(Debug)]
pub struct ExtractedArchive {
    pub root: PathBuf,
    /// Raw manifest bytes, not yet decoded.
    pub manifest: Vec<u8>,
    pub assets: BTreeMap<AssetHandle, PathBuf>,
    /// Uncompressed bytes extracted, manifest included.
    pub total_bytes: u64,
}

impl AssetResolver for ExtractedArchive {
    fn resolve(&self, handle: &AssetHandle) -> Option<&Path> {
        self.assets.get(handle).map(PathBuf::as_path)
    }
}

/// What a legal entry is.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryKind {
    Manifest,
    AssetsDir,
    Asset {
        handle: AssetHandle,
        file_name: String,
    },
}

/// Reads archives under a fixed set of limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveReader {
    limits: ArchiveLimits,
}

impl ArchiveReader {
    pub const fn new(limits: ArchiveLimits) -> Self {
        Self { limits }
    }

    /// Validates the archive at `source` and extracts it under `scratch`,
    /// which must be an existing, empty directory owned by the caller.
    #[instrument(skip_all, fields(source = %source.display()))]
    pub fn open_and_validate(&self, source: &Path, scratch: &Path) -> Result<ExtractedArchive> {
        let file = File::open(source)?;
        self.extract(file, scratch)
    }

    /// Like [`Self::open_and_validate`] for any seekable reader.
    pub fn extract<R: Read + Seek>(&self, reader: R, scratch: &Path) -> Result<ExtractedArchive> {
        let mut archive = ZipArchive::new(reader)?;

        let kinds = self.validate_entries(&mut archive)?;
        let root = scratch.canonicalize()?;

        let mut manifest = None;
        let mut assets = BTreeMap::new();
        let mut total_bytes = 0u64;

        for (index, kind) in kinds.into_iter().enumerate() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            let written = match kind {
                EntryKind::AssetsDir => 0,
                EntryKind::Manifest => {
                    let mut bytes = Vec::new();
                    let n = copy_limited(&mut entry, &mut bytes, self.limits.max_manifest_bytes, &name)?;
                    manifest = Some(bytes);
                    n
                }
                EntryKind::Asset { handle, file_name } => {
                    let dest = safe_destination(&root, &Path::new(ASSETS_DIR).join(&file_name), &name)?;
                    let mut out = OpenOptions::new().write(true).create_new(true).open(&dest)?;
                    let n = copy_limited(&mut entry, &mut out, self.limits.max_entry_bytes, &name)?;
                    out.flush()?;
                    assets.insert(handle, dest);
                    n
                }
            };
            total_bytes += written;
            if total_bytes > self.limits.max_total_bytes {
                return Err(SecurityError::ArchiveTooLarge {
                    limit: self.limits.max_total_bytes,
                }
                .into());
            }
        }

        let manifest = manifest.ok_or(FormatError::MissingManifest)?;
        info!(
            assets = assets.len(),
            total_bytes,
            root = %root.display(),
            "Archive extracted"
        );
        Ok(ExtractedArchive {
            root,
            manifest,
            assets,
            total_bytes,
        })
    }

    /// First pass: classifies every entry from the central directory and
    /// rejects the archive on the first structural violation.
    fn validate_entries<R: Read + Seek>(&self, archive: &mut ZipArchive<R>) -> Result<Vec<EntryKind>> {
        let count = archive.len();
        if count > self.limits.max_entries {
            return Err(SecurityError::TooManyEntries {
                count,
                limit: self.limits.max_entries,
            }
            .into());
        }

        let mut kinds = Vec::with_capacity(count);
        let mut seen_names = HashSet::new();
        let mut seen_handles = HashSet::new();
        let mut declared_total = 0u64;
        let mut has_manifest = false;

        for index in 0..count {
            let entry = archive.by_index_raw(index)?;
            let name = entry.name().to_string();

            if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
                warn!(entry = %name, "Rejecting link entry");
                return Err(SecurityError::LinkEntry { entry: name }.into());
            }

            let (normalized, kind) = classify_entry(&name, entry.is_dir())?;
            if !seen_names.insert(normalized) {
                return Err(SecurityError::DuplicateEntry { entry: name }.into());
            }

            let limit = match &kind {
                EntryKind::Manifest => {
                    has_manifest = true;
                    self.limits.max_manifest_bytes
                }
                EntryKind::AssetsDir => 0,
                EntryKind::Asset { handle, .. } => {
                    if !seen_handles.insert(handle.clone()) {
                        return Err(SecurityError::DuplicateEntry { entry: name }.into());
                    }
                    self.limits.max_entry_bytes
                }
            };
            if entry.size() > limit && kind != EntryKind::AssetsDir {
                return Err(SecurityError::EntryTooLarge { entry: name, limit }.into());
            }
            declared_total = declared_total.saturating_add(entry.size());
            if declared_total > self.limits.max_total_bytes {
                return Err(SecurityError::ArchiveTooLarge {
                    limit: self.limits.max_total_bytes,
                }
                .into());
            }
            kinds.push(kind);
        }

        if !has_manifest {
            return Err(FormatError::MissingManifest.into());
        }
        debug!(entries = count, "Archive structure validated");
        Ok(kinds)
    }
}

/// Classifies one entry name, returning it in normalized form.
fn classify_entry(raw: &str, is_dir: bool) -> std::result::Result<(String, EntryKind), SecurityError> {
    let entry = || raw.to_string();
    let name = raw.replace('\\', "/");

    let mut parts = Vec::new();
    for component in Path::new(&name).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(SecurityError::AbsolutePath { entry: entry() });
            }
            Component::ParentDir => return Err(SecurityError::Traversal { entry: entry() }),
            Component::CurDir => {}
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| SecurityError::UnexpectedEntry { entry: entry() })?;
                parts.push(part);
            }
        }
    }

    // Drive-qualified names are not a `Prefix` on every platform.
    if parts.first().is_some_and(|p| is_drive_letter(p)) {
        return Err(SecurityError::AbsolutePath { entry: entry() });
    }

    let kind = match parts.as_slice() {
        [only] if *only == MANIFEST_ENTRY && !is_dir => EntryKind::Manifest,
        [only] if *only == ASSETS_DIR && is_dir => EntryKind::AssetsDir,
        [dir, file] if *dir == ASSETS_DIR && !is_dir => {
            let (handle, _) = parse_asset_file_name(file)
                .ok_or_else(|| SecurityError::UnexpectedEntry { entry: entry() })?;
            EntryKind::Asset {
                handle,
                file_name: (*file).to_string(),
            }
        }
        _ => return Err(SecurityError::UnexpectedEntry { entry: entry() }),
    };
    Ok((parts.join("/"), kind))
}

fn is_drive_letter(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolves `relative` under `root`, refusing any result that lands outside
/// it lexically or after resolving links in the parent directory.
fn safe_destination(root: &Path, relative: &Path, entry: &str) -> Result<PathBuf> {
    let escapes = || SecurityError::EscapesRoot {
        entry: entry.to_string(),
    };

    let dest = root.join(relative);
    if !dest.starts_with(root) {
        return Err(escapes().into());
    }
    let parent = dest.parent().ok_or_else(escapes)?;
    std::fs::create_dir_all(parent)?;
    let parent = parent.canonicalize()?;
    if !parent.starts_with(root) {
        return Err(escapes().into());
    }
    let file_name = dest.file_name().ok_or_else(escapes)?;
    Ok(parent.join(file_name))
}

/// Copies at most `limit` bytes, failing if the source holds more.
fn copy_limited<R: Read, W: Write>(
    source: &mut R,
    sink: &mut W,
    limit: u64,
    entry: &str,
) -> Result<u64> {
    let copied = io::copy(&mut source.by_ref().take(limit.saturating_add(1)), sink)?;
    if copied > limit {
        return Err(SecurityError::EntryTooLarge {
            entry: entry.to_string(),
            limit,
        }
        .into());
    }
    Ok(copied)
}
