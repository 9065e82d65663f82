//! Asset handles: path-independent names for binary files carried by a backup.
//!
//! A manifest never contains a filesystem path. Each image referenced by a
//! snapshot is named by an [`AssetHandle`], and the archive stores the file
//! as `assets/<handle>.<ext>`. Handles are restricted to a small ASCII
//! alphabet so a decoded manifest can never smuggle a path into the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Longest accepted handle.
pub const MAX_HANDLE_LEN: usize = 64;

/// Longest accepted file extension.
pub const MAX_EXTENSION_LEN: usize = 8;

/// Extension used when the live file has none (or an unusable one).
pub const FALLBACK_EXTENSION: &str = "bin";

/// Opaque, stable identifier for one asset file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetHandle(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid asset handle '{0}'")]
pub struct InvalidAssetHandle(pub String);

impl AssetHandle {
    /// Mints a fresh random handle.
    #[must_use]
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validates `raw` as a handle: 1-64 chars of `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, InvalidAssetHandle> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_HANDLE_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidAssetHandle(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AssetHandle {
    type Error = InvalidAssetHandle;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AssetHandle> for String {
    fn from(handle: AssetHandle) -> Self {
        handle.0
    }
}

/// True if `ext` is usable as an archive entry extension.
pub fn is_valid_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Lower-cased extension of a live file, or [`FALLBACK_EXTENSION`].
pub fn asset_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| is_valid_extension(e))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Looks up the file currently behind an asset handle.
pub trait AssetResolver {
    fn resolve(&self, handle: &AssetHandle) -> Option<&Path>;
}

/// Handle-to-path table built while collecting a snapshot.
#[derive(Debug, Clone, Default)]
pub struct AssetMap {
    entries: BTreeMap<AssetHandle, PathBuf>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a handle for `path` and records the mapping.
    pub fn register(&mut self, path: PathBuf) -> AssetHandle {
        let handle = AssetHandle::mint();
        self.entries.insert(handle.clone(), path);
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AssetResolver for AssetMap {
    fn resolve(&self, handle: &AssetHandle) -> Option<&Path> {
        self.entries.get(handle).map(PathBuf::as_path)
    }
}
