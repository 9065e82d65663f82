//! Engine configuration and the on-disk storage layout derived from it.
//!
//! # Example `config.toml`
//!
//! ```toml
//! data_dir = "~/pv-data"
//! backup_dir = "/mnt/usb/pv-backups"
//!
//! [limits]
//! max_entries = 5000
//! max_entry_bytes = 33554432
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::path::{PathResolver, default_config_path, default_data_dir};
use crate::error::{PvError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Root of all live application state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Where new archives are written. Defaults to `<data_dir>/backups`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    /// Parent of per-restore scratch directories. Defaults to `<data_dir>/scratch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// Bounds applied to untrusted archives.
    pub limits: ArchiveLimits,
}

/// Structural limits for archives read from untrusted sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveLimits {
    /// Maximum number of entries in the archive.
    pub max_entries: usize,
    /// Maximum uncompressed size of one asset entry.
    pub max_entry_bytes: u64,
    /// Maximum uncompressed size of the manifest entry.
    pub max_manifest_bytes: u64,
    /// Maximum uncompressed size of the whole archive.
    pub max_total_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_entry_bytes: 64 * 1024 * 1024,
            max_manifest_bytes: 16 * 1024 * 1024,
            max_total_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Parses a config file, resolving relative paths against its directory.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PvError::ConfigNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PvError::Io(e)
            }
        })?;

        let mut config: Self =
            toml::from_str(&text).map_err(|e| PvError::ConfigParse(e.to_string()))?;

        let resolver = PathResolver::new(path)?;
        for slot in [
            &mut config.data_dir,
            &mut config.backup_dir,
            &mut config.scratch_dir,
        ] {
            if let Some(p) = slot.as_mut() {
                *p = resolver.resolve(p)?;
            }
        }
        config.limits.validate()?;

        debug!(?config, "Loaded engine config");
        Ok(config)
    }

    /// Loads the explicit config file if given, otherwise the default file if
    /// it exists, otherwise built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Computes the storage layout rooted at the configured data directory.
    pub fn layout(&self) -> Result<StorageLayout> {
        let root = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        let mut layout = StorageLayout::new(root);
        if let Some(dir) = &self.backup_dir {
            layout.backup_dir.clone_from(dir);
        }
        if let Some(dir) = &self.scratch_dir {
            layout.scratch_dir.clone_from(dir);
        }
        Ok(layout)
    }
}

impl ArchiveLimits {
    fn validate(&self) -> Result<()> {
        if self.max_entries == 0
            || self.max_entry_bytes == 0
            || self.max_manifest_bytes == 0
            || self.max_total_bytes == 0
        {
            return Err(PvError::ConfigInvalid(
                "archive limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locations of live stores and engine working directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub root: PathBuf,
    pub prefs_file: PathBuf,
    pub records_db: PathBuf,
    /// App-private images for user-created catalog items.
    pub catalog_assets_dir: PathBuf,
    /// App-private images for vocabulary records.
    pub vocab_assets_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl StorageLayout {
    /// Standard layout under `root`.
    pub fn new(root: PathBuf) -> Self {
        Self {
            prefs_file: root.join("prefs.json"),
            records_db: root.join("records.db"),
            catalog_assets_dir: root.join("custom_catalog"),
            vocab_assets_dir: root.join("vocab_images"),
            backup_dir: root.join("backups"),
            scratch_dir: root.join("scratch"),
            root,
        }
    }

    /// Creates every directory of the layout.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.root,
            &self.catalog_assets_dir,
            &self.vocab_assets_dir,
            &self.backup_dir,
            &self.scratch_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        info!(root = %self.root.display(), "Storage layout ready");
        Ok(())
    }
}
