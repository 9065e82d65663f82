//! Scalar/key-value preference store.
//!
//! Values are strings, integers, floats, booleans or string sets. Structured
//! data (sticker counts, placements, custom catalog) is stored as JSON text
//! under a single key, so every key holds one flat value.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};

use crate::error::{PvError, Result};

/// Well-known preference keys.
pub mod keys {
    pub const CURRENCY_BALANCE: &str = "currency_balance";
    pub const OWNED_ITEMS: &str = "owned_items";
    pub const STICKER_COUNTS: &str = "sticker_counts";
    pub const PLACED_STICKERS: &str = "placed_stickers";
    pub const EQUIPPED_THEME: &str = "equipped_theme";
    pub const EQUIPPED_EFFECT: &str = "equipped_effect";
    pub const EFFECT_INTENSITY: &str = "effect_intensity";
    pub const LAST_DAILY_REWARD_DAY: &str = "last_daily_reward_day";
    pub const HIDDEN_CATALOG_ITEMS: &str = "hidden_catalog_items";
    pub const CUSTOM_CATALOG_ITEMS: &str = "custom_catalog_items";
    pub const LAST_BACKUP_AT: &str = "last_backup_at";
    /// Prefix of per-item price override keys (`price_override.<item id>`).
    pub const PRICE_OVERRIDE_PREFIX: &str = "price_override.";

    pub const DEFAULT_THEME: &str = "theme_default";
}

/// A single stored preference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    TextSet(BTreeSet<String>),
}

impl PrefValue {
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_text_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::TextSet(v) => Some(v),
            _ => None,
        }
    }
}

/// One operation of a [`PrefEdit`].
#[derive(Debug, Clone, PartialEq)]
pub enum PrefOp {
    Put(String, PrefValue),
    Remove(String),
}

/// An ordered batch of preference writes, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefEdit {
    ops: Vec<PrefOp>,
}

impl PrefEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: PrefValue) -> &mut Self {
        self.ops.push(PrefOp::Put(key.into(), value));
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(PrefOp::Remove(key.into()));
        self
    }

    pub fn ops(&self) -> &[PrefOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Builds the edit that undoes `self` when applied to a store currently
    /// in the state `before`.
    pub fn inverse(&self, before: &BTreeMap<String, PrefValue>) -> Self {
        let mut touched = BTreeSet::new();
        let mut inverse = Self::new();
        for op in &self.ops {
            let key = match op {
                PrefOp::Put(key, _) | PrefOp::Remove(key) => key,
            };
            if !touched.insert(key.clone()) {
                continue;
            }
            match before.get(key) {
                Some(value) => inverse.put(key.clone(), value.clone()),
                None => inverse.remove(key.clone()),
            };
        }
        inverse
    }

    fn apply_to(&self, map: &mut BTreeMap<String, PrefValue>) {
        for op in &self.ops {
            match op {
                PrefOp::Put(key, value) => {
                    map.insert(key.clone(), value.clone());
                }
                PrefOp::Remove(key) => {
                    map.remove(key);
                }
            }
        }
    }
}

/// Key-value preference storage.
pub trait PreferenceStore: Send {
    /// Reads one key.
    fn get(&self, key: &str) -> Result<Option<PrefValue>>;

    /// Reads every key.
    fn entries(&self) -> Result<BTreeMap<String, PrefValue>>;

    /// Applies a batch atomically: either every operation is visible
    /// afterwards or none is.
    fn apply(&mut self, edit: &PrefEdit) -> Result<()>;
}

/// Preference store persisted as one JSON document.
///
/// Writes go to a sibling temporary file that is renamed over the document,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct JsonPrefStore {
    path: Option<PathBuf>,
    values: BTreeMap<String, PrefValue>,
}

impl JsonPrefStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let values = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PvError::Store(format!("Preference file {} is corrupt: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Preference file missing, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        info!(keys = values.len(), "Preference store ready");
        Ok(Self {
            path: Some(path.to_path_buf()),
            values,
        })
    }

    /// Creates a store that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: BTreeMap::new(),
        }
    }

    fn persist(&self, values: &BTreeMap<String, PrefValue>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let bytes = serde_json::to_vec_pretty(values)
            .map_err(|e| PvError::Store(format!("Failed to encode preferences: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| PvError::Io(e.error))?;
        trace!(path = %path.display(), bytes = bytes.len(), "Preferences persisted");
        Ok(())
    }
}

impl PreferenceStore for JsonPrefStore {
    fn get(&self, key: &str) -> Result<Option<PrefValue>> {
        Ok(self.values.get(key).cloned())
    }

    fn entries(&self) -> Result<BTreeMap<String, PrefValue>> {
        Ok(self.values.clone())
    }

    fn apply(&mut self, edit: &PrefEdit) -> Result<()> {
        if edit.is_empty() {
            return Ok(());
        }
        let mut next = self.values.clone();
        edit.apply_to(&mut next);
        self.persist(&next)?;
        self.values = next;
        debug!(ops = edit.ops().len(), "Preference edit applied");
        Ok(())
    }
}
