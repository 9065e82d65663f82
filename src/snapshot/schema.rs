//! Snapshot data types.
//!
//! A [`Snapshot`] is the complete, path-independent description of one
//! user's progress at one instant. It is the manifest of a backup archive:
//! every collection is serialized (empty ones included), field names are
//! camelCase and unknown fields are rejected on decode.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::asset::AssetHandle;
use crate::error::FormatError;

/// The only manifest format version this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// Theme every profile owns and falls back to.
pub const DEFAULT_THEME: &str = crate::store::keys::DEFAULT_THEME;

/// Largest balance the preference store can hold.
pub const MAX_CURRENCY_BALANCE: u64 = i64::MAX.unsigned_abs();

/// Effect intensity used when none was ever set.
pub const DEFAULT_EFFECT_INTENSITY: f64 = 1.0;

/// A complete progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Snapshot {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub currency_balance: u64,
    pub owned_item_ids: BTreeSet<String>,
    pub sticker_counts: BTreeMap<String, u32>,
    pub placed_stickers: Vec<Placement>,
    pub equipped_theme: String,
    /// Absent in manifests written before the field existed.
    #[serde(default, skip_serializing_if = "Presence::is_absent")]
    pub equipped_effect: Presence<String>,
    pub effect_intensity: f64,
    /// Epoch-day of the last claimed daily reward.
    pub last_daily_reward_day: Option<i64>,
    pub price_overrides: BTreeMap<String, u32>,
    pub hidden_catalog_item_ids: BTreeSet<String>,
    pub custom_catalog_items: Vec<CatalogItem>,
    pub vocabulary_records: Vec<VocabRecord>,
}

/// A sticker placed on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Placement {
    pub placement_id: String,
    pub sticker_id: String,
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f64,
    pub page: u32,
}

/// Category of a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Theme,
    Effect,
    Sticker,
}

/// A user-created catalog item as carried by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub cost: u32,
    /// ARGB colour.
    pub primary_color: u32,
    pub secondary_color: u32,
    pub kind: CatalogKind,
    /// Name of a resource bundled with the application, if any.
    pub bundled_resource: Option<String>,
    pub image_asset: Option<AssetHandle>,
}

/// A user-created catalog item as stored live, with its image path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCatalogItem {
    pub id: String,
    pub name: String,
    pub cost: u32,
    pub primary_color: u32,
    pub secondary_color: u32,
    pub kind: CatalogKind,
    #[serde(default)]
    pub bundled_resource: Option<String>,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
}

impl StoredCatalogItem {
    /// Manifest form of this item, referencing its image by `image_asset`.
    pub fn to_manifest(&self, image_asset: Option<AssetHandle>) -> CatalogItem {
        CatalogItem {
            id: self.id.clone(),
            name: self.name.clone(),
            cost: self.cost,
            primary_color: self.primary_color,
            secondary_color: self.secondary_color,
            kind: self.kind,
            bundled_resource: self.bundled_resource.clone(),
            image_asset,
        }
    }

    /// Live form of a manifest item whose image now lives at `image_path`.
    pub fn from_manifest(item: &CatalogItem, image_path: Option<PathBuf>) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            cost: item.cost,
            primary_color: item.primary_color,
            secondary_color: item.secondary_color,
            kind: item.kind,
            bundled_resource: item.bundled_resource.clone(),
            image_path,
        }
    }
}

/// A user-authored vocabulary record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VocabRecord {
    /// Record ID at backup time. Informational only; never reused on restore.
    pub source_id: i64,
    pub text: String,
    pub syllables: Vec<String>,
    pub image_asset: Option<AssetHandle>,
    pub audio_uri: Option<String>,
    pub category: Option<String>,
}

/// Tri-state optional field: missing from the document, explicitly null,
/// or present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence<T> {
    Absent,
    Null,
    Value(T),
}

impl<T> Default for Presence<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T> Presence<T> {
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl<T> From<Option<T>> for Presence<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Self::Value)
    }
}

impl<T: Serialize> Serialize for Presence<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_some(v),
            Self::Absent | Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Presence<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Self::from)
    }
}

/// Aggregate counts describing a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub created_at: DateTime<Utc>,
    pub currency_balance: u64,
    pub owned_item_count: usize,
    pub sticker_total: u64,
    pub placement_count: usize,
    pub custom_item_count: usize,
    pub vocabulary_count: usize,
    pub asset_count: usize,
}

impl Snapshot {
    /// An empty snapshot stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            currency_balance: 0,
            owned_item_ids: BTreeSet::from([DEFAULT_THEME.to_string()]),
            sticker_counts: BTreeMap::new(),
            placed_stickers: Vec::new(),
            equipped_theme: DEFAULT_THEME.to_string(),
            equipped_effect: Presence::Null,
            effect_intensity: DEFAULT_EFFECT_INTENSITY,
            last_daily_reward_day: None,
            price_overrides: BTreeMap::new(),
            hidden_catalog_item_ids: BTreeSet::new(),
            custom_catalog_items: Vec::new(),
            vocabulary_records: Vec::new(),
        }
    }

    /// Every asset handle referenced by the snapshot.
    pub fn asset_handles(&self) -> BTreeSet<&AssetHandle> {
        self.custom_catalog_items
            .iter()
            .filter_map(|i| i.image_asset.as_ref())
            .chain(
                self.vocabulary_records
                    .iter()
                    .filter_map(|r| r.image_asset.as_ref()),
            )
            .collect()
    }

    /// Sum of all sticker quantities.
    pub fn sticker_total(&self) -> u64 {
        self.sticker_counts.values().map(|&n| u64::from(n)).sum()
    }

    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            created_at: self.created_at,
            currency_balance: self.currency_balance,
            owned_item_count: self.owned_item_ids.len(),
            sticker_total: self.sticker_total(),
            placement_count: self.placed_stickers.len(),
            custom_item_count: self.custom_catalog_items.len(),
            vocabulary_count: self.vocabulary_records.len(),
            asset_count: self.asset_handles().len(),
        }
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.format_version != FORMAT_VERSION {
            return Err(FormatError::VersionMismatch {
                found: i64::from(self.format_version),
                supported: FORMAT_VERSION,
            });
        }
        if self.currency_balance > MAX_CURRENCY_BALANCE {
            return Err(invalid(
                "currencyBalance",
                format!("{} exceeds the largest storable balance", self.currency_balance),
            ));
        }
        if !self.effect_intensity.is_finite() || self.effect_intensity < 0.0 {
            return Err(invalid(
                "effectIntensity",
                "must be a finite non-negative number",
            ));
        }
        if self.equipped_theme.is_empty() {
            return Err(invalid("equippedTheme", "must not be empty"));
        }

        let mut placement_ids = BTreeSet::new();
        for placement in &self.placed_stickers {
            if !placement_ids.insert(placement.placement_id.as_str()) {
                return Err(invalid(
                    "placedStickers",
                    format!("duplicate placementId '{}'", placement.placement_id),
                ));
            }
            if !placement.is_finite() {
                return Err(invalid(
                    "placedStickers",
                    format!(
                        "placement '{}' has a non-finite coordinate",
                        placement.placement_id
                    ),
                ));
            }
        }

        let mut item_ids = BTreeSet::new();
        for item in &self.custom_catalog_items {
            if item.id.is_empty() || !item_ids.insert(item.id.as_str()) {
                return Err(invalid(
                    "customCatalogItems",
                    format!("missing or duplicate id '{}'", item.id),
                ));
            }
        }

        if self
            .vocabulary_records
            .iter()
            .any(|r| r.text.trim().is_empty())
        {
            return Err(invalid("vocabularyRecords", "record text must not be empty"));
        }
        Ok(())
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Placement {
    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.scale, self.rotation]
            .iter()
            .all(|v| v.is_finite())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> FormatError {
    FormatError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}
