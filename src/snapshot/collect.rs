//! Snapshot collection from the live stores.
//!
//! Collection never fails as a whole. A store that cannot be read, or a
//! structured preference that does not parse, contributes an empty portion
//! and a warning; the rest of the snapshot is still produced.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::asset::{AssetHandle, AssetMap};
use super::schema::{
    DEFAULT_EFFECT_INTENSITY, DEFAULT_THEME, Placement, Snapshot, StoredCatalogItem, VocabRecord,
};
use crate::store::{PrefValue, Stores, VocabEntry, keys};

/// A collected snapshot together with the live files its handles stand for.
#[derive(Debug, Clone)]
pub struct Collected {
    pub snapshot: Snapshot,
    pub assets: AssetMap,
}

/// Reads a consistent-enough view of the live stores.
pub struct StateCollector<'a> {
    stores: &'a Stores,
}

impl<'a> StateCollector<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    /// Builds a snapshot of the current live state.
    #[instrument(skip_all)]
    pub fn collect(&self) -> Collected {
        let prefs = self.read_prefs();
        let records = self.read_records();

        let mut assets = AssetMap::new();
        let mut snapshot = Snapshot::new();

        snapshot.currency_balance = prefs
            .get(keys::CURRENCY_BALANCE)
            .and_then(PrefValue::as_int)
            .map_or(0, |v| {
                u64::try_from(v).unwrap_or_else(|_| {
                    warn!(balance = v, "Negative currency balance, backing up 0");
                    0
                })
            });

        if let Some(owned) = prefs
            .get(keys::OWNED_ITEMS)
            .and_then(PrefValue::as_text_set)
        {
            snapshot.owned_item_ids.clone_from(owned);
        }

        snapshot.sticker_counts = json_pref::<BTreeMap<String, i64>>(&prefs, keys::STICKER_COUNTS)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(id, n)| match u32::try_from(n) {
                Ok(n) => Some((id, n)),
                Err(_) => {
                    warn!(sticker = %id, count = n, "Skipping out-of-range sticker count");
                    None
                }
            })
            .collect();

        snapshot.placed_stickers = sanitize_placements(
            json_pref::<Vec<Placement>>(&prefs, keys::PLACED_STICKERS).unwrap_or_default(),
        );

        snapshot.equipped_theme = prefs
            .get(keys::EQUIPPED_THEME)
            .and_then(PrefValue::as_text)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_THEME)
            .to_string();

        snapshot.equipped_effect = prefs
            .get(keys::EQUIPPED_EFFECT)
            .and_then(PrefValue::as_text)
            .map(str::to_string)
            .into();

        snapshot.effect_intensity = prefs
            .get(keys::EFFECT_INTENSITY)
            .and_then(PrefValue::as_float)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(DEFAULT_EFFECT_INTENSITY);

        snapshot.last_daily_reward_day = prefs
            .get(keys::LAST_DAILY_REWARD_DAY)
            .and_then(PrefValue::as_int);

        snapshot.price_overrides = prefs
            .iter()
            .filter_map(|(key, value)| {
                let item = key.strip_prefix(keys::PRICE_OVERRIDE_PREFIX)?;
                let raw = value.as_int()?;
                let Ok(price) = u32::try_from(raw) else {
                    warn!(item, price = raw, "Skipping out-of-range price override");
                    return None;
                };
                (!item.is_empty()).then(|| (item.to_string(), price))
            })
            .collect();

        if let Some(hidden) = prefs
            .get(keys::HIDDEN_CATALOG_ITEMS)
            .and_then(PrefValue::as_text_set)
        {
            snapshot.hidden_catalog_item_ids.clone_from(hidden);
        }

        let mut item_ids = HashSet::new();
        for item in json_pref::<Vec<StoredCatalogItem>>(&prefs, keys::CUSTOM_CATALOG_ITEMS)
            .unwrap_or_default()
        {
            if item.id.is_empty() || !item_ids.insert(item.id.clone()) {
                warn!(id = %item.id, "Skipping custom item with missing or duplicate id");
                continue;
            }
            let handle = item.image_path.clone().map(|p| assets.register(p));
            snapshot.custom_catalog_items.push(item.to_manifest(handle));
        }

        for entry in records {
            if entry.text.trim().is_empty() {
                warn!(id = entry.id, "Skipping vocabulary record with empty text");
                continue;
            }
            let handle = entry.image_path.clone().map(|p| assets.register(p));
            snapshot.vocabulary_records.push(vocab_record(entry, handle));
        }

        debug!(
            stickers = snapshot.sticker_counts.len(),
            placements = snapshot.placed_stickers.len(),
            custom_items = snapshot.custom_catalog_items.len(),
            records = snapshot.vocabulary_records.len(),
            assets = assets.len(),
            "Collected snapshot"
        );
        Collected { snapshot, assets }
    }

    fn read_prefs(&self) -> BTreeMap<String, PrefValue> {
        match self.stores.prefs().and_then(|store| store.entries()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Preference store unreadable, collecting without it");
                BTreeMap::new()
            }
        }
    }

    fn read_records(&self) -> Vec<VocabEntry> {
        match self
            .stores
            .records()
            .and_then(|store| store.list_user_records())
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Record store unreadable, collecting without it");
                Vec::new()
            }
        }
    }
}

/// Parses a structured preference stored as JSON text.
fn json_pref<T: DeserializeOwned>(prefs: &BTreeMap<String, PrefValue>, key: &str) -> Option<T> {
    let text = prefs.get(key)?.as_text()?;
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Corrupt structured preference, treating as empty");
            None
        }
    }
}

/// Drops placements a manifest could not carry: repeated ids and
/// non-finite coordinates.
fn sanitize_placements(placements: Vec<Placement>) -> Vec<Placement> {
    let mut seen = BTreeSet::new();
    placements
        .into_iter()
        .filter(|p| {
            let keep = p.is_finite() && seen.insert(p.placement_id.clone());
            if !keep {
                warn!(placement = %p.placement_id, "Dropping unrepresentable placement");
            }
            keep
        })
        .collect()
}

fn vocab_record(entry: VocabEntry, image_asset: Option<AssetHandle>) -> VocabRecord {
    VocabRecord {
        source_id: entry.id,
        text: entry.text,
        syllables: entry.syllables,
        image_asset,
        audio_uri: entry.audio_uri,
        category: entry.category,
    }
}
