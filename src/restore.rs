//! Merging a decoded snapshot into the live stores.
//!
//! Scalar progress (currency, ownership, stickers, equipment, catalog
//! customization) is overwritten wholesale with one preference edit.
//! Vocabulary is merged additively: a record whose text already exists live
//! is skipped, every other record is inserted under a fresh ID.
//!
//! The two stores share no transaction. The preference edit is applied
//! first and records are inserted second; if the insert fails the inverse
//! preference edit is applied and every asset file copied for this restore
//! is deleted again, so a failed restore leaves the live state as it was.
//! After a successful restore the images of replaced custom items are
//! removed.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::StorageLayout;
use crate::error::{FormatError, PvError, Result};
use crate::snapshot::{
    AssetHandle, AssetResolver, Presence, Snapshot, StoredCatalogItem, asset_extension,
};
use crate::store::{NewVocabEntry, PrefEdit, PrefValue, Stores, keys};

/// What a restore did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub backup_created_at: DateTime<Utc>,
    pub currency_balance: u64,
    pub sticker_total: u64,
    pub placement_count: usize,
    pub custom_item_count: usize,
    /// Records carried by the backup.
    pub vocabulary_count: usize,
    pub vocabulary_inserted: usize,
    /// Records skipped because their text already existed.
    pub vocabulary_skipped: usize,
    /// Referenced assets absent from the archive.
    pub missing_assets: usize,
}

/// Applies snapshots to the live stores of one storage layout.
pub struct StateRestorer<'a> {
    stores: &'a Stores,
    layout: &'a StorageLayout,
}

impl<'a> StateRestorer<'a> {
    pub fn new(stores: &'a Stores, layout: &'a StorageLayout) -> Self {
        Self { stores, layout }
    }

    /// Restores `snapshot`, copying its assets out of `assets`.
    #[instrument(skip_all, fields(created_at = %snapshot.created_at))]
    pub fn restore(
        &self,
        snapshot: &Snapshot,
        assets: &dyn AssetResolver,
    ) -> Result<RestoreSummary> {
        snapshot.validate()?;
        let mut staged = StagedFiles::default();
        let mut missing_assets = 0;

        let mut custom_items = Vec::with_capacity(snapshot.custom_catalog_items.len());
        for item in &snapshot.custom_catalog_items {
            let image = self.stage_asset(
                item.image_asset.as_ref(),
                assets,
                &self.layout.catalog_assets_dir,
                &mut staged,
                &mut missing_assets,
            )?;
            custom_items.push(StoredCatalogItem::from_manifest(item, image));
        }

        let (new_records, skipped) =
            self.plan_vocabulary(snapshot, assets, &mut staged, &mut missing_assets)?;

        let before = self.stores.prefs()?.entries()?;
        let edit = build_pref_edit(snapshot, &custom_items, &before)?;
        let undo = edit.inverse(&before);

        self.stores.prefs()?.apply(&edit)?;
        debug!(ops = edit.ops().len(), "Preference edit applied");

        let inserted = match self.stores.records().and_then(|mut r| r.insert_all(&new_records)) {
            Ok(ids) => ids.len(),
            Err(e) => {
                error!(error = %e, "Record insert failed, rolling back preferences");
                if let Err(rollback) = self.stores.prefs().and_then(|mut p| p.apply(&undo)) {
                    error!(error = %rollback, "Preference rollback failed");
                }
                return Err(e);
            }
        };
        staged.keep();
        self.prune_replaced_images(&before, &custom_items);

        let summary = RestoreSummary {
            backup_created_at: snapshot.created_at,
            currency_balance: snapshot.currency_balance,
            sticker_total: snapshot.sticker_total(),
            placement_count: snapshot.placed_stickers.len(),
            custom_item_count: custom_items.len(),
            vocabulary_count: snapshot.vocabulary_records.len(),
            vocabulary_inserted: inserted,
            vocabulary_skipped: skipped,
            missing_assets,
        };
        info!(
            inserted = summary.vocabulary_inserted,
            skipped = summary.vocabulary_skipped,
            missing_assets,
            "Restore applied"
        );
        Ok(summary)
    }

    /// Selects the records to insert and stages their images.
    fn plan_vocabulary(
        &self,
        snapshot: &Snapshot,
        assets: &dyn AssetResolver,
        staged: &mut StagedFiles,
        missing_assets: &mut usize,
    ) -> Result<(Vec<NewVocabEntry>, usize)> {
        let mut batch_texts = HashSet::new();
        let mut entries = Vec::new();
        let mut skipped = 0;

        for record in &snapshot.vocabulary_records {
            let exists = self.stores.records()?.find_by_text(&record.text)?.is_some();
            if exists || !batch_texts.insert(record.text.as_str()) {
                debug!(text = %record.text, "Vocabulary record already present, skipping");
                skipped += 1;
                continue;
            }
            let image_path = self.stage_asset(
                record.image_asset.as_ref(),
                assets,
                &self.layout.vocab_assets_dir,
                staged,
                missing_assets,
            )?;
            entries.push(NewVocabEntry {
                text: record.text.clone(),
                syllables: record.syllables.clone(),
                image_path,
                audio_uri: record.audio_uri.clone(),
                user_added: true,
                category: record.category.clone(),
            });
        }
        Ok((entries, skipped))
    }

    /// Deletes images of custom items the restore replaced. Only files under
    /// the catalog asset directory are touched.
    fn prune_replaced_images(
        &self,
        before: &BTreeMap<String, PrefValue>,
        current: &[StoredCatalogItem],
    ) {
        let Some(previous) = before
            .get(keys::CUSTOM_CATALOG_ITEMS)
            .and_then(PrefValue::as_text)
            .and_then(|text| serde_json::from_str::<Vec<StoredCatalogItem>>(text).ok())
        else {
            return;
        };
        let kept: HashSet<&Path> = current
            .iter()
            .filter_map(|item| item.image_path.as_deref())
            .collect();
        for path in previous.iter().filter_map(|item| item.image_path.as_deref()) {
            if kept.contains(path) || !path.starts_with(&self.layout.catalog_assets_dir) {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed replaced catalog image"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove replaced catalog image"),
            }
        }
    }

    /// Copies one asset into `dir` under a fresh name. A handle the archive
    /// does not carry yields `None` and is counted as missing.
    fn stage_asset(
        &self,
        handle: Option<&AssetHandle>,
        assets: &dyn AssetResolver,
        dir: &Path,
        staged: &mut StagedFiles,
        missing_assets: &mut usize,
    ) -> Result<Option<PathBuf>> {
        let Some(handle) = handle else {
            return Ok(None);
        };
        let Some(source) = assets.resolve(handle) else {
            warn!(%handle, "Asset missing from archive");
            *missing_assets += 1;
            return Ok(None);
        };

        std::fs::create_dir_all(dir)?;
        let dest = dir.join(format!(
            "{}.{}",
            Uuid::new_v4().simple(),
            asset_extension(source)
        ));
        let mut reader = File::open(source)?;
        let mut writer = OpenOptions::new().write(true).create_new(true).open(&dest)?;
        staged.push(dest.clone());
        io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        debug!(%handle, dest = %dest.display(), "Asset staged");
        Ok(Some(dest))
    }
}

/// The wholesale preference overwrite for `snapshot`.
fn build_pref_edit(
    snapshot: &Snapshot,
    custom_items: &[StoredCatalogItem],
    before: &BTreeMap<String, PrefValue>,
) -> Result<PrefEdit> {
    let to_json = |what: &str, value: std::result::Result<String, serde_json::Error>| {
        value.map_err(|e| PvError::Other(format!("Failed to encode {what}: {e}")))
    };

    let mut edit = PrefEdit::new();
    edit.put(
        keys::CURRENCY_BALANCE,
        PrefValue::Int(i64::try_from(snapshot.currency_balance).map_err(|_| {
            FormatError::InvalidField {
                field: "currencyBalance".to_string(),
                reason: "exceeds the largest storable balance".to_string(),
            }
        })?),
    )
    .put(
        keys::OWNED_ITEMS,
        PrefValue::TextSet(snapshot.owned_item_ids.clone()),
    )
    .put(
        keys::STICKER_COUNTS,
        PrefValue::Text(to_json(
            "sticker counts",
            serde_json::to_string(&snapshot.sticker_counts),
        )?),
    )
    .put(
        keys::PLACED_STICKERS,
        PrefValue::Text(to_json(
            "placements",
            serde_json::to_string(&snapshot.placed_stickers),
        )?),
    )
    .put(
        keys::EQUIPPED_THEME,
        PrefValue::Text(snapshot.equipped_theme.clone()),
    )
    .put(
        keys::EFFECT_INTENSITY,
        PrefValue::Float(snapshot.effect_intensity),
    )
    .put(
        keys::HIDDEN_CATALOG_ITEMS,
        PrefValue::TextSet(snapshot.hidden_catalog_item_ids.clone()),
    )
    .put(
        keys::CUSTOM_CATALOG_ITEMS,
        PrefValue::Text(to_json("custom items", serde_json::to_string(custom_items))?),
    );

    match &snapshot.equipped_effect {
        Presence::Value(effect) => {
            edit.put(keys::EQUIPPED_EFFECT, PrefValue::Text(effect.clone()));
        }
        Presence::Null => {
            edit.remove(keys::EQUIPPED_EFFECT);
        }
        Presence::Absent => {}
    }

    match snapshot.last_daily_reward_day {
        Some(day) => edit.put(keys::LAST_DAILY_REWARD_DAY, PrefValue::Int(day)),
        None => edit.remove(keys::LAST_DAILY_REWARD_DAY),
    };

    for key in before.keys() {
        if let Some(item) = key.strip_prefix(keys::PRICE_OVERRIDE_PREFIX) {
            if !snapshot.price_overrides.contains_key(item) {
                edit.remove(key.clone());
            }
        }
    }
    for (item, price) in &snapshot.price_overrides {
        edit.put(
            format!("{}{item}", keys::PRICE_OVERRIDE_PREFIX),
            PrefValue::Int(i64::from(*price)),
        );
    }

    Ok(edit)
}

/// Asset files copied during a restore, deleted on drop unless kept.
#[derive(Debug, Default)]
struct StagedFiles {
    paths: Vec<PathBuf>,
}

impl StagedFiles {
    fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn keep(&mut self) {
        self.paths.clear();
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Could not remove staged asset");
            }
        }
    }
}
