//! Progress snapshots: the data model, its manifest codec and collection
//! from the live stores.
//!
//! # Archive layout
//!
//! ```text
//! backup-20260118-093012.zip
//! ├── manifest.json              # Snapshot, formatVersion 1
//! └── assets/
//!     ├── 3f2a...c1.png          # assets/<handle>.<ext>
//!     └── 91bd...07.jpg
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pv::snapshot::{StateCollector, codec};
//!
//! let collected = StateCollector::new(&stores).collect();
//! let manifest = codec::encode(&collected.snapshot)?;
//! let snapshot = codec::decode(&manifest)?;
//! ```

mod asset;
pub mod codec;
mod collect;
mod schema;

pub use asset::{
    AssetHandle, AssetMap, AssetResolver, FALLBACK_EXTENSION, InvalidAssetHandle,
    asset_extension, is_valid_extension,
};
pub use codec::MANIFEST_ENTRY;
pub use collect::{Collected, StateCollector};
pub use schema::{
    BackupSummary, CatalogItem, CatalogKind, DEFAULT_EFFECT_INTENSITY, DEFAULT_THEME,
    FORMAT_VERSION, MAX_CURRENCY_BALANCE, Placement, Presence, Snapshot, StoredCatalogItem,
    VocabRecord,
};
