//! Live stores the engine reads from and restores into.
//!
//! The engine sees three heterogeneous stores: a key-value preference store,
//! a relational record store and loose asset files under the storage layout.
//! None of them share a transaction; each access takes its lock for one short
//! read or write only.

mod prefs;
mod records;

use std::sync::{Mutex, MutexGuard};

pub use prefs::{JsonPrefStore, PrefEdit, PrefOp, PrefValue, PreferenceStore, keys};
pub use records::{NewVocabEntry, RecordStore, SqliteRecordStore, VocabEntry};

use crate::config::StorageLayout;
use crate::error::{PvError, Result};

/// The live stores of one application instance.
pub struct Stores {
    prefs: Mutex<Box<dyn PreferenceStore>>,
    records: Mutex<Box<dyn RecordStore>>,
}

impl Stores {
    pub fn new(prefs: Box<dyn PreferenceStore>, records: Box<dyn RecordStore>) -> Self {
        Self {
            prefs: Mutex::new(prefs),
            records: Mutex::new(records),
        }
    }

    /// Opens the file-backed stores of a storage layout.
    pub fn open(layout: &StorageLayout) -> Result<Self> {
        let prefs = JsonPrefStore::open(&layout.prefs_file)?;
        let records = SqliteRecordStore::open(&layout.records_db)?;
        Ok(Self::new(Box::new(prefs), Box::new(records)))
    }

    /// Empty in-memory stores.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(
            Box::new(JsonPrefStore::in_memory()),
            Box::new(SqliteRecordStore::in_memory()?),
        ))
    }

    pub fn prefs(&self) -> Result<MutexGuard<'_, Box<dyn PreferenceStore>>> {
        self.prefs
            .lock()
            .map_err(|_| PvError::Store("preference store lock poisoned".to_string()))
    }

    pub fn records(&self) -> Result<MutexGuard<'_, Box<dyn RecordStore>>> {
        self.records
            .lock()
            .map_err(|_| PvError::Store("record store lock poisoned".to_string()))
    }
}
