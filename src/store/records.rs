//! SQLite-backed store for user-authored vocabulary records.
//!
//! From the backup engine's point of view the store is create/read-only:
//! records are inserted and looked up, never updated or deleted here.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};

use crate::error::{PvError, Result};

/// SQLite schema for vocabulary storage.
const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS vocab_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL,
    syllables TEXT NOT NULL,          -- JSON array of strings
    image_path TEXT,
    audio_uri TEXT,
    user_added INTEGER NOT NULL DEFAULT 1,
    category TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vocab_records_text ON vocab_records(text);
";

/// A vocabulary record as stored live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabEntry {
    /// Store-assigned ID.
    pub id: i64,
    pub text: String,
    pub syllables: Vec<String>,
    /// Live path of the record's image, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_uri: Option<String>,
    /// False for records bundled with the application.
    pub user_added: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A record to be inserted; the store assigns its ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVocabEntry {
    pub text: String,
    pub syllables: Vec<String>,
    pub image_path: Option<PathBuf>,
    pub audio_uri: Option<String>,
    pub user_added: bool,
    pub category: Option<String>,
}

impl NewVocabEntry {
    /// A user-added record with only text and syllables.
    #[must_use]
    pub fn user(text: impl Into<String>, syllables: Vec<String>) -> Self {
        Self {
            text: text.into(),
            syllables,
            image_path: None,
            audio_uri: None,
            user_added: true,
            category: None,
        }
    }

    /// Set the image path.
    pub fn with_image(mut self, path: PathBuf) -> Self {
        self.image_path = Some(path);
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Relational record storage used by the engine.
pub trait RecordStore: Send {
    /// Inserts one record and returns its new ID.
    fn insert(&mut self, entry: &NewVocabEntry) -> Result<i64>;

    /// Finds the first record with exactly this text.
    fn find_by_text(&self, text: &str) -> Result<Option<VocabEntry>>;

    /// Lists every user-added record in insertion order.
    fn list_user_records(&self) -> Result<Vec<VocabEntry>>;

    /// Inserts a batch. Implementations that support transactions insert
    /// all-or-nothing.
    fn insert_all(&mut self, entries: &[NewVocabEntry]) -> Result<Vec<i64>> {
        entries.iter().map(|e| self.insert(e)).collect()
    }
}

/// Database wrapper for vocabulary storage.
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Opens or creates a database at the given path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PvError::Store(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        debug!(path = %path.display(), "Opening record database");
        let conn = Connection::open(path)
            .map_err(|e| PvError::Store(format!("Failed to open database: {e}")))?;

        let store = Self { conn };
        store.init_schema()?;
        info!(path = %path.display(), "Record database ready");
        Ok(store)
    }

    /// Creates an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            PvError::Store(format!("Failed to create in-memory database: {e}"))
        })?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .map_err(|e| PvError::Store(format!("Failed to initialize schema: {e}")))
    }

    /// Number of records, bundled ones included.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vocab_records", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn insert_with(conn: &Connection, entry: &NewVocabEntry) -> Result<i64> {
        let syllables = serde_json::to_string(&entry.syllables)
            .map_err(|e| PvError::Store(format!("Failed to encode syllables: {e}")))?;
        conn.execute(
            "INSERT INTO vocab_records (text, syllables, image_path, audio_uri, user_added, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.text,
                syllables,
                entry.image_path.as_ref().map(|p| p.display().to_string()),
                entry.audio_uri,
                entry.user_added,
                entry.category,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| PvError::Store(format!("Failed to insert record: {e}")))?;
        let id = conn.last_insert_rowid();
        trace!(id, text = %entry.text, "Record inserted");
        Ok(id)
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<VocabEntry> {
        let syllables: String = row.get(2)?;
        let image_path: Option<String> = row.get(3)?;
        Ok(VocabEntry {
            id: row.get(0)?,
            text: row.get(1)?,
            // A corrupt syllable column degrades to an empty list.
            syllables: serde_json::from_str(&syllables).unwrap_or_default(),
            image_path: image_path.map(PathBuf::from),
            audio_uri: row.get(4)?,
            user_added: row.get(5)?,
            category: row.get(6)?,
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(&mut self, entry: &NewVocabEntry) -> Result<i64> {
        Self::insert_with(&self.conn, entry)
    }

    #[instrument(skip(self))]
    fn find_by_text(&self, text: &str) -> Result<Option<VocabEntry>> {
        self.conn
            .query_row(
                "SELECT id, text, syllables, image_path, audio_uri, user_added, category
                 FROM vocab_records WHERE text = ?1 ORDER BY id LIMIT 1",
                params![text],
                Self::row_to_entry,
            )
            .optional()
            .map_err(|e| PvError::Store(format!("Failed to query record: {e}")))
    }

    #[instrument(skip(self))]
    fn list_user_records(&self) -> Result<Vec<VocabEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, text, syllables, image_path, audio_uri, user_added, category
                 FROM vocab_records WHERE user_added = 1 ORDER BY id",
            )
            .map_err(|e| PvError::Store(format!("Failed to prepare statement: {e}")))?;

        let entries = stmt
            .query_map([], Self::row_to_entry)
            .map_err(|e| PvError::Store(format!("Failed to query records: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PvError::Store(format!("Failed to collect records: {e}")))?;

        debug!(count = entries.len(), "Listed user records");
        Ok(entries)
    }

    #[instrument(skip_all, fields(count = entries.len()))]
    fn insert_all(&mut self, entries: &[NewVocabEntry]) -> Result<Vec<i64>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| PvError::Store(format!("Failed to start transaction: {e}")))?;

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            ids.push(Self::insert_with(&tx, entry)?);
        }

        tx.commit()
            .map_err(|e| PvError::Store(format!("Failed to commit transaction: {e}")))?;
        info!(inserted = ids.len(), "Record batch committed");
        Ok(ids)
    }
}
