//! Backup engine: the async entry points that tie collection, archiving,
//! extraction and restore together.
//!
//! Every entry point claims the single-flight slot synchronously, before any
//! work is scheduled, and then runs the filesystem- and store-heavy part on
//! tokio's blocking pool. Restores and inspections extract into a private
//! scratch directory that is removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::archive::{ArchiveLocator, ArchiveReader, ArchiveWriter, PARTIAL_SUFFIX, unique_archive_path};
use crate::config::{ArchiveLimits, EngineConfig, StorageLayout};
use crate::error::{PvError, Result};
use crate::restore::{RestoreSummary, StateRestorer};
use crate::snapshot::{BackupSummary, StateCollector, codec};
use crate::state::{EngineState, Operation, StateSummary};
use crate::store::{PrefEdit, PrefValue, Stores, keys};

/// Prefix of per-operation scratch directories.
pub const SCRATCH_PREFIX: &str = "pv-restore-";

/// Result of a successful backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub archive: ArchiveLocator,
    pub summary: BackupSummary,
}

/// Result of inspecting an archive without restoring it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectReport {
    pub path: PathBuf,
    pub summary: BackupSummary,
    /// Referenced assets the archive does not carry.
    pub missing_assets: usize,
    pub extracted_bytes: u64,
}

/// Status of the engine and its storage.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    #[serde(flatten)]
    pub state: StateSummary,
    pub live: LiveCounts,
    /// Finished archives in the backup directory.
    pub backups: Vec<PathBuf>,
}

/// Headline numbers of the live stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiveCounts {
    pub currency_balance: u64,
    pub vocabulary_count: usize,
}

/// The backup engine of one storage layout.
#[derive(Clone)]
pub struct BackupEngine {
    stores: Arc<Stores>,
    state: Arc<EngineState>,
    layout: StorageLayout,
    limits: ArchiveLimits,
}

impl BackupEngine {
    pub fn new(
        stores: Arc<Stores>,
        state: Arc<EngineState>,
        layout: StorageLayout,
        limits: ArchiveLimits,
    ) -> Self {
        Self {
            stores,
            state,
            layout,
            limits,
        }
    }

    /// Opens the stores of `config`'s layout, hydrates the last backup time
    /// and sweeps scratch left behind by an interrupted run.
    #[instrument(skip_all)]
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let layout = config.layout()?;
        layout.ensure_dirs()?;
        let stores = Stores::open(&layout)?;
        let last_backup_at = read_last_backup(&stores);
        let engine = Self::new(
            Arc::new(stores),
            Arc::new(EngineState::with_last_backup(last_backup_at)),
            layout,
            config.limits,
        );
        let swept = engine.sweep_orphaned_scratch()?;
        if swept > 0 {
            info!(swept, "Removed leftovers of interrupted runs");
        }
        Ok(engine)
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    /// When the last backup completed; `None` until one has.
    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.state.last_backup_at()
    }

    /// Collects the live state and writes it as a new archive in the backup
    /// directory.
    pub async fn create_backup(&self) -> Result<BackupOutcome> {
        self.create_backup_in(self.layout.backup_dir.clone()).await
    }

    /// Like [`Self::create_backup`], writing into `dir`.
    #[instrument(skip(self))]
    pub async fn create_backup_in(&self, dir: PathBuf) -> Result<BackupOutcome> {
        let guard = self.state.try_begin(Operation::Backup)?;
        let stores = Arc::clone(&self.stores);
        let state = Arc::clone(&self.state);

        let outcome = run_blocking(move || {
            let _guard = guard;
            let collected = StateCollector::new(&stores).collect();
            let destination = unique_archive_path(&dir, collected.snapshot.created_at);
            let archive =
                ArchiveWriter::new().write(&collected.snapshot, &collected.assets, &destination)?;

            let finished_at = Utc::now();
            state.record_backup(finished_at);
            persist_last_backup(&stores, finished_at);

            Ok(BackupOutcome {
                archive,
                summary: collected.snapshot.summary(),
            })
        })
        .await?;

        info!(path = %outcome.archive.path.display(), "Backup complete");
        Ok(outcome)
    }

    /// Validates the archive at `source` and merges it into the live state.
    #[instrument(skip_all, fields(source = %source.display()))]
    pub async fn restore_backup(&self, source: &Path) -> Result<RestoreSummary> {
        let guard = self.state.try_begin(Operation::Restore)?;
        let stores = Arc::clone(&self.stores);
        let layout = self.layout.clone();
        let limits = self.limits;
        let source = source.to_path_buf();

        let summary = run_blocking(move || {
            let _guard = guard;
            let scratch = create_scratch(&layout)?;
            let extracted = ArchiveReader::new(limits).open_and_validate(&source, scratch.path())?;
            let snapshot = codec::decode(&extracted.manifest)?;
            StateRestorer::new(&stores, &layout).restore(&snapshot, &extracted)
        })
        .await?;

        info!(
            inserted = summary.vocabulary_inserted,
            skipped = summary.vocabulary_skipped,
            "Restore complete"
        );
        Ok(summary)
    }

    /// Validates the archive at `source` and reports what it holds without
    /// touching the live state.
    #[instrument(skip_all, fields(source = %source.display()))]
    pub async fn inspect(&self, source: &Path) -> Result<InspectReport> {
        let guard = self.state.try_begin(Operation::Inspect)?;
        let layout = self.layout.clone();
        let limits = self.limits;
        let source = source.to_path_buf();

        run_blocking(move || {
            let _guard = guard;
            let scratch = create_scratch(&layout)?;
            let extracted = ArchiveReader::new(limits).open_and_validate(&source, scratch.path())?;
            let snapshot = codec::decode(&extracted.manifest)?;
            let missing_assets = snapshot
                .asset_handles()
                .into_iter()
                .filter(|h| !extracted.assets.contains_key(*h))
                .count();
            Ok(InspectReport {
                path: source,
                summary: snapshot.summary(),
                missing_assets,
                extracted_bytes: extracted.total_bytes,
            })
        })
        .await
    }

    /// Removes scratch directories and partial archives left by runs that
    /// did not finish. Returns how many were removed.
    pub fn sweep_orphaned_scratch(&self) -> Result<usize> {
        let _guard = self.state.try_begin(Operation::Cleanup)?;
        let mut removed = 0;

        let targets: [(&Path, fn(&Path) -> bool); 2] = [
            (&self.layout.scratch_dir, is_scratch_dir),
            (&self.layout.backup_dir, is_partial_archive),
        ];
        for (dir, is_orphan) in targets {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let path = entry?.path();
                if !is_orphan(&path) {
                    continue;
                }
                let result = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                match result {
                    Ok(()) => {
                        debug!(path = %path.display(), "Removed orphan");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Could not remove orphan"),
                }
            }
        }
        Ok(removed)
    }

    /// Engine and storage status.
    pub fn status(&self) -> Result<EngineStatus> {
        let mut backups = Vec::new();
        match std::fs::read_dir(&self.layout.backup_dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    if path.extension().is_some_and(|e| e == crate::archive::ARCHIVE_EXTENSION) {
                        backups.push(path);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        backups.sort();

        Ok(EngineStatus {
            data_dir: self.layout.root.clone(),
            backup_dir: self.layout.backup_dir.clone(),
            state: self.state.summary(),
            live: self.live_counts()?,
            backups,
        })
    }

    fn live_counts(&self) -> Result<LiveCounts> {
        let currency_balance = self
            .stores
            .prefs()?
            .get(keys::CURRENCY_BALANCE)?
            .and_then(|v| v.as_int())
            .map_or(0, |v| u64::try_from(v).unwrap_or(0));
        let vocabulary_count = self.stores.records()?.list_user_records()?.len();
        Ok(LiveCounts {
            currency_balance,
            vocabulary_count,
        })
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PvError::Task(e.to_string()))?
}

fn create_scratch(layout: &StorageLayout) -> Result<TempDir> {
    std::fs::create_dir_all(&layout.scratch_dir)?;
    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(&layout.scratch_dir)?;
    debug!(path = %scratch.path().display(), "Scratch directory created");
    Ok(scratch)
}

fn is_scratch_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SCRATCH_PREFIX))
}

fn is_partial_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX))
}

fn read_last_backup(stores: &Stores) -> Option<DateTime<Utc>> {
    let value = stores.prefs().ok()?.get(keys::LAST_BACKUP_AT).ok()??;
    let text = value.as_text()?;
    match DateTime::parse_from_rfc3339(text) {
        Ok(at) => Some(at.with_timezone(&Utc)),
        Err(e) => {
            warn!(error = %e, "Ignoring unparsable last backup time");
            None
        }
    }
}

fn persist_last_backup(stores: &Stores, at: DateTime<Utc>) {
    let mut edit = PrefEdit::new();
    edit.put(keys::LAST_BACKUP_AT, PrefValue::Text(at.to_rfc3339()));
    if let Err(e) = stores.prefs().and_then(|mut p| p.apply(&edit)) {
        warn!(error = %e, "Could not persist last backup time");
    }
}
