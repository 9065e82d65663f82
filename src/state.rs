//! Engine state shared between the CLI and background work.
//!
//! Tracks which operation is running, if any, and when the last backup
//! completed. Only one backup, restore or inspect may run at a time; the
//! check-and-mark happens atomically before any work is scheduled.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{PvError, Result};

/// Kind of engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Backup,
    Restore,
    Inspect,
    Cleanup,
}

impl Operation {
    const fn code(self) -> u8 {
        match self {
            Self::Backup => 1,
            Self::Restore => 2,
            Self::Inspect => 3,
            Self::Cleanup => 4,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Backup),
            2 => Some(Self::Restore),
            3 => Some(Self::Inspect),
            4 => Some(Self::Cleanup),
            _ => None,
        }
    }
}

const IDLE: u8 = 0;

/// Process-wide engine state.
#[derive(Debug, Default)]
pub struct EngineState {
    running: AtomicU8,
    last_backup_at: RwLock<Option<DateTime<Utc>>>,
}

impl EngineState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State hydrated with a previously persisted backup time.
    #[must_use]
    pub fn with_last_backup(last_backup_at: Option<DateTime<Utc>>) -> Self {
        Self {
            running: AtomicU8::new(IDLE),
            last_backup_at: RwLock::new(last_backup_at),
        }
    }

    /// Marks `operation` as running, or fails with [`PvError::Busy`] if
    /// another operation already is. The mark is cleared when the returned
    /// guard drops.
    pub fn try_begin(self: &Arc<Self>, operation: Operation) -> Result<FlightGuard> {
        self.running
            .compare_exchange(IDLE, operation.code(), Ordering::AcqRel, Ordering::Acquire)
            .map_err(|current| {
                debug!(
                    requested = ?operation,
                    running = ?Operation::from_code(current),
                    "Rejecting concurrent operation"
                );
                PvError::Busy
            })?;
        trace!(?operation, "Operation started");
        Ok(FlightGuard {
            state: Arc::clone(self),
            operation,
        })
    }

    /// The operation currently running, if any.
    pub fn current(&self) -> Option<Operation> {
        Operation::from_code(self.running.load(Ordering::Acquire))
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }

    /// When the last backup completed; `None` until one has.
    pub fn last_backup_at(&self) -> Option<DateTime<Utc>> {
        self.last_backup_at
            .read()
            .map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
    }

    pub fn record_backup(&self, at: DateTime<Utc>) {
        match self.last_backup_at.write() {
            Ok(mut guard) => *guard = Some(at),
            Err(poisoned) => *poisoned.into_inner() = Some(at),
        }
        info!(at = %at, "Backup time recorded");
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            running: self.current(),
            last_backup_at: self.last_backup_at(),
        }
    }
}

/// Marks an operation as running for as long as it lives.
#[derive(Debug)]
pub struct FlightGuard {
    state: Arc<EngineState>,
    operation: Operation,
}

impl FlightGuard {
    pub const fn operation(&self) -> Operation {
        self.operation
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.state.running.store(IDLE, Ordering::Release);
        trace!(operation = ?self.operation, "Operation finished");
    }
}

/// Snapshot of engine state for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub running: Option<Operation>,
    pub last_backup_at: Option<DateTime<Utc>>,
}
