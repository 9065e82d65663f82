//! Error types for backup and restore operations.

use thiserror::Error;

/// Primary error type for the backup engine.
///
/// Every variant is terminal: the operation that produced it was aborted and
/// no live store was left partially modified. Missing assets inside an
/// otherwise valid archive are not errors; they are counted in the restore
/// summary instead.
#[derive(Error, Debug)]
pub enum PvError {
    // Engine errors
    #[error("A backup or restore is already in progress")]
    Busy,

    #[error("Background task failed: {0}")]
    Task(String),

    // Archive errors
    #[error("Invalid backup format: {0}")]
    Format(#[from] FormatError),

    #[error("Archive rejected: {0}")]
    Security(#[from] SecurityError),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// The manifest or its container cannot be trusted as a snapshot.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("archive has no manifest")]
    MissingManifest,

    #[error("not a readable archive: {0}")]
    InvalidArchive(String),

    #[error("manifest is not valid structured text: {0}")]
    Unparsable(String),

    #[error("manifest has no formatVersion")]
    MissingVersion,

    #[error("manifest formatVersion {found} is not supported (expected {supported})")]
    VersionMismatch { found: i64, supported: u32 },

    #[error("manifest field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },
}

/// An archive entry is structurally illegal. Any one of these aborts the
/// whole restore.
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("entry '{entry}' uses an absolute path")]
    AbsolutePath { entry: String },

    #[error("entry '{entry}' contains a parent-directory component")]
    Traversal { entry: String },

    #[error("entry '{entry}' resolves outside the extraction root")]
    EscapesRoot { entry: String },

    #[error("entry '{entry}' is neither the manifest nor an asset")]
    UnexpectedEntry { entry: String },

    #[error("entry '{entry}' appears more than once")]
    DuplicateEntry { entry: String },

    #[error("entry '{entry}' is a link")]
    LinkEntry { entry: String },

    #[error("archive has {count} entries (limit {limit})")]
    TooManyEntries { count: usize, limit: usize },

    #[error("entry '{entry}' exceeds {limit} bytes")]
    EntryTooLarge { entry: String, limit: u64 },

    #[error("archive expands beyond {limit} bytes")]
    ArchiveTooLarge { limit: u64 },
}

impl PvError {
    /// Stable machine-readable label for the error class.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Task(_) => "task",
            Self::Format(_) => "format",
            Self::Security(_) => "security",
            Self::Store(_) => "store",
            Self::ConfigNotFound { .. } | Self::ConfigParse(_) | Self::ConfigInvalid(_) => {
                "config"
            }
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// Returns true if the error is recoverable by the user.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy
                | Self::Format(_)
                | Self::Security(_)
                | Self::ConfigNotFound { .. }
                | Self::ConfigParse(_)
                | Self::ConfigInvalid(_)
        )
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Busy => Some("Wait for the running backup or restore to finish"),
            Self::Format(FormatError::VersionMismatch { .. }) => {
                Some("Create a new backup with this version of pv")
            }
            Self::Format(_) => Some("Choose a backup archive created by pv backup"),
            Self::Security(_) => Some("Do not restore archives from untrusted sources"),
            Self::ConfigNotFound { .. } => Some("Check the --config path or PV_CONFIG"),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PvError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<zip::result::ZipError> for PvError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                Self::Format(FormatError::InvalidArchive(io.to_string()))
            }
            zip::result::ZipError::Io(io) => Self::Io(io),
            other => Self::Format(FormatError::InvalidArchive(other.to_string())),
        }
    }
}

/// Convenience type alias for Results using PvError.
pub type Result<T> = std::result::Result<T, PvError>;
