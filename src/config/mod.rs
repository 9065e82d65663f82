//! Engine configuration.
//!
//! Loads the optional TOML config file and derives the storage layout that
//! the live stores, the backup directory and the restore scratch area live in.

mod path;
mod schema;

pub use path::{PathResolver, default_config_path, default_data_dir, home_dir, resolve_path};
pub use schema::{ArchiveLimits, EngineConfig, StorageLayout};
