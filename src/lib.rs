//! Progress Vault library - snapshot backup and restore of learner progress.
//!
//! This library exposes the core functionality of the `pv` CLI for use in tests
//! and for embedding in the host application.
//!
//! # Modules
//!
//! - `snapshot`: The manifest model, its codec and state collection
//! - `archive`: Writing archives and validating untrusted ones before extraction
//! - `restore`: Merging a decoded snapshot into the live stores
//! - `engine`: Async entry points with single-flight protection
//! - `store`: Preference and record stores
//! - `config`: Configuration file handling and storage layout
//! - `error`: Error types with user-recoverable hints
#![forbid(unsafe_code)]

pub mod archive;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod restore;
pub mod snapshot;
pub mod state;
pub mod store;
