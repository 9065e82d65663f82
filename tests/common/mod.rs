//! Common test utilities for the pv CLI and library.
//!
//! - `cli`: CLI runner with output verification and fluent assertions
//! - `fixtures`: Seeded data directories and hand-built archives
//! - `assertions`: JSON and terminal output checks
#![allow(dead_code)]


use tracing_subscriber::EnvFilter;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
