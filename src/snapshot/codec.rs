//! Manifest encoding and decoding.
//!
//! The manifest is pretty-printed JSON. Decoding checks `formatVersion`
//! before anything else so a manifest from a different format generation is
//! rejected with a version error rather than a confusing field error.

use serde_json::Value;
use tracing::{debug, warn};

use super::schema::{FORMAT_VERSION, Snapshot};
use crate::error::FormatError;

/// Archive entry name of the manifest.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Serializes a snapshot to manifest bytes.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, FormatError> {
    snapshot.validate()?;
    let bytes = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| FormatError::Unparsable(e.to_string()))?;
    debug!(bytes = bytes.len(), "Encoded manifest");
    Ok(bytes)
}

/// Parses manifest bytes into a validated snapshot.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, FormatError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| FormatError::Unparsable(e.to_string()))?;

    let Value::Object(fields) = &value else {
        return Err(FormatError::Unparsable(
            "manifest root is not an object".to_string(),
        ));
    };

    let found = fields
        .get("formatVersion")
        .ok_or(FormatError::MissingVersion)?;
    let found = found.as_i64().ok_or_else(|| FormatError::InvalidField {
        field: "formatVersion".to_string(),
        reason: format!("expected an integer, found {found}"),
    })?;
    if found != i64::from(FORMAT_VERSION) {
        warn!(found, supported = FORMAT_VERSION, "Unsupported manifest version");
        return Err(FormatError::VersionMismatch {
            found,
            supported: FORMAT_VERSION,
        });
    }

    let snapshot: Snapshot =
        serde_json::from_value(value).map_err(|e| FormatError::Unparsable(e.to_string()))?;
    snapshot.validate()?;
    debug!(
        created_at = %snapshot.created_at,
        records = snapshot.vocabulary_records.len(),
        "Decoded manifest"
    );
    Ok(snapshot)
}
