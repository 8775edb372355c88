//! Content hashing for stored definitions and catalog fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::CalculatedFieldDefinition;

/// Compute SHA256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing, ensuring deterministic output.
/// Returns a 64-character lowercase hexadecimal string.
///
/// # Errors
/// Returns an error if the value cannot be serialized to JSON.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// A 63-bit version number derived from a value's hash.
///
/// Used where a version must change whenever content changes but no counter
/// is available, such as a live schema.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    let hash = compute_hash(value)?;
    // 16 hex digits always parse; the top bit is cleared to fit SQLite's i64.
    let prefix = u64::from_str_radix(&hash[..16], 16).unwrap_or_default();
    Ok(prefix >> 1)
}

/// Hash of the user-visible content of a definition.
pub fn content_hash(def: &CalculatedFieldDefinition) -> Result<String, serde_json::Error> {
    compute_hash(&(
        def.scope_id.as_str(),
        &def.name,
        &def.display_name,
        &def.expression_text,
        def.result_type,
    ))
}
