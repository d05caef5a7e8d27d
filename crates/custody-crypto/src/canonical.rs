use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Errors from canonical encoding.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("value cannot be represented as canonical JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Canonical bytes of any serializable value (RFC 8785 / JCS).
///
/// The value is first lowered to a `serde_json::Value`, so struct field order
/// and map insertion order never reach the output. Object keys are sorted,
/// there is no insignificant whitespace, and numbers use the ECMAScript
/// shortest round-trip form.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_jcs::to_vec(&value)?)
}

/// Canonical bytes of a field mapping.
pub fn canonicalize_fields(fields: &BTreeMap<String, Value>) -> Result<Vec<u8>, CanonicalError> {
    canonicalize(fields)
}
