//! Document patching.
//!
//! The scripting engine proper lives outside the storage crate. The store
//! applies a patch as a JSON merge patch (RFC 7396): objects merge
//! recursively, `null` removes a field, anything else replaces.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A patch to apply to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    /// Merge-patch document.
    #[serde(rename = "Script")]
    pub script: Value,
}

impl PatchRequest {
    /// Creates a patch from a merge-patch document.
    pub fn new(script: Value) -> Self {
        Self { script }
    }

    /// Applies the patch to `target`, returning the patched body.
    #[must_use]
    pub fn apply(&self, target: &Value) -> Value {
        merge(target, &self.script)
    }
}

fn merge(target: &Value, patch: &Value) -> Value {
    let Value::Object(patch_fields) = patch else {
        return patch.clone();
    };

    let mut result = match target {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };

    for (name, value) in patch_fields {
        if value.is_null() {
            result.remove(name);
        } else {
            let merged = merge(result.get(name).unwrap_or(&Value::Null), value);
            result.insert(name.clone(), merged);
        }
    }

    Value::Object(result)
}

/// Outcome status of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchStatus {
    /// The document existed and was modified.
    Patched,
    /// The patch produced no change.
    NotModified,
    /// The document does not exist and no fallback was given.
    DocumentMissing,
    /// The patch was skipped (etag mismatch with skip requested).
    Skipped,
    /// The document was created from the fallback patch.
    Created,
}

impl std::fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PatchStatus::Patched => "Patched",
            PatchStatus::NotModified => "NotModified",
            PatchStatus::DocumentMissing => "DocumentMissing",
            PatchStatus::Skipped => "Skipped",
            PatchStatus::Created => "Created",
        };
        f.write_str(name)
    }
}
