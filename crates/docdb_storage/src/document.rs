//! Stored documents and their metadata.

use crate::types::{ChangeVector, DocumentFlags, Etag};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Metadata object embedded in every document body.
pub const METADATA: &str = "@metadata";
/// Metadata field naming the owning collection.
pub const METADATA_COLLECTION: &str = "@collection";
/// Metadata field carrying user-settable flags.
pub const METADATA_FLAGS: &str = "@flags";
/// Collection of documents that do not declare one.
pub const EMPTY_COLLECTION: &str = "@empty";

/// Returns the lookup identity of a document key.
///
/// Keys are case-insensitive; the original casing is kept on the document.
#[must_use]
pub fn key_identity(key: &str) -> String {
    key.to_lowercase()
}

/// Resolves the collection a document body belongs to.
#[must_use]
pub fn collection_of(data: &Value) -> String {
    data.get(METADATA)
        .and_then(|m| m.get(METADATA_COLLECTION))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .unwrap_or(EMPTY_COLLECTION)
        .to_string()
}

/// Reads flags declared in the body metadata (comma separated names).
#[must_use]
pub fn declared_flags(data: &Value) -> DocumentFlags {
    let Some(raw) = data
        .get(METADATA)
        .and_then(|m| m.get(METADATA_FLAGS))
        .and_then(Value::as_str)
    else {
        return DocumentFlags::NONE;
    };

    raw.split(',')
        .filter_map(|name| DocumentFlags::from_name(name.trim()))
        .fold(DocumentFlags::NONE, DocumentFlags::with)
}

/// Metadata of one attachment attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDetails {
    /// Attachment name, unique per document (case-insensitive).
    pub name: String,
    /// Content hash (lowercase hex SHA-256).
    pub hash: String,
    /// MIME content type.
    pub content_type: String,
    /// Content size in bytes.
    pub size: u64,
    /// Etag assigned when the attachment was stored.
    pub etag: Etag,
}

/// A committed (or pending) document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Key with its original casing.
    pub key: String,
    /// Etag of the last mutation.
    pub etag: Etag,
    /// Owning collection.
    pub collection: String,
    /// JSON body, including `@metadata`.
    pub data: Value,
    /// Change vector of this version.
    pub change_vector: ChangeVector,
    /// Time of the last mutation.
    pub last_modified: DateTime<Utc>,
    /// Non-default properties.
    pub flags: DocumentFlags,
    /// Attachments in insertion order.
    pub attachments: Vec<AttachmentDetails>,
}

impl Document {
    /// Returns the serialized size of the body in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        serde_json::to_vec(&self.data).map_or(0, |bytes| bytes.len())
    }

    /// Finds an attachment by name.
    #[must_use]
    pub fn attachment(&self, name: &str) -> Option<&AttachmentDetails> {
        self.attachments
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_defaults_to_empty() {
        assert_eq!(collection_of(&json!({"name": "A"})), EMPTY_COLLECTION);
        assert_eq!(
            collection_of(&json!({"@metadata": {"@collection": ""}})),
            EMPTY_COLLECTION
        );
    }

    #[test]
    fn collection_from_metadata() {
        let doc = json!({"name": "A", "@metadata": {"@collection": "Users"}});
        assert_eq!(collection_of(&doc), "Users");
    }

    #[test]
    fn declared_flags_parsed() {
        let doc = json!({"@metadata": {"@flags": "Imported, Bogus"}});
        assert_eq!(declared_flags(&doc), DocumentFlags::IMPORTED);
        assert!(declared_flags(&json!({})).is_empty());
    }

    #[test]
    fn key_identity_is_case_insensitive() {
        assert_eq!(key_identity("Users/1"), key_identity("users/1"));
    }
}
