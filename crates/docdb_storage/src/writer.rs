//! The write contract of the storage engine.

use crate::error::StorageResult;
use crate::patch::{PatchRequest, PatchStatus};
use crate::types::{ChangeVector, DocumentFlags, Etag};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::Read;

/// Document mutations available inside a write transaction.
///
/// Every operation that accepts an `expected` etag treats it as an
/// optimistic-concurrency precondition: when the stored etag differs (or
/// nothing is stored) the call fails with
/// [`StorageError::ConcurrencyConflict`](crate::StorageError::ConcurrencyConflict)
/// and the caller is expected to abort the transaction.
///
/// Etags handed out by one transaction are strictly increasing in call
/// order, and every call observes the effects of earlier calls on the same
/// transaction.
///
/// # Implementors
///
/// - [`crate::WriteTransaction`] - the in-memory engine
pub trait DocumentsWriter {
    /// Inserts or replaces a document.
    fn put(&mut self, key: &str, expected: Option<Etag>, data: Value) -> StorageResult<PutResult>;

    /// Patches a document, or creates it from `patch_if_missing` when absent.
    fn patch(
        &mut self,
        key: &str,
        expected: Option<Etag>,
        patch: &PatchRequest,
        patch_if_missing: Option<&PatchRequest>,
    ) -> StorageResult<PatchOutcome>;

    /// Deletes a document. Returns `None` if nothing was stored.
    fn delete(&mut self, key: &str, expected: Option<Etag>)
        -> StorageResult<Option<DeletedDocument>>;

    /// Deletes every document whose key starts with `prefix`.
    fn delete_prefix(&mut self, prefix: &str) -> StorageResult<Vec<DeletedDocument>>;

    /// Stores attachment content read from `content` on an existing document.
    ///
    /// `expected` is checked against the etag of an existing attachment with
    /// the same name. Implementations may read `content` fully into memory;
    /// the in-memory store does.
    fn put_attachment(
        &mut self,
        document_id: &str,
        name: &str,
        content_type: &str,
        hash: &str,
        expected: Option<Etag>,
        content: &mut dyn Read,
    ) -> StorageResult<AttachmentPutResult>;
}

/// Result of a document put.
#[derive(Debug, Clone, PartialEq)]
pub struct PutResult {
    /// Stored key.
    pub key: String,
    /// New etag.
    pub etag: Etag,
    /// Owning collection.
    pub collection: String,
    /// Change vector of the new version.
    pub change_vector: ChangeVector,
    /// Modification time.
    pub last_modified: DateTime<Utc>,
    /// Non-default flags.
    pub flags: DocumentFlags,
    /// Serialized body size in bytes.
    pub size: usize,
}

/// Result of a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    /// What happened.
    pub status: PatchStatus,
    /// New etag, `None` when the document was not modified.
    pub etag: Option<Etag>,
    /// Collection, when the document exists.
    pub collection: Option<String>,
    /// Serialized size of the modified body.
    pub modified_size: Option<usize>,
}

/// A removed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedDocument {
    /// Key of the removed document.
    pub key: String,
    /// Etag of the deletion.
    pub etag: Etag,
    /// Collection the document belonged to.
    pub collection: String,
}

/// Result of an attachment put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPutResult {
    /// Owning document key.
    pub document_id: String,
    /// Attachment name.
    pub name: String,
    /// Etag of the attachment.
    pub etag: Etag,
    /// Content hash.
    pub hash: String,
    /// MIME content type.
    pub content_type: String,
    /// Content size in bytes.
    pub size: u64,
}
