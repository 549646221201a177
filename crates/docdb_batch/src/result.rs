//! Per-command results of a batch.

use crate::command::CommandType;
use chrono::{DateTime, Utc};
use docdb_storage::{
    AttachmentPutResult, ChangeVector, DeletedDocument, DocumentFlags, Etag, PatchStatus, PutResult,
};
use serde::{Serialize, Serializer};

/// Reply for a document put. All metadata is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PutReply {
    /// Stored key.
    #[serde(rename = "@id")]
    pub id: String,
    /// New etag.
    #[serde(rename = "@etag")]
    pub etag: Etag,
    /// Owning collection.
    #[serde(rename = "@collection")]
    pub collection: String,
    /// Change vector entries.
    #[serde(rename = "@change-vector")]
    pub change_vector: ChangeVector,
    /// Modification time.
    #[serde(rename = "@last-modified")]
    pub last_modified: DateTime<Utc>,
    /// Flags, emitted only when non-default.
    #[serde(rename = "@flags", skip_serializing_if = "no_flags")]
    pub flags: DocumentFlags,
}

fn no_flags(flags: &DocumentFlags) -> bool {
    flags.is_empty()
}

impl From<PutResult> for PutReply {
    fn from(result: PutResult) -> Self {
        Self {
            id: result.key,
            etag: result.etag,
            collection: result.collection,
            change_vector: result.change_vector,
            last_modified: result.last_modified,
            flags: result.flags,
        }
    }
}

/// Reply for a patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchReply {
    /// Document key.
    pub key: String,
    /// New etag, absent when nothing was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
    /// What the patch did.
    pub patch_status: PatchStatus,
    /// Collection, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

/// Reply for a single-document delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteReply {
    /// Document key.
    pub key: String,
    /// Whether a document was removed.
    pub deleted: bool,
}

/// A document removed by a prefix delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemovedDocument {
    /// Removed key.
    pub key: String,
    /// Etag of the deletion.
    pub etag: Etag,
    /// Collection the document belonged to.
    pub collection: String,
}

impl From<DeletedDocument> for RemovedDocument {
    fn from(deleted: DeletedDocument) -> Self {
        Self {
            key: deleted.key,
            etag: deleted.etag,
            collection: deleted.collection,
        }
    }
}

/// Reply for a prefix delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeletePrefixReply {
    /// The prefix.
    pub key: String,
    /// Whether anything was removed.
    pub deleted: bool,
    /// Number of removed documents.
    pub count: usize,
    /// Removed documents, in deletion order.
    pub removed: Vec<RemovedDocument>,
}

/// Reply for an attachment put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentPutReply {
    /// Owning document key.
    #[serde(rename = "@id")]
    pub document_id: String,
    /// Attachment name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Attachment etag.
    #[serde(rename = "@etag")]
    pub etag: Etag,
    /// Content hash.
    #[serde(rename = "Hash")]
    pub hash: String,
    /// MIME content type.
    #[serde(rename = "ContentType")]
    pub content_type: String,
    /// Size in bytes.
    #[serde(rename = "Size")]
    pub size: u64,
}

impl From<AttachmentPutResult> for AttachmentPutReply {
    fn from(result: AttachmentPutResult) -> Self {
        Self {
            document_id: result.document_id,
            name: result.name,
            etag: result.etag,
            hash: result.hash,
            content_type: result.content_type,
            size: result.size,
        }
    }
}

/// Result of one executed command, in input order.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Document put.
    Put(PutReply),
    /// Patch.
    Patch(PatchReply),
    /// Single delete.
    Delete(DeleteReply),
    /// Prefix delete.
    DeletePrefix(DeletePrefixReply),
    /// Attachment put.
    AttachmentPut(AttachmentPutReply),
}

impl CommandResult {
    /// Returns the wire type.
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandResult::Put(_) => CommandType::Put,
            CommandResult::Patch(_) => CommandType::Patch,
            CommandResult::Delete(_) | CommandResult::DeletePrefix(_) => CommandType::Delete,
            CommandResult::AttachmentPut(_) => CommandType::AttachmentPut,
        }
    }

    /// Returns the document key, or the prefix for a prefix delete.
    pub fn key(&self) -> &str {
        match self {
            CommandResult::Put(r) => &r.id,
            CommandResult::Patch(r) => &r.key,
            CommandResult::Delete(r) => &r.key,
            CommandResult::DeletePrefix(r) => &r.key,
            CommandResult::AttachmentPut(r) => &r.document_id,
        }
    }

    /// Returns the highest etag this command produced, if any.
    pub fn etag(&self) -> Option<Etag> {
        match self {
            CommandResult::Put(r) => Some(r.etag),
            CommandResult::Patch(r) => r.etag,
            CommandResult::Delete(_) => None,
            CommandResult::DeletePrefix(r) => r.removed.last().map(|d| d.etag),
            CommandResult::AttachmentPut(r) => Some(r.etag),
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "Type")]
    kind: CommandType,
    #[serde(flatten)]
    body: &'a T,
}

impl Serialize for CommandResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = self.command_type();
        match self {
            CommandResult::Put(body) => Tagged { kind, body }.serialize(serializer),
            CommandResult::Patch(body) => Tagged { kind, body }.serialize(serializer),
            CommandResult::Delete(body) => Tagged { kind, body }.serialize(serializer),
            CommandResult::DeletePrefix(body) => Tagged { kind, body }.serialize(serializer),
            CommandResult::AttachmentPut(body) => Tagged { kind, body }.serialize(serializer),
        }
    }
}
