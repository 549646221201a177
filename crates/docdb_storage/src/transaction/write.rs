//! Write transaction.

use crate::document::{collection_of, declared_flags, key_identity, AttachmentDetails, Document};
use crate::error::{StorageError, StorageResult};
use crate::patch::{PatchRequest, PatchStatus};
use crate::store::DocumentStore;
use crate::transaction::state::{PendingChanges, PendingWrite, TransactionState};
use crate::types::{ChangeVector, DocumentFlags, Etag};
use crate::writer::{AttachmentPutResult, DeletedDocument, DocumentsWriter, PatchOutcome, PutResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::MutexGuard;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Read;
use uuid::Uuid;

/// A write transaction holding the store's exclusive write lock.
///
/// Reads through the transaction see its own uncommitted writes. Nothing
/// becomes visible to other readers until [`commit`](Self::commit). Dropping
/// an uncommitted transaction aborts it.
pub struct WriteTransaction<'a> {
    store: &'a DocumentStore,
    changes: PendingChanges,
    now: DateTime<Utc>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(store: &'a DocumentStore, guard: MutexGuard<'a, ()>, base: Etag) -> Self {
        Self {
            store,
            changes: PendingChanges::new(base),
            now: Utc::now(),
            _guard: guard,
        }
    }

    /// Reads a document as this transaction sees it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Document> {
        self.get_by_identity(&key_identity(key))
    }

    fn get_by_identity(&self, id: &str) -> Option<Document> {
        match self.changes.get(id) {
            Some(PendingWrite::Put(doc)) => Some((**doc).clone()),
            Some(PendingWrite::Delete { .. }) => None,
            None => self.store.get_by_identity(id),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.changes.state()
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.changes.is_active()
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.changes.write_count()
    }

    /// Returns the highest etag allocated so far.
    #[must_use]
    pub fn last_etag(&self) -> Etag {
        self.changes.last_etag()
    }

    /// Commits the transaction, publishing all writes atomically.
    ///
    /// Returns the highest etag the transaction produced. The write lock is
    /// released when this returns.
    pub fn commit(mut self) -> StorageResult<Etag> {
        self.changes.ensure_active()?;
        let last_etag = self.changes.last_etag();
        let (writes, blobs) = self.changes.take();
        let count = writes.len();

        self.store.publish(writes, blobs, last_etag);
        self.changes.mark_committed();

        tracing::trace!(writes = count, %last_etag, "write transaction committed");
        Ok(last_etag)
    }

    /// Aborts the transaction. All pending writes are discarded.
    pub fn abort(mut self) -> StorageResult<()> {
        self.changes.ensure_active()?;
        self.changes.mark_aborted();
        Ok(())
    }

    fn database_id(&self) -> Uuid {
        self.store.database_id()
    }

    fn generate_key(prefix: &str, etag: Etag) -> String {
        if prefix.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{prefix}{:019}", etag.as_u64())
        }
    }
}

fn check_expected(key: &str, expected: Option<Etag>, actual: Option<Etag>) -> StorageResult<()> {
    match expected {
        Some(expected) if actual != Some(expected) => {
            Err(StorageError::conflict(key, expected, actual))
        }
        _ => Ok(()),
    }
}

impl DocumentsWriter for WriteTransaction<'_> {
    fn put(&mut self, key: &str, expected: Option<Etag>, data: Value) -> StorageResult<PutResult> {
        // An empty key or a trailing '/' asks the store to generate one
        let generated = key.is_empty() || key.ends_with('/');
        let existing = if generated {
            None
        } else {
            self.get_by_identity(&key_identity(key))
        };
        check_expected(key, expected, existing.as_ref().map(|d| d.etag))?;

        let collection = collection_of(&data);
        if let Some(existing) = &existing {
            if !existing.collection.eq_ignore_ascii_case(&collection) {
                return Err(StorageError::invalid_operation(format!(
                    "cannot move '{key}' from collection '{}' to '{collection}'",
                    existing.collection
                )));
            }
        }

        let etag = self.changes.next_etag()?;
        let key = if generated {
            Self::generate_key(key, etag)
        } else {
            key.to_string()
        };

        let (change_vector, attachments) = match existing {
            Some(doc) => (doc.change_vector, doc.attachments),
            None => (ChangeVector::new(), Vec::new()),
        };
        let mut flags = declared_flags(&data);
        if !attachments.is_empty() {
            flags = flags.with(DocumentFlags::HAS_ATTACHMENTS);
        }

        let doc = Document {
            key: key.clone(),
            etag,
            collection: collection.clone(),
            data,
            change_vector: change_vector.advanced(self.database_id(), etag),
            last_modified: self.now,
            flags,
            attachments,
        };
        let result = PutResult {
            key,
            etag,
            collection,
            change_vector: doc.change_vector.clone(),
            last_modified: doc.last_modified,
            flags,
            size: doc.size(),
        };

        self.changes.put(key_identity(&result.key), doc)?;
        Ok(result)
    }

    fn patch(
        &mut self,
        key: &str,
        expected: Option<Etag>,
        patch: &PatchRequest,
        patch_if_missing: Option<&PatchRequest>,
    ) -> StorageResult<PatchOutcome> {
        let id = key_identity(key);
        let existing = self.get_by_identity(&id);
        check_expected(key, expected, existing.as_ref().map(|d| d.etag))?;

        let Some(doc) = existing else {
            let Some(fallback) = patch_if_missing else {
                return Ok(PatchOutcome {
                    status: PatchStatus::DocumentMissing,
                    etag: None,
                    collection: None,
                    modified_size: None,
                });
            };

            let data = fallback.apply(&Value::Object(Map::new()));
            let etag = self.changes.next_etag()?;
            let created = Document {
                key: key.to_string(),
                etag,
                collection: collection_of(&data),
                flags: declared_flags(&data),
                data,
                change_vector: ChangeVector::new().advanced(self.database_id(), etag),
                last_modified: self.now,
                attachments: Vec::new(),
            };
            let outcome = PatchOutcome {
                status: PatchStatus::Created,
                etag: Some(etag),
                collection: Some(created.collection.clone()),
                modified_size: Some(created.size()),
            };
            self.changes.put(id, created)?;
            return Ok(outcome);
        };

        let patched = patch.apply(&doc.data);
        if patched == doc.data {
            return Ok(PatchOutcome {
                status: PatchStatus::NotModified,
                etag: None,
                collection: Some(doc.collection),
                modified_size: None,
            });
        }

        let etag = self.changes.next_etag()?;
        let change_vector = doc.change_vector.advanced(self.database_id(), etag);
        let updated = Document {
            etag,
            data: patched,
            change_vector,
            last_modified: self.now,
            ..doc
        };
        let outcome = PatchOutcome {
            status: PatchStatus::Patched,
            etag: Some(etag),
            collection: Some(updated.collection.clone()),
            modified_size: Some(updated.size()),
        };
        self.changes.put(id, updated)?;
        Ok(outcome)
    }

    fn delete(
        &mut self,
        key: &str,
        expected: Option<Etag>,
    ) -> StorageResult<Option<DeletedDocument>> {
        let id = key_identity(key);
        let existing = self.get_by_identity(&id);
        check_expected(key, expected, existing.as_ref().map(|d| d.etag))?;

        let Some(doc) = existing else {
            return Ok(None);
        };

        let etag = self.changes.next_etag()?;
        self.changes.delete(id, etag)?;
        Ok(Some(DeletedDocument {
            key: doc.key,
            etag,
            collection: doc.collection,
        }))
    }

    fn delete_prefix(&mut self, prefix: &str) -> StorageResult<Vec<DeletedDocument>> {
        let prefix_id = key_identity(prefix);

        let mut live: BTreeMap<String, Document> = self
            .store
            .committed_with_prefix(&prefix_id)
            .into_iter()
            .collect();
        for (id, write) in self.changes.with_prefix(&prefix_id) {
            match write {
                PendingWrite::Put(doc) => {
                    live.insert(id.clone(), (**doc).clone());
                }
                PendingWrite::Delete { .. } => {
                    live.remove(id);
                }
            }
        }

        let mut deleted = Vec::with_capacity(live.len());
        for (id, doc) in live {
            let etag = self.changes.next_etag()?;
            self.changes.delete(id, etag)?;
            deleted.push(DeletedDocument {
                key: doc.key,
                etag,
                collection: doc.collection,
            });
        }
        Ok(deleted)
    }

    fn put_attachment(
        &mut self,
        document_id: &str,
        name: &str,
        content_type: &str,
        hash: &str,
        expected: Option<Etag>,
        content: &mut dyn Read,
    ) -> StorageResult<AttachmentPutResult> {
        let id = key_identity(document_id);
        let Some(doc) = self.get_by_identity(&id) else {
            return Err(StorageError::document_not_found(document_id));
        };
        let existing = doc.attachment(name).map(|a| a.etag);
        check_expected(&format!("{}/{name}", doc.key), expected, existing)?;

        // The in-memory store keeps blobs as `Bytes`, so the whole stream is
        // buffered here while the write lock is held
        let mut buffer = Vec::new();
        content.read_to_end(&mut buffer)?;
        let size = buffer.len() as u64;

        let doc_etag = self.changes.next_etag()?;
        let attachment_etag = self.changes.next_etag()?;

        let mut attachments = doc.attachments.clone();
        attachments.retain(|a| !a.name.eq_ignore_ascii_case(name));
        attachments.push(AttachmentDetails {
            name: name.to_string(),
            hash: hash.to_string(),
            content_type: content_type.to_string(),
            size,
            etag: attachment_etag,
        });

        let result = AttachmentPutResult {
            document_id: doc.key.clone(),
            name: name.to_string(),
            etag: attachment_etag,
            hash: hash.to_string(),
            content_type: content_type.to_string(),
            size,
        };

        let updated = Document {
            etag: doc_etag,
            change_vector: doc.change_vector.advanced(self.database_id(), doc_etag),
            last_modified: self.now,
            flags: doc.flags.with(DocumentFlags::HAS_ATTACHMENTS),
            attachments,
            ..doc
        };

        self.changes.put_blob(hash.to_string(), Bytes::from(buffer))?;
        self.changes.put(id, updated)?;
        Ok(result)
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if self.changes.is_active() {
            tracing::debug!(
                writes = self.changes.write_count(),
                "write transaction dropped without commit, aborting"
            );
            self.changes.mark_aborted();
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("state", &self.changes.state())
            .field("writes", &self.changes.write_count())
            .field("last_etag", &self.changes.last_etag())
            .finish_non_exhaustive()
    }
}
