//! Transaction state.

use crate::document::Document;
use crate::error::{StorageError, StorageResult};
use crate::types::Etag;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// Represents a pending write in a transaction.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    /// Insert or update a document.
    Put(Box<Document>),
    /// Delete a document.
    Delete {
        /// Etag of the deletion.
        etag: Etag,
    },
}

/// Uncommitted changes of one write transaction.
///
/// Writes are keyed by document key identity. A later write to the same key
/// replaces the earlier one, so the overlay always holds the latest state a
/// subsequent read in the same transaction must observe.
#[derive(Debug)]
pub struct PendingChanges {
    state: TransactionState,
    writes: BTreeMap<String, PendingWrite>,
    blobs: HashMap<String, Bytes>,
    last_etag: Etag,
}

impl PendingChanges {
    /// Creates an empty change set that allocates etags after `base_etag`.
    pub(crate) fn new(base_etag: Etag) -> Self {
        Self {
            state: TransactionState::Active,
            writes: BTreeMap::new(),
            blobs: HashMap::new(),
            last_etag: base_etag,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Allocates the next etag.
    pub(crate) fn next_etag(&mut self) -> StorageResult<Etag> {
        self.ensure_active()?;
        self.last_etag = self.last_etag.next();
        Ok(self.last_etag)
    }

    /// Returns the highest etag allocated so far.
    #[must_use]
    pub fn last_etag(&self) -> Etag {
        self.last_etag
    }

    /// Records a put.
    pub(crate) fn put(&mut self, id: String, document: Document) -> StorageResult<()> {
        self.ensure_active()?;
        self.writes.insert(id, PendingWrite::Put(Box::new(document)));
        Ok(())
    }

    /// Records a delete.
    pub(crate) fn delete(&mut self, id: String, etag: Etag) -> StorageResult<()> {
        self.ensure_active()?;
        self.writes.insert(id, PendingWrite::Delete { etag });
        Ok(())
    }

    /// Records attachment content keyed by hash.
    pub(crate) fn put_blob(&mut self, hash: String, content: Bytes) -> StorageResult<()> {
        self.ensure_active()?;
        self.blobs.insert(hash, content);
        Ok(())
    }

    /// Gets a pending write for a key identity.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PendingWrite> {
        self.writes.get(id)
    }

    /// Returns pending writes whose key identity starts with `prefix`.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a PendingWrite)> + 'a {
        self.writes
            .range(prefix.to_string()..)
            .take_while(move |(id, _)| id.starts_with(prefix))
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Consumes the writes and blobs for publication.
    pub(crate) fn take(&mut self) -> (BTreeMap<String, PendingWrite>, HashMap<String, Bytes>) {
        (
            std::mem::take(&mut self.writes),
            std::mem::take(&mut self.blobs),
        )
    }

    /// Marks the transaction as committed.
    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction as aborted and discards its changes.
    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
        self.writes.clear();
        self.blobs.clear();
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> StorageResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(StorageError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(StorageError::invalid_operation("transaction already aborted"))
            }
        }
    }
}
