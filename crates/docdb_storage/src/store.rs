//! Document store.

use crate::config::StoreConfig;
use crate::document::{key_identity, Document};
use crate::huge::HugeDocuments;
use crate::transaction::{PendingWrite, WriteTransaction};
use crate::types::Etag;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Committed state, replaced atomically by each commit.
#[derive(Debug, Default)]
struct Committed {
    documents: BTreeMap<String, Document>,
    blobs: HashMap<String, Bytes>,
    last_etag: Etag,
}

/// An in-memory document store with single-writer transactions.
///
/// The store provides:
/// - Single-writer concurrency control via `begin_write()`
/// - Read-your-writes inside a write transaction
/// - Atomic publication of a transaction's writes on commit
/// - Strictly increasing etags across commits
///
/// ## Single-Writer Guarantee
///
/// Only one write transaction can be active at a time. `begin_write()`
/// acquires an exclusive lock that is held for the transaction's lifetime
/// and released when it is committed, aborted, or dropped.
pub struct DocumentStore {
    config: StoreConfig,
    committed: RwLock<Committed>,
    write_lock: Mutex<()>,
    huge_documents: Arc<HugeDocuments>,
}

impl DocumentStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        let huge_documents = Arc::new(HugeDocuments::new(
            config.huge_document_threshold,
            config.max_huge_documents,
        ));
        Self {
            config,
            committed: RwLock::new(Committed::default()),
            write_lock: Mutex::new(()),
            huge_documents,
        }
    }

    /// Creates an empty store with default configuration.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::default())
    }

    /// Begins a write transaction with the exclusive write lock.
    ///
    /// Blocks while another write transaction is open.
    ///
    /// # Example
    ///
    /// ```
    /// use docdb_storage::{DocumentStore, DocumentsWriter};
    /// use serde_json::json;
    ///
    /// let store = DocumentStore::in_memory();
    /// let mut tx = store.begin_write();
    /// tx.put("users/1", None, json!({"name": "A"})).unwrap();
    /// tx.commit().unwrap();
    /// assert!(store.get("users/1").is_some());
    /// ```
    pub fn begin_write(&self) -> WriteTransaction<'_> {
        let guard = self.write_lock.lock();
        let base = self.last_etag();
        WriteTransaction::new(self, guard, base)
    }

    /// Gets the latest committed version of a document.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Document> {
        self.get_by_identity(&key_identity(key))
    }

    pub(crate) fn get_by_identity(&self, id: &str) -> Option<Document> {
        self.committed.read().documents.get(id).cloned()
    }

    /// Returns committed documents whose key identity starts with `prefix`.
    pub(crate) fn committed_with_prefix(&self, prefix: &str) -> Vec<(String, Document)> {
        self.committed
            .read()
            .documents
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    }

    /// Checks if a document exists.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.committed
            .read()
            .documents
            .contains_key(&key_identity(key))
    }

    /// Returns the number of committed documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.committed.read().documents.len()
    }

    /// Returns the etag of the last committed mutation.
    #[must_use]
    pub fn last_etag(&self) -> Etag {
        self.committed.read().last_etag
    }

    /// Returns stored attachment content by hash.
    #[must_use]
    pub fn attachment_content(&self, hash: &str) -> Option<Bytes> {
        self.committed.read().blobs.get(hash).cloned()
    }

    /// Returns this node's database identity.
    #[must_use]
    pub fn database_id(&self) -> Uuid {
        self.config.database_id
    }

    /// Returns the huge documents tracker.
    #[must_use]
    pub fn huge_documents(&self) -> Arc<HugeDocuments> {
        Arc::clone(&self.huge_documents)
    }

    /// Publishes a transaction's changes. Caller holds the write lock.
    pub(crate) fn publish(
        &self,
        writes: BTreeMap<String, PendingWrite>,
        blobs: HashMap<String, Bytes>,
        last_etag: Etag,
    ) {
        let mut committed = self.committed.write();
        for (id, write) in writes {
            match write {
                PendingWrite::Put(doc) => {
                    committed.documents.insert(id, *doc);
                }
                PendingWrite::Delete { .. } => {
                    committed.documents.remove(&id);
                }
            }
        }
        committed.blobs.extend(blobs);
        committed.last_etag = committed.last_etag.max(last_etag);
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("database_id", &self.config.database_id)
            .field("last_etag", &self.last_etag())
            .field("document_count", &self.document_count())
            .finish_non_exhaustive()
    }
}
