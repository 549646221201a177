//! Test fixtures and node helpers.
//!
//! A [`TestNode`] wires an in-memory store, a transaction merger, an index
//! registry and a replica set behind a bulk documents handler, the same way
//! a server would.

use docdb_batch::{
    AttachmentReader, AttachmentStager, BatchBody, BatchConfig, BatchOptions, BatchResponse,
    BatchResult, BulkDocsHandler, IndexStore, ReplicaSet, ShutdownTrigger, TrackedIndex,
    TransactionMerger,
};
use docdb_storage::{DocumentStore, StoreConfig};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A local node with automatic cleanup of its staging directory.
pub struct TestNode {
    /// The document store.
    pub store: Arc<DocumentStore>,
    /// Indexes the node knows about.
    pub indexes: Arc<IndexStore>,
    /// Replicas of the node.
    pub replicas: Arc<ReplicaSet>,
    /// The request handler.
    pub handler: BulkDocsHandler,
    trigger: ShutdownTrigger,
    _temp_dir: TempDir,
}

impl TestNode {
    /// Creates a node with default store settings and no indexes or replicas.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::new())
    }

    /// Creates a node with the given store settings.
    pub fn with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let batch_config = BatchConfig::new().with_temp_dir(temp_dir.path());

        let store = Arc::new(DocumentStore::new(config));
        let indexes = Arc::new(IndexStore::new());
        let replicas = Arc::new(ReplicaSet::new(Vec::<String>::new()));
        let (trigger, signal) = ShutdownTrigger::new();

        let merger = TransactionMerger::spawn(Arc::clone(&store), &batch_config)
            .expect("Failed to spawn transaction merger");
        let handler = BulkDocsHandler::new(
            Arc::clone(&store),
            merger,
            AttachmentStager::new(&batch_config),
            indexes.clone(),
            replicas.clone(),
            signal,
        );

        Self {
            store,
            indexes,
            replicas,
            handler,
            trigger,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the attachment staging directory.
    pub fn temp_dir(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Returns the merger behind the handler.
    pub fn merger(&self) -> &TransactionMerger {
        self.handler.merger()
    }

    /// Registers an index over `collections`. An empty list covers all.
    pub fn add_index<I, S>(&self, name: &str, collections: I) -> Arc<TrackedIndex>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.add(TrackedIndex::new(name, collections))
    }

    /// Adds a replica that has acknowledged nothing.
    pub fn add_replica(&self, name: &str) {
        self.replicas.add_replica(name);
    }

    /// Advances every index to the store's last etag.
    pub fn catch_up_indexes(&self) {
        self.indexes.catch_up(self.store.last_etag());
    }

    /// Acknowledges the store's last etag on `replica`.
    pub fn acknowledge(&self, replica: &str) {
        self.replicas.acknowledge(replica, self.store.last_etag());
    }

    /// Cancels pending waits and staging.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    /// Submits a JSON command list.
    pub async fn submit(&self, commands: Value, options: &BatchOptions) -> BatchResult<BatchResponse> {
        self.handler
            .handle(BatchBody::Json(commands.to_string().into_bytes()), options)
            .await
    }

    /// Submits a command list with attachment streams.
    pub async fn submit_with_attachments(
        &self,
        commands: Value,
        attachments: Vec<Vec<u8>>,
        options: &BatchOptions,
    ) -> BatchResult<BatchResponse> {
        let attachments = attachments
            .into_iter()
            .map(|bytes| Box::new(std::io::Cursor::new(bytes)) as AttachmentReader)
            .collect();
        self.handler
            .handle(
                BatchBody::Multipart {
                    commands: commands.to_string().into_bytes(),
                    attachments,
                },
                options,
            )
            .await
    }

    /// Spawns a task that keeps indexes and the named replicas caught up
    /// until the node shuts down. Must be called inside a tokio runtime.
    pub fn spawn_follower(&self, replicas: Vec<String>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let indexes = Arc::clone(&self.indexes);
        let replica_set = Arc::clone(&self.replicas);
        let shutdown = self.trigger.signal();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(2)) => {
                        let etag = store.last_etag();
                        indexes.catch_up(etag);
                        for name in &replicas {
                            replica_set.acknowledge(name, etag);
                        }
                    }
                }
            }
        })
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestNode {
    type Target = DocumentStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use docdb_storage::DocumentsWriter;
    use serde_json::json;

    /// Creates a node with `count` documents `users/{i}` in the `Users`
    /// collection.
    pub fn populated_node(count: usize) -> TestNode {
        let node = TestNode::new();
        let mut tx = node.store.begin_write();
        for i in 0..count {
            tx.put(
                &format!("users/{i}"),
                None,
                json!({"index": i, "@metadata": {"@collection": "Users"}}),
            )
            .expect("Failed to put document");
        }
        tx.commit().expect("Failed to commit");
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docdb_storage::Etag;
    use serde_json::json;

    #[tokio::test]
    async fn submit_round_trip() {
        let node = TestNode::new();
        let response = node
            .submit(
                json!([{"Type": "PUT", "Key": "users/1", "Document": {}}]),
                &BatchOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(node.exists("users/1"));
    }

    #[test]
    fn populated_scenario() {
        let node = scenarios::populated_node(10);
        assert_eq!(node.document_count(), 10);
        assert_eq!(node.last_etag(), Etag::new(10));
    }

    #[test]
    fn catch_up_helpers() {
        let node = scenarios::populated_node(3);
        let index = node.add_index("Users/All", ["Users"]);
        node.add_replica("b");

        node.catch_up_indexes();
        node.acknowledge("b");

        assert_eq!(index.processed(), Etag::new(3));
        assert_eq!(node.replicas.acknowledged("b"), Some(Etag::new(3)));
    }
}
