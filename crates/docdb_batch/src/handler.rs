//! The bulk documents request handler.
//!
//! Ties the pieces together for one request: parse commands, stage
//! attachment streams, run the batch through the merger, then optionally
//! wait for replicas and indexes before replying.

use crate::batch::BatchCommand;
use crate::command::parse_commands;
use crate::error::{BatchResult, ResponseStatus};
use crate::index::IndexRegistry;
use crate::index_wait::{IndexWaitOutcome, IndexWaiter};
use crate::merger::TransactionMerger;
use crate::options::BatchOptions;
use crate::replication::{ReplicationTopology, ReplicationWaiter};
use crate::result::CommandResult;
use crate::shutdown::ShutdownSignal;
use crate::stager::{AttachmentReader, AttachmentStager};
use docdb_storage::{DocumentStore, Etag};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// A request body, already split by the transport layer.
pub enum BatchBody {
    /// A JSON command list.
    Json(Vec<u8>),
    /// A JSON command list followed by attachment sections, in
    /// `AttachmentPUT` order.
    Multipart {
        /// The first section: the JSON command list.
        commands: Vec<u8>,
        /// Remaining sections.
        attachments: Vec<AttachmentReader>,
    },
}

impl std::fmt::Debug for BatchBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchBody::Json(body) => f.debug_tuple("Json").field(&body.len()).finish(),
            BatchBody::Multipart {
                commands,
                attachments,
            } => f
                .debug_struct("Multipart")
                .field("commands", &commands.len())
                .field("attachments", &attachments.len())
                .finish(),
        }
    }
}

/// Reply to a successful batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    /// Always [`ResponseStatus::Created`].
    #[serde(skip)]
    pub status: ResponseStatus,
    /// Per-command results in input order.
    #[serde(rename = "Results")]
    pub results: Vec<CommandResult>,
    /// Etag of the last version-producing command.
    #[serde(skip)]
    pub last_etag: Etag,
    /// Replicas that acknowledged, when a replication wait was requested.
    #[serde(skip)]
    pub replicated: Option<usize>,
    /// Index wait result, when one was requested and ran.
    #[serde(skip)]
    pub index_wait: Option<IndexWaitOutcome>,
}

impl BatchResponse {
    /// Serializes the `{"Results": [...]}` body.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Handles bulk document requests for one database.
#[derive(Debug, Clone)]
pub struct BulkDocsHandler {
    store: Arc<DocumentStore>,
    merger: TransactionMerger,
    stager: AttachmentStager,
    index_waiter: IndexWaiter,
    replication_waiter: ReplicationWaiter,
    shutdown: ShutdownSignal,
}

impl BulkDocsHandler {
    /// Creates a handler.
    pub fn new(
        store: Arc<DocumentStore>,
        merger: TransactionMerger,
        stager: AttachmentStager,
        indexes: Arc<dyn IndexRegistry>,
        topology: Arc<dyn ReplicationTopology>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            merger,
            stager,
            index_waiter: IndexWaiter::new(indexes),
            replication_waiter: ReplicationWaiter::new(topology),
            shutdown,
        }
    }

    /// Returns the attachment stager.
    pub fn stager(&self) -> &AttachmentStager {
        &self.stager
    }

    /// Returns the merger.
    pub fn merger(&self) -> &TransactionMerger {
        &self.merger
    }

    /// Handles one request.
    ///
    /// Replication is awaited before indexes. A wait failure is reported
    /// after the batch was already committed.
    pub async fn handle(
        &self,
        body: BatchBody,
        options: &BatchOptions,
    ) -> BatchResult<BatchResponse> {
        let (commands, attachments) = match body {
            BatchBody::Json(body) => (parse_commands(&body)?, VecDeque::new()),
            BatchBody::Multipart {
                commands,
                attachments,
            } => {
                let commands = parse_commands(&commands)?;
                let staged = self.stager.stage_all(attachments, &self.shutdown).await?;
                (commands, staged)
            }
        };

        let mut batch = BatchCommand::new(commands)
            .with_attachments(attachments)
            .with_huge_documents(self.store.huge_documents());
        if options.index_wait.is_some() {
            batch = batch.track_collections();
        }
        tracing::trace!(batch = %batch, "submitting batch");

        let mut batch = self.merger.enqueue(batch).await?;
        let last_etag = batch.last_etag();

        let replicated = match &options.replication_wait {
            Some(wait) => Some(
                self.replication_waiter
                    .wait(
                        wait.replicas,
                        wait.timeout,
                        last_etag,
                        wait.throw_on_timeout,
                        &self.shutdown,
                    )
                    .await?,
            ),
            None => None,
        };

        let index_wait = match &options.index_wait {
            Some(wait) => {
                let none = HashSet::new();
                let modified = batch.modified_collections().unwrap_or(&none);
                Some(
                    self.index_waiter
                        .wait(last_etag, modified, wait, &self.shutdown)
                        .await?,
                )
            }
            None => None,
        };

        Ok(BatchResponse {
            status: ResponseStatus::Created,
            results: batch.take_reply(),
            last_etag,
            replicated,
            index_wait,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::error::BatchError;
    use crate::index::{IndexStore, TrackedIndex};
    use crate::index_wait::IndexWaitOptions;
    use crate::options::ReplicationWaitOptions;
    use crate::replication::{ReplicaCount, ReplicaSet};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Fixture {
        store: Arc<DocumentStore>,
        indexes: Arc<IndexStore>,
        replicas: Arc<ReplicaSet>,
        handler: BulkDocsHandler,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = BatchConfig::new().with_temp_dir(dir.path());
        let store = Arc::new(DocumentStore::in_memory());
        let indexes = Arc::new(IndexStore::new());
        let replicas = Arc::new(ReplicaSet::new(["b", "c"]));
        let merger = TransactionMerger::spawn(Arc::clone(&store), &config).unwrap();
        let handler = BulkDocsHandler::new(
            Arc::clone(&store),
            merger,
            AttachmentStager::new(&config),
            indexes.clone(),
            replicas.clone(),
            ShutdownSignal::never(),
        );
        Fixture {
            store,
            indexes,
            replicas,
            handler,
            _dir: dir,
        }
    }

    fn json_body(value: Value) -> BatchBody {
        BatchBody::Json(value.to_string().into_bytes())
    }

    #[tokio::test]
    async fn json_batch_replies_with_results() {
        let fx = fixture();
        let response = fx
            .handler
            .handle(
                json_body(json!([
                    {"Type": "PUT", "Key": "users/1", "Document": {"name": "A"}},
                    {"Type": "DELETE", "Key": "users/2"}
                ])),
                &BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, ResponseStatus::Created);
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.last_etag, Etag::new(1));

        let body: Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(body["Results"][0]["@id"], "users/1");
        assert_eq!(body["Results"][1]["Deleted"], false);
        assert!(fx.store.exists("users/1"));
    }

    #[tokio::test]
    async fn multipart_batch_stores_attachment() {
        let fx = fixture();
        let commands = json!([
            {"Type": "PUT", "Key": "users/1", "Document": {}},
            {"Type": "AttachmentPUT", "Key": "users/1", "Name": "a.txt", "ContentType": "text/plain"}
        ]);
        let body = BatchBody::Multipart {
            commands: commands.to_string().into_bytes(),
            attachments: vec![Box::new(&b"hello"[..])],
        };

        let response = fx.handler.handle(body, &BatchOptions::new()).await.unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(fx.handler.stager().outstanding(), 0);
        assert_eq!(fx.store.get("users/1").unwrap().attachments.len(), 1);
    }

    #[tokio::test]
    async fn conflict_maps_to_conflict_status() {
        let fx = fixture();
        let err = fx
            .handler
            .handle(
                json_body(json!([
                    {"Type": "PUT", "Key": "users/1", "Etag": 999, "Document": {}}
                ])),
                &BatchOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(err.status(), ResponseStatus::Conflict);
        assert_eq!(fx.store.document_count(), 0);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let fx = fixture();
        let err = fx
            .handler
            .handle(BatchBody::Json(b"{nope".to_vec()), &BatchOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), ResponseStatus::BadRequest);
    }

    #[tokio::test]
    async fn waits_for_impacted_indexes() {
        let fx = fixture();
        let index = fx.indexes.add(TrackedIndex::new("Users/ByName", ["Users"]));
        let store = Arc::clone(&fx.store);

        let indexer = tokio::spawn(async move {
            while store.last_etag() == Etag::ZERO {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            index.advance(store.last_etag());
        });

        let options = BatchOptions::new()
            .wait_for_indexes(IndexWaitOptions::new(Duration::from_secs(5)));
        let response = fx
            .handler
            .handle(
                json_body(json!([{
                    "Type": "PUT",
                    "Key": "users/1",
                    "Document": {"@metadata": {"@collection": "Users"}}
                }])),
                &options,
            )
            .await
            .unwrap();

        let outcome = response.index_wait.unwrap();
        assert_eq!(outcome.fresh, vec!["Users/ByName"]);
        indexer.await.unwrap();
    }

    #[tokio::test]
    async fn replication_timeout_is_server_error_after_commit() {
        let fx = fixture();
        let options = BatchOptions::new().wait_for_replicas(
            ReplicationWaitOptions::new(Duration::from_millis(20)).replicas(ReplicaCount::Majority),
        );

        let err = fx
            .handler
            .handle(
                json_body(json!([{"Type": "PUT", "Key": "users/1", "Document": {}}])),
                &options,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::ReplicationWaitTimeout { requested: 2, .. }));
        assert_eq!(err.status(), ResponseStatus::ServerError);
        // The batch itself was committed
        assert!(fx.store.exists("users/1"));
    }

    #[tokio::test]
    async fn replication_acknowledged() {
        let fx = fixture();
        let replicas = Arc::clone(&fx.replicas);
        let store = Arc::clone(&fx.store);

        let acker = tokio::spawn(async move {
            while store.last_etag() == Etag::ZERO {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            replicas.acknowledge("b", store.last_etag());
        });

        let options = BatchOptions::new()
            .wait_for_replicas(ReplicationWaitOptions::new(Duration::from_secs(5)));
        let response = fx
            .handler
            .handle(
                json_body(json!([{"Type": "PUT", "Key": "users/1", "Document": {}}])),
                &options,
            )
            .await
            .unwrap();

        assert_eq!(response.replicated, Some(1));
        acker.await.unwrap();
    }
}
