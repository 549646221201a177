//! # Transaction Merger
//!
//! Serializes batch execution against a [`DocumentStore`]. Callers submit
//! batches from any task; a single dedicated thread owns the write path and
//! runs them one at a time, each in its own write transaction.
//!
//! ```text
//!  task A ─┐                        ┌─────────────────────────────┐
//!  task B ─┼─► bounded mpsc queue ─►│ merger thread               │
//!  task C ─┘                        │  drain up to max_coalesced  │
//!                                   │  for each: begin → execute  │
//!                                   │            → commit/abort   │
//!                                   │  reply on oneshot           │
//!                                   └─────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - At most one batch executes against storage at any instant
//! - Batches run in submission order
//! - A failed batch leaves no trace in the store

use crate::batch::BatchCommand;
use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult};
use docdb_storage::DocumentStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A batch waiting for the merger thread.
struct MergeJob {
    batch: BatchCommand,
    response: oneshot::Sender<BatchResult<BatchCommand>>,
}

/// Counters maintained by the merger thread.
#[derive(Debug, Default)]
struct MergerCounters {
    committed: AtomicU64,
    failed: AtomicU64,
    rounds: AtomicU64,
}

/// Snapshot of merger activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergerStats {
    /// Batches committed.
    pub committed: u64,
    /// Batches that failed and were rolled back.
    pub failed: u64,
    /// Times the merger woke up and drained the queue.
    pub rounds: u64,
}

/// Async handle to the single-writer merger thread.
///
/// Cloning is cheap. The thread stops once every handle is dropped and the
/// queue is drained.
#[derive(Clone)]
pub struct TransactionMerger {
    tx: mpsc::Sender<MergeJob>,
    counters: Arc<MergerCounters>,
}

impl TransactionMerger {
    /// Spawns the merger thread for `store`.
    pub fn spawn(store: Arc<DocumentStore>, config: &BatchConfig) -> BatchResult<Self> {
        let (tx, rx) = mpsc::channel(config.merger_queue_size.max(1));
        let counters = Arc::new(MergerCounters::default());

        let worker = MergerWorker {
            store,
            rx,
            max_coalesced: config.max_coalesced.max(1),
            counters: Arc::clone(&counters),
        };

        std::thread::Builder::new()
            .name("docdb-tx-merger".to_string())
            .spawn(move || worker.run())?;

        Ok(Self { tx, counters })
    }

    /// Submits a batch and waits for it to commit or fail.
    ///
    /// On success the executed batch is handed back with its reply, last
    /// etag and modified collections.
    pub async fn enqueue(&self, batch: BatchCommand) -> BatchResult<BatchCommand> {
        let (response, response_rx) = oneshot::channel();

        self.tx
            .send(MergeJob { batch, response })
            .await
            .map_err(|_| BatchError::WriterClosed)?;

        response_rx.await.map_err(|_| BatchError::WriterClosed)?
    }

    /// Returns true once the merger thread has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Returns activity counters.
    pub fn stats(&self) -> MergerStats {
        MergerStats {
            committed: self.counters.committed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rounds: self.counters.rounds.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TransactionMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMerger")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

struct MergerWorker {
    store: Arc<DocumentStore>,
    rx: mpsc::Receiver<MergeJob>,
    max_coalesced: usize,
    counters: Arc<MergerCounters>,
}

impl MergerWorker {
    fn run(mut self) {
        tracing::debug!(max_coalesced = self.max_coalesced, "transaction merger started");
        let mut pending = Vec::with_capacity(self.max_coalesced);

        while let Some(job) = self.rx.blocking_recv() {
            pending.push(job);
            while pending.len() < self.max_coalesced {
                match self.rx.try_recv() {
                    Ok(job) => pending.push(job),
                    Err(_) => break,
                }
            }

            self.counters.rounds.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(batches = pending.len(), "merger round");
            for job in pending.drain(..) {
                self.execute(job);
            }
        }

        tracing::debug!("transaction merger stopped");
    }

    fn execute(&self, job: MergeJob) {
        let MergeJob {
            mut batch,
            response,
        } = job;

        if response.is_closed() {
            tracing::debug!("submitter went away before execution, skipping batch");
            return;
        }

        let result = match self.run_batch(&mut batch) {
            Ok(()) => {
                self.counters.committed.fetch_add(1, Ordering::Relaxed);
                Ok(batch)
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        };
        let _ = response.send(result);
    }

    fn run_batch(&self, batch: &mut BatchCommand) -> BatchResult<()> {
        let mut tx = self.store.begin_write();
        match batch.execute(&mut tx) {
            Ok(count) => {
                tx.commit()?;
                tracing::info!(
                    commands = count,
                    last_etag = %batch.last_etag(),
                    "batch committed"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort() {
                    tracing::warn!(error = %abort_err, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use docdb_storage::Etag;
    use serde_json::json;
    use std::collections::HashSet;

    fn spawn() -> (Arc<DocumentStore>, TransactionMerger) {
        let store = Arc::new(DocumentStore::in_memory());
        let merger = TransactionMerger::spawn(Arc::clone(&store), &BatchConfig::default()).unwrap();
        (store, merger)
    }

    #[tokio::test]
    async fn enqueue_commits() {
        let (store, merger) = spawn();

        let batch = merger
            .enqueue(BatchCommand::new(vec![
                Command::put("users/1", json!({})),
                Command::put("users/2", json!({})),
            ]))
            .await
            .unwrap();

        assert_eq!(batch.reply().len(), 2);
        assert_eq!(batch.last_etag(), Etag::new(2));
        assert_eq!(store.document_count(), 2);
        assert_eq!(store.last_etag(), Etag::new(2));
        assert_eq!(merger.stats().committed, 1);
    }

    #[tokio::test]
    async fn conflict_rolls_back_whole_batch() {
        let (store, merger) = spawn();

        let err = merger
            .enqueue(BatchCommand::new(vec![
                Command::put("users/1", json!({})),
                Command::put("users/2", json!({})).with_etag(Etag::new(999)),
            ]))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.document_count(), 0);
        assert_eq!(merger.stats().failed, 1);

        // The merger keeps serving after a failure
        merger
            .enqueue(BatchCommand::new(vec![Command::put("users/1", json!({}))]))
            .await
            .unwrap();
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_submitters_get_distinct_etags() {
        let (store, merger) = spawn();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let merger = merger.clone();
            tasks.push(tokio::spawn(async move {
                merger
                    .enqueue(BatchCommand::new(vec![Command::put(
                        format!("users/{i}"),
                        json!({"i": i}),
                    )]))
                    .await
                    .map(|batch| batch.last_etag())
            }));
        }

        let mut etags = HashSet::new();
        for task in tasks {
            etags.insert(task.await.unwrap().unwrap());
        }

        assert_eq!(etags.len(), 50);
        assert_eq!(store.last_etag(), Etag::new(50));
        let stats = merger.stats();
        assert_eq!(stats.committed, 50);
        assert!(stats.rounds <= 50);
    }

    #[tokio::test]
    async fn tracked_collections_survive_the_round_trip() {
        let (_store, merger) = spawn();

        let batch = merger
            .enqueue(
                BatchCommand::new(vec![Command::put(
                    "users/1",
                    json!({"@metadata": {"@collection": "Users"}}),
                )])
                .track_collections(),
            )
            .await
            .unwrap();

        assert!(batch.modified_collections().unwrap().contains("Users"));
    }
}
