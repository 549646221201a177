//! Replication topology contract and the replica quorum waiter.

use crate::error::{BatchError, BatchResult};
use crate::options::deadline_after;
use crate::shutdown::ShutdownSignal;
use docdb_storage::Etag;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// What the batch path needs to know about replication.
pub trait ReplicationTopology: Send + Sync {
    /// Number of replicas in the topology.
    fn size(&self) -> usize;

    /// Smallest number of replicas exceeding half the topology.
    fn majority_size(&self) -> usize {
        self.size() / 2 + 1
    }

    /// Number of replicas that acknowledged `etag` or a later one.
    fn replicated_count(&self, etag: Etag) -> usize;

    /// Returns a receiver that is notified on every acknowledgment.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// How many replicas to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaCount {
    /// A fixed number of replicas.
    Exact(usize),
    /// A majority of the topology, resolved when the wait starts.
    Majority,
}

impl ReplicaCount {
    /// Resolves to a concrete replica count.
    pub fn resolve(self, topology: &dyn ReplicationTopology) -> usize {
        match self {
            ReplicaCount::Exact(n) => n,
            ReplicaCount::Majority => topology.majority_size(),
        }
    }
}

impl Default for ReplicaCount {
    fn default() -> Self {
        ReplicaCount::Exact(1)
    }
}

impl FromStr for ReplicaCount {
    type Err = BatchError;

    fn from_str(s: &str) -> BatchResult<Self> {
        if s.eq_ignore_ascii_case("majority") {
            return Ok(ReplicaCount::Majority);
        }
        s.trim().parse::<usize>().map(ReplicaCount::Exact).map_err(|_| {
            BatchError::malformed(format!(
                "invalid integer for numberOfReplicasToWaitFor: '{s}'"
            ))
        })
    }
}

impl fmt::Display for ReplicaCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaCount::Exact(n) => write!(f, "{n}"),
            ReplicaCount::Majority => f.write_str("majority"),
        }
    }
}

/// In-memory topology whose replicas report acknowledged etags.
#[derive(Debug)]
pub struct ReplicaSet {
    acknowledged: RwLock<BTreeMap<String, Etag>>,
    epoch: watch::Sender<u64>,
}

impl ReplicaSet {
    /// Creates a topology with the named replicas, none of which has
    /// acknowledged anything.
    pub fn new<I, S>(replicas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (epoch, _) = watch::channel(0);
        Self {
            acknowledged: RwLock::new(
                replicas
                    .into_iter()
                    .map(|name| (name.into(), Etag::ZERO))
                    .collect(),
            ),
            epoch,
        }
    }

    /// Adds a replica.
    pub fn add_replica(&self, name: impl Into<String>) {
        self.acknowledged.write().entry(name.into()).or_insert(Etag::ZERO);
    }

    /// Records that `replica` has everything up to `etag`.
    ///
    /// Returns false for an unknown replica. Acknowledgments never move
    /// backwards.
    pub fn acknowledge(&self, replica: &str, etag: Etag) -> bool {
        {
            let mut acknowledged = self.acknowledged.write();
            let Some(current) = acknowledged.get_mut(replica) else {
                return false;
            };
            if etag <= *current {
                return true;
            }
            *current = etag;
        }
        self.epoch.send_modify(|epoch| *epoch += 1);
        tracing::trace!(replica, %etag, "replica acknowledged");
        true
    }

    /// Returns the last etag `replica` acknowledged.
    pub fn acknowledged(&self, replica: &str) -> Option<Etag> {
        self.acknowledged.read().get(replica).copied()
    }
}

impl ReplicationTopology for ReplicaSet {
    fn size(&self) -> usize {
        self.acknowledged.read().len()
    }

    fn replicated_count(&self, etag: Etag) -> usize {
        self.acknowledged
            .read()
            .values()
            .filter(|acked| **acked >= etag)
            .count()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }
}

/// Waits until enough replicas acknowledged an etag.
#[derive(Clone)]
pub struct ReplicationWaiter {
    topology: Arc<dyn ReplicationTopology>,
}

impl ReplicationWaiter {
    /// Creates a waiter over `topology`.
    pub fn new(topology: Arc<dyn ReplicationTopology>) -> Self {
        Self { topology }
    }

    /// Waits for `count` replicas to acknowledge `etag`.
    ///
    /// Returns the number of replicas that acknowledged. When the deadline
    /// passes first, fails with [`BatchError::ReplicationWaitTimeout`] if
    /// `throw_on_timeout` is set, otherwise returns the partial count.
    pub async fn wait(
        &self,
        count: ReplicaCount,
        timeout: Duration,
        etag: Etag,
        throw_on_timeout: bool,
        shutdown: &ShutdownSignal,
    ) -> BatchResult<usize> {
        let requested = count.resolve(self.topology.as_ref());
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        // Subscribe before the first check so no acknowledgment is missed
        let mut acks = self.topology.subscribe();

        loop {
            let achieved = self.topology.replicated_count(etag);
            if achieved >= requested {
                tracing::debug!(%etag, achieved, requested, "replication wait satisfied");
                return Ok(achieved);
            }

            let woke = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(BatchError::Cancelled),
                changed = tokio::time::timeout_at(deadline, acks.changed()) => changed,
            };
            if let Ok(Ok(())) = woke {
                continue;
            }

            // Deadline passed, or the topology went away
            let achieved = self.topology.replicated_count(etag);
            if achieved >= requested {
                return Ok(achieved);
            }
            let elapsed = started.elapsed();
            tracing::warn!(%etag, requested, achieved, ?elapsed, "replication wait timed out");
            if throw_on_timeout {
                return Err(BatchError::ReplicationWaitTimeout {
                    etag,
                    requested,
                    achieved,
                    elapsed,
                });
            }
            return Ok(achieved);
        }
    }
}

impl fmt::Debug for ReplicationWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationWaiter")
            .field("size", &self.topology.size())
            .finish()
    }
}
