//! Waiting for indexes to catch up with a batch.

use crate::error::{BatchError, BatchResult};
use crate::index::{IndexRegistry, WatchedIndex};
use crate::options::deadline_after;
use crate::shutdown::ShutdownSignal;
use docdb_storage::Etag;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Default time to wait for indexes.
pub const DEFAULT_INDEX_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// How to wait for indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWaitOptions {
    /// Total time allowed for all indexes.
    pub timeout: Duration,
    /// Fail with [`BatchError::IndexWaitTimeout`] when the deadline passes.
    pub throw_on_timeout: bool,
    /// Only wait for these indexes. Empty means every impacted index.
    pub specific_indexes: Vec<String>,
}

impl IndexWaitOptions {
    /// Creates options with the given timeout that throw on timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            throw_on_timeout: true,
            specific_indexes: Vec::new(),
        }
    }

    /// Sets whether a timeout fails the wait.
    #[must_use]
    pub fn throw_on_timeout(mut self, throw: bool) -> Self {
        self.throw_on_timeout = throw;
        self
    }

    /// Restricts the wait to the named indexes.
    #[must_use]
    pub fn with_specific_indexes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specific_indexes = names.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for IndexWaitOptions {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_WAIT_TIMEOUT)
    }
}

/// Per-index wait state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWaitState {
    /// Still behind the etag.
    Stale,
    /// Caught up.
    Fresh,
    /// Deadline passed while stale. Never checked again.
    TimedOut,
}

/// Result of a completed index wait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexWaitOutcome {
    /// Indexes that caught up.
    pub fresh: Vec<String>,
    /// Indexes still stale at the deadline.
    pub timed_out: Vec<String>,
    /// Time spent waiting.
    pub elapsed: Duration,
}

impl IndexWaitOutcome {
    /// Returns true if every waited index caught up.
    pub fn all_fresh(&self) -> bool {
        self.timed_out.is_empty()
    }
}

struct WaitForIndexItem {
    index: Arc<dyn WatchedIndex>,
    progress: watch::Receiver<Etag>,
    state: IndexWaitState,
}

/// Waits for the indexes impacted by a batch to process its last etag.
#[derive(Clone)]
pub struct IndexWaiter {
    registry: Arc<dyn IndexRegistry>,
}

impl IndexWaiter {
    /// Creates a waiter over `registry`.
    pub fn new(registry: Arc<dyn IndexRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the indexes a write to `modified` collections can affect,
    /// restricted to `specific` names when any are given.
    pub fn impacted(
        &self,
        modified: &HashSet<String>,
        specific: &[String],
    ) -> Vec<Arc<dyn WatchedIndex>> {
        let specific: HashSet<String> = specific.iter().map(|s| s.to_lowercase()).collect();
        self.registry
            .indexes()
            .into_iter()
            .filter(|index| specific.is_empty() || specific.contains(&index.name().to_lowercase()))
            .filter(|index| index.covers_any(modified))
            .collect()
    }

    /// Waits until every impacted index has processed `etag`.
    ///
    /// Returns immediately when nothing was modified or no index is
    /// impacted. Progress receivers are taken before the first staleness
    /// check, so progress made in between is never missed.
    pub async fn wait(
        &self,
        etag: Etag,
        modified: &HashSet<String>,
        options: &IndexWaitOptions,
        shutdown: &ShutdownSignal,
    ) -> BatchResult<IndexWaitOutcome> {
        if modified.is_empty() {
            return Ok(IndexWaitOutcome::default());
        }

        let indexes = self.impacted(modified, &options.specific_indexes);
        if indexes.is_empty() {
            return Ok(IndexWaitOutcome::default());
        }

        let started = Instant::now();
        let deadline = deadline_after(started, options.timeout);
        let index_count = indexes.len();

        let mut items: Vec<WaitForIndexItem> = indexes
            .into_iter()
            .map(|index| WaitForIndexItem {
                progress: index.subscribe(),
                index,
                state: IndexWaitState::Stale,
            })
            .collect();

        loop {
            let mut had_stale = false;

            for item in items
                .iter_mut()
                .filter(|item| item.state == IndexWaitState::Stale)
            {
                if !item.index.is_stale(etag) {
                    item.state = IndexWaitState::Fresh;
                    continue;
                }
                had_stale = true;

                let progressed = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Err(BatchError::Cancelled),
                    changed = tokio::time::timeout_at(deadline, item.progress.changed()) => changed,
                };

                match progressed {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        // Index was removed and retired
                        tracing::debug!(index = item.index.name(), "index dropped during wait");
                        item.state = IndexWaitState::Fresh;
                    }
                    Err(_) if options.throw_on_timeout => {
                        let elapsed = started.elapsed();
                        tracing::warn!(
                            index = item.index.name(),
                            %etag,
                            ?elapsed,
                            "timed out waiting for index"
                        );
                        return Err(BatchError::IndexWaitTimeout {
                            elapsed,
                            index_count,
                            etag,
                        });
                    }
                    Err(_) => {
                        tracing::warn!(index = item.index.name(), %etag, "index still stale at deadline");
                        item.state = IndexWaitState::TimedOut;
                    }
                }
            }

            if !had_stale {
                break;
            }
        }

        let mut outcome = IndexWaitOutcome {
            elapsed: started.elapsed(),
            ..IndexWaitOutcome::default()
        };
        for item in items {
            let name = item.index.name().to_string();
            match item.state {
                IndexWaitState::TimedOut => outcome.timed_out.push(name),
                IndexWaitState::Fresh | IndexWaitState::Stale => outcome.fresh.push(name),
            }
        }
        tracing::debug!(
            %etag,
            fresh = outcome.fresh.len(),
            timed_out = outcome.timed_out.len(),
            "index wait finished"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for IndexWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWaiter").finish_non_exhaustive()
    }
}
