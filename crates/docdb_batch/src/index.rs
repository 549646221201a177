//! Index registry contract and an in-memory registry.
//!
//! The index engine itself lives elsewhere. The batch path only needs to
//! know which indexes cover which collections, whether an index has
//! processed a given etag, and a way to be woken when it makes progress.

use docdb_storage::Etag;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

/// An index whose progress can be observed.
pub trait WatchedIndex: Send + Sync {
    /// Index name.
    fn name(&self) -> &str;

    /// Collections the index covers. Empty means every collection.
    fn collections(&self) -> &[String];

    /// Returns true if the index has not yet processed `etag`.
    fn is_stale(&self, etag: Etag) -> bool;

    /// Returns a receiver that is notified on every indexing batch.
    ///
    /// The receiver only reports progress made after this call.
    fn subscribe(&self) -> watch::Receiver<Etag>;

    /// Returns true if a write to one of `collections` can affect this index.
    fn covers_any(&self, collections: &HashSet<String>) -> bool {
        let own = self.collections();
        own.is_empty()
            || own
                .iter()
                .any(|c| collections.iter().any(|m| m.eq_ignore_ascii_case(c)))
    }
}

/// Lookup of the indexes defined on a database.
pub trait IndexRegistry: Send + Sync {
    /// Returns every index.
    fn indexes(&self) -> Vec<Arc<dyn WatchedIndex>>;
}

/// An index whose processed etag is advanced by its owner.
///
/// Retiring the index drops its progress sender, so pending subscribers
/// observe a closed channel instead of waiting for progress that will
/// never come.
#[derive(Debug)]
pub struct TrackedIndex {
    name: String,
    collections: Vec<String>,
    sender: Mutex<Option<watch::Sender<Etag>>>,
    current: watch::Receiver<Etag>,
}

impl TrackedIndex {
    /// Creates an index that has processed nothing.
    pub fn new<I, S>(name: impl Into<String>, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, current) = watch::channel(Etag::ZERO);
        Self {
            name: name.into(),
            collections: collections.into_iter().map(Into::into).collect(),
            sender: Mutex::new(Some(sender)),
            current,
        }
    }

    /// Records that the index processed everything up to `etag`.
    ///
    /// Progress never moves backwards. Retired indexes ignore the call.
    pub fn advance(&self, etag: Etag) {
        let advanced = match &*self.sender.lock() {
            Some(sender) => sender.send_if_modified(|current| {
                if etag > *current {
                    *current = etag;
                    true
                } else {
                    false
                }
            }),
            None => false,
        };
        if advanced {
            tracing::trace!(index = %self.name, %etag, "index advanced");
        }
    }

    /// Returns the last processed etag.
    pub fn processed(&self) -> Etag {
        *self.current.borrow()
    }

    /// Closes the progress channel. Called when the index is removed.
    pub fn retire(&self) {
        if self.sender.lock().take().is_some() {
            tracing::debug!(index = %self.name, "index retired");
        }
    }

    /// Returns true once the index has been retired.
    pub fn is_retired(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl WatchedIndex for TrackedIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn collections(&self) -> &[String] {
        &self.collections
    }

    fn is_stale(&self, etag: Etag) -> bool {
        self.processed() < etag
    }

    fn subscribe(&self) -> watch::Receiver<Etag> {
        match &*self.sender.lock() {
            Some(sender) => sender.subscribe(),
            // Sender is gone, so `changed()` on this clone fails right away
            None => self.current.clone(),
        }
    }
}

/// In-memory registry of [`TrackedIndex`]es, keyed by case-insensitive name.
#[derive(Debug, Default)]
pub struct IndexStore {
    indexes: RwLock<BTreeMap<String, Arc<TrackedIndex>>>,
}

impl IndexStore {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an index. A replaced index is retired.
    pub fn add(&self, index: TrackedIndex) -> Arc<TrackedIndex> {
        let index = Arc::new(index);
        let replaced = self
            .indexes
            .write()
            .insert(index.name.to_lowercase(), Arc::clone(&index));
        if let Some(replaced) = replaced {
            replaced.retire();
        }
        index
    }

    /// Gets an index by name.
    pub fn get(&self, name: &str) -> Option<Arc<TrackedIndex>> {
        self.indexes.read().get(&name.to_lowercase()).cloned()
    }

    /// Removes and retires an index.
    pub fn remove(&self, name: &str) -> Option<Arc<TrackedIndex>> {
        let removed = self.indexes.write().remove(&name.to_lowercase());
        if let Some(index) = &removed {
            index.retire();
        }
        removed
    }

    /// Advances every index to `etag`.
    pub fn catch_up(&self, etag: Etag) {
        for index in self.indexes.read().values() {
            index.advance(etag);
        }
    }

    /// Returns the number of indexes.
    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    /// Returns true if no index is defined.
    pub fn is_empty(&self) -> bool {
        self.indexes.read().is_empty()
    }
}

impl IndexRegistry for IndexStore {
    fn indexes(&self) -> Vec<Arc<dyn WatchedIndex>> {
        self.indexes
            .read()
            .values()
            .map(|index| Arc::clone(index) as Arc<dyn WatchedIndex>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn advance_is_monotonic() {
        let index = TrackedIndex::new("Users/ByName", ["Users"]);
        assert!(index.is_stale(Etag::new(1)));

        index.advance(Etag::new(5));
        index.advance(Etag::new(3));
        assert_eq!(index.processed(), Etag::new(5));
        assert!(!index.is_stale(Etag::new(5)));
        assert!(index.is_stale(Etag::new(6)));
    }

    #[tokio::test]
    async fn subscribers_see_progress() {
        let index = TrackedIndex::new("Users/ByName", ["Users"]);
        let mut rx = index.subscribe();

        index.advance(Etag::new(2));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Etag::new(2));
    }

    #[test]
    fn coverage() {
        let users = TrackedIndex::new("Users/ByName", ["Users"]);
        let all = TrackedIndex::new("AllDocs", Vec::<String>::new());

        assert!(users.covers_any(&set(&["users", "Orders"])));
        assert!(!users.covers_any(&set(&["Orders"])));
        assert!(all.covers_any(&set(&["Orders"])));
    }

    #[test]
    fn store_lookup_and_catch_up() {
        let store = IndexStore::new();
        store.add(TrackedIndex::new("Users/ByName", ["Users"]));
        store.add(TrackedIndex::new("Orders/ByDate", ["Orders"]));
        assert_eq!(store.len(), 2);

        let index = store.get("users/byname").unwrap();
        store.catch_up(Etag::new(9));
        assert_eq!(index.processed(), Etag::new(9));

        let orders = store.remove("Orders/ByDate").unwrap();
        assert!(orders.is_retired());
        assert_eq!(IndexRegistry::indexes(&store).len(), 1);
    }

    #[tokio::test]
    async fn retiring_closes_subscribers() {
        let index = TrackedIndex::new("Users/ByName", ["Users"]);
        let mut before = index.subscribe();

        index.retire();
        assert!(before.changed().await.is_err());
        assert!(index.subscribe().changed().await.is_err());

        index.advance(Etag::new(3));
        assert_eq!(index.processed(), Etag::ZERO);
    }

    #[test]
    fn replacing_retires_previous() {
        let store = IndexStore::new();
        let old = store.add(TrackedIndex::new("Users/ByName", ["Users"]));
        let new = store.add(TrackedIndex::new("users/byname", ["Users"]));
        assert!(old.is_retired());
        assert!(!new.is_retired());
    }
}
