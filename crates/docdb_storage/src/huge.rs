//! Tracking of unusually large documents.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Remembers the most recent documents whose size exceeded a threshold.
///
/// Bounded: once `capacity` entries are held, the oldest is evicted.
/// A key that is written again moves to the back with its new size.
#[derive(Debug)]
pub struct HugeDocuments {
    threshold: usize,
    capacity: usize,
    entries: Mutex<VecDeque<(String, usize)>>,
}

impl HugeDocuments {
    /// Creates a tracker.
    #[must_use]
    pub fn new(threshold: usize, capacity: usize) -> Self {
        Self {
            threshold,
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Records `key` if `size` exceeds the threshold. Returns whether it did.
    pub fn add_if_huge(&self, key: &str, size: usize) -> bool {
        if size <= self.threshold || self.capacity == 0 {
            return false;
        }

        let mut entries = self.entries.lock();
        entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        entries.push_back((key.to_string(), size));
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        tracing::debug!(key, size, threshold = self.threshold, "huge document recorded");
        true
    }

    /// Returns true if `key` is currently tracked.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Returns the tracked `(key, size)` pairs, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Returns the size threshold in bytes.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_documents_ignored() {
        let huge = HugeDocuments::new(10, 4);
        assert!(!huge.add_if_huge("a", 10));
        assert!(huge.snapshot().is_empty());
    }

    #[test]
    fn rewrite_moves_to_back() {
        let huge = HugeDocuments::new(1, 4);
        huge.add_if_huge("a", 5);
        huge.add_if_huge("b", 6);
        huge.add_if_huge("A", 7);

        let snapshot = huge.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, "b");
        assert_eq!(snapshot[1], ("A".to_string(), 7));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let huge = HugeDocuments::new(0, 2);
        huge.add_if_huge("a", 1);
        huge.add_if_huge("b", 1);
        huge.add_if_huge("c", 1);

        assert!(!huge.contains("a"));
        assert!(huge.contains("b"));
        assert!(huge.contains("c"));
    }
}
