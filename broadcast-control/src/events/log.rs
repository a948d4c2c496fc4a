//! Bounded append-only history.

use std::collections::VecDeque;

use parking_lot::RwLock;

/// Append-only log keeping the most recent `capacity` entries.
///
/// The oldest entry is evicted when a push would exceed the capacity.
/// Reads return copies, so callers never hold the lock.
#[derive(Debug)]
pub struct BoundedLog<T> {
    entries: RwLock<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: T) {
        let mut entries = self.entries.write();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    /// Up to `limit` matching entries, newest first.
    pub fn recent_matching<F>(&self, limit: usize, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|entry| predicate(entry))
            .take(limit)
            .cloned()
            .collect()
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_first() {
        let log = BoundedLog::with_capacity(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.snapshot(), vec![2, 3, 4]);
        assert_eq!(log.recent(2), vec![4, 3]);
    }

    #[test]
    fn test_hundred_entry_cap() {
        let log = BoundedLog::with_capacity(100);
        for i in 0..250 {
            log.push(i);
        }
        assert_eq!(log.len(), 100);
        assert_eq!(log.snapshot().first(), Some(&150));
    }

    #[test]
    fn test_recent_matching() {
        let log = BoundedLog::with_capacity(10);
        for i in 0..10 {
            log.push(i);
        }
        assert_eq!(log.recent_matching(2, |v| v % 2 == 0), vec![8, 6]);
    }
}
