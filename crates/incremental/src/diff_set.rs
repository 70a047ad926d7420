//! Net additions and removals within one diff window.
//!
//! A `DiffSet` consolidates membership changes the way a consolidated
//! collection consolidates deltas: an addition cancels a pending removal of
//! the same key and vice versa, so `added ∩ removed` is always empty.

use std::collections::BTreeSet;

/// Pending additions and removals, kept in key order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffSet<K: Ord> {
    added: BTreeSet<K>,
    removed: BTreeSet<K>,
}

impl<K: Ord> Default for DiffSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> DiffSet<K> {
    /// Creates an empty diff set.
    pub fn new() -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Records an addition, cancelling a pending removal.
    pub fn insert(&mut self, key: K) {
        if !self.removed.remove(&key) {
            self.added.insert(key);
        }
    }

    /// Records a removal, cancelling a pending addition.
    pub fn remove(&mut self, key: K) {
        if !self.added.remove(&key) {
            self.removed.insert(key);
        }
    }

    /// Returns true if `key` is a pending addition.
    #[inline]
    pub fn is_added(&self, key: &K) -> bool {
        self.added.contains(key)
    }

    /// Returns true if `key` is a pending removal.
    #[inline]
    pub fn is_removed(&self, key: &K) -> bool {
        self.removed.contains(key)
    }

    /// Drains one pending addition. Returns false if it was not pending.
    pub fn take_added(&mut self, key: &K) -> bool {
        self.added.remove(key)
    }

    /// Drains one pending removal. Returns false if it was not pending.
    pub fn take_removed(&mut self, key: &K) -> bool {
        self.removed.remove(key)
    }

    /// Pending additions in key order.
    #[inline]
    pub fn added(&self) -> &BTreeSet<K> {
        &self.added
    }

    /// Pending removals in key order.
    #[inline]
    pub fn removed(&self) -> &BTreeSet<K> {
        &self.removed
    }

    /// Returns true if nothing is pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Takes everything pending as `(added, removed)`.
    pub fn take(&mut self) -> (BTreeSet<K>, BTreeSet<K>) {
        (
            std::mem::take(&mut self.added),
            std::mem::take(&mut self.removed),
        )
    }

    /// Folds another diff into this one, in order: its additions, then its
    /// removals.
    pub fn merge(&mut self, other: DiffSet<K>) {
        for key in other.added {
            self.insert(key);
        }
        for key in other.removed {
            self.remove(key);
        }
    }

    /// Clears both sides.
    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_remove_cancels() {
        let mut diff = DiffSet::new();
        diff.insert("a");
        diff.remove("a");
        assert!(diff.is_empty());
    }

    #[test]
    fn test_remove_then_insert_cancels() {
        let mut diff = DiffSet::new();
        diff.remove("a");
        diff.insert("a");
        assert!(diff.is_empty());
    }

    #[test]
    fn test_repeated_insert_is_idempotent() {
        let mut diff = DiffSet::new();
        diff.insert("a");
        diff.insert("a");
        assert_eq!(diff.added().len(), 1);
        assert!(diff.take_added(&"a"));
        assert!(!diff.take_added(&"a"));
    }

    #[test]
    fn test_take_returns_sorted_sides() {
        let mut diff = DiffSet::new();
        diff.insert(3);
        diff.insert(1);
        diff.remove(2);
        let (added, removed) = diff.take();
        assert_eq!(added.into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(removed.into_iter().collect::<Vec<_>>(), vec![2]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_merge_cancels_across_diffs() {
        let mut first = DiffSet::new();
        first.insert("a");
        first.remove("b");

        let mut second = DiffSet::new();
        second.insert("b");
        second.remove("a");
        second.insert("c");

        first.merge(second);
        assert!(first.is_added(&"c"));
        assert!(!first.is_added(&"a"));
        assert!(!first.is_removed(&"b"));
        assert_eq!(first.added().len(), 1);
        assert!(first.removed().is_empty());
    }
}
