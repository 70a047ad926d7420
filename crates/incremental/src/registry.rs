//! Reference-counted foreign-key registry.
//!
//! The registry is a bipartite index between composite source keys
//! (`owner:source`, one parent edge as seen by one join node) and the child
//! keys those edges reference. A child key is live while at least one
//! composite key references it; its refcount is the number of such keys.
//!
//! Two diffs are produced by every mutation:
//!
//! - the registry-wide diff (`added` / `removed`), tracking child keys whose
//!   refcount moved between 0 and 1 since the last [`clear`](ForeignKeyRegistry::clear);
//! - an owner-level delta returned to the caller, tracking child keys the
//!   calling owner started or stopped referencing through any of its sources.
//!
//! The first owner to reference a child key is its primary owner and stays
//! primary until it releases every one of its references to that key. The
//! owner whose release drops a refcount to 0 is recorded as its releaser
//! until the next clear.

use crate::diff_set::DiffSet;
use hashbrown::{HashMap, HashSet};
use rejoin_core::{CompositeKey, DocId, OwnerId, Result};
use std::collections::BTreeSet;

/// Child keys an owner started (`added`) or stopped (`removed`) referencing.
pub type OwnerDelta = DiffSet<DocId>;

/// Reverse edges of one child key, grouped by owner in first-reference order.
#[derive(Clone, Debug, Default)]
struct ChildRefs {
    owners: Vec<(OwnerId, BTreeSet<DocId>)>,
}

impl ChildRefs {
    fn ref_count(&self) -> usize {
        self.owners.iter().map(|(_, sources)| sources.len()).sum()
    }
}

/// The reference-counted bipartite index shared by every join node that
/// targets the same collection under one root.
#[derive(Debug, Default)]
pub struct ForeignKeyRegistry {
    source_to_child: HashMap<CompositeKey, BTreeSet<DocId>>,
    child_to_source: HashMap<DocId, ChildRefs>,
    diff: DiffSet<DocId>,
    releasers: HashMap<DocId, OwnerId>,
    published: HashSet<DocId>,
}

impl ForeignKeyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `keys` into the forward set of `owner:source`.
    pub fn add<I>(&mut self, owner: OwnerId, source: &str, keys: I) -> OwnerDelta
    where
        I: IntoIterator<Item = DocId>,
    {
        let mut delta = OwnerDelta::new();
        let mut keys = keys.into_iter().peekable();
        if keys.peek().is_none() {
            return delta;
        }

        let composite = CompositeKey::new(owner, source);
        let forward = self.source_to_child.entry(composite).or_default();
        let fresh: Vec<DocId> = keys.filter(|key| forward.insert(key.clone())).collect();

        for key in fresh {
            self.link(owner, source, key, &mut delta);
        }
        delta
    }

    /// Sets the forward set of `owner:source` to exactly `keys`, touching only
    /// the symmetric difference. An empty `keys` clears the edge.
    pub fn replace<I>(&mut self, owner: OwnerId, source: &str, keys: I) -> OwnerDelta
    where
        I: IntoIterator<Item = DocId>,
    {
        let next: BTreeSet<DocId> = keys.into_iter().collect();
        let composite = CompositeKey::new(owner, source);
        let current = self
            .source_to_child
            .get(&composite)
            .cloned()
            .unwrap_or_default();

        let fresh: Vec<DocId> = next.difference(&current).cloned().collect();
        let dropped: Vec<DocId> = current.difference(&next).cloned().collect();

        let mut delta = self.add(owner, source, fresh);
        delta.merge(self.remove_children(owner, source, dropped));
        delta
    }

    /// Drops every forward edge of `owner:source`. Unknown keys are a no-op.
    pub fn remove(&mut self, owner: OwnerId, source: &str) -> OwnerDelta {
        let composite = CompositeKey::new(owner, source);
        match self.source_to_child.remove(&composite) {
            Some(forward) => {
                let mut delta = OwnerDelta::new();
                for key in forward {
                    self.unlink(owner, source, &key, &mut delta);
                }
                delta
            }
            None => OwnerDelta::new(),
        }
    }

    /// Drops the edge named by an assembled `owner:source` key.
    pub fn remove_assembled(&mut self, key: &str) -> Result<OwnerDelta> {
        let composite = CompositeKey::disassemble(key)?;
        Ok(self.remove(composite.owner(), composite.source()))
    }

    /// Drops some of the forward edges of `owner:source`.
    pub fn remove_children<I>(&mut self, owner: OwnerId, source: &str, keys: I) -> OwnerDelta
    where
        I: IntoIterator<Item = DocId>,
    {
        let mut delta = OwnerDelta::new();
        let composite = CompositeKey::new(owner, source);
        let forward = match self.source_to_child.get_mut(&composite) {
            Some(forward) => forward,
            None => return delta,
        };
        let dropped: Vec<DocId> = keys.into_iter().filter(|key| forward.remove(key)).collect();
        if forward.is_empty() {
            self.source_to_child.remove(&composite);
        }
        for key in dropped {
            self.unlink(owner, source, &key, &mut delta);
        }
        delta
    }

    fn link(&mut self, owner: OwnerId, source: &str, key: DocId, delta: &mut OwnerDelta) {
        let refs = self.child_to_source.entry(key.clone()).or_default();
        let first_reference = refs.owners.is_empty();
        match refs.owners.iter_mut().find(|(o, _)| *o == owner) {
            Some((_, sources)) => {
                sources.insert(source.to_string());
            }
            None => {
                let mut sources = BTreeSet::new();
                sources.insert(source.to_string());
                refs.owners.push((owner, sources));
                delta.insert(key.clone());
            }
        }
        if first_reference {
            tracing::trace!("Child {} referenced by {}:{}", key, owner, source);
            self.releasers.remove(&key);
            self.diff.insert(key);
        }
    }

    fn unlink(&mut self, owner: OwnerId, source: &str, key: &DocId, delta: &mut OwnerDelta) {
        let refs = match self.child_to_source.get_mut(key) {
            Some(refs) => refs,
            None => return,
        };
        if let Some(pos) = refs.owners.iter().position(|(o, _)| *o == owner) {
            let sources = &mut refs.owners[pos].1;
            sources.remove(source);
            if sources.is_empty() {
                refs.owners.remove(pos);
                delta.remove(key.clone());
            }
        }
        if refs.owners.is_empty() {
            self.child_to_source.remove(key);
            tracing::trace!("Child {} released by {}:{}", key, owner, source);
            self.diff.remove(key.clone());
            if self.diff.is_removed(key) {
                self.releasers.insert(key.clone(), owner);
            }
        }
    }

    /// Returns true if `owner` is the primary owner of `key`.
    pub fn is_primary_for_child_key(&self, owner: OwnerId, key: &str) -> bool {
        self.primary_owner(key) == Some(owner)
    }

    /// Returns the primary owner of `key`, if it is referenced.
    pub fn primary_owner(&self, key: &str) -> Option<OwnerId> {
        self.child_to_source
            .get(key)
            .and_then(|refs| refs.owners.first())
            .map(|(owner, _)| *owner)
    }

    /// Returns true if `owner` dropped the last reference to `key` since the
    /// last clear.
    pub fn is_releaser(&self, owner: OwnerId, key: &str) -> bool {
        self.releasers.get(key) == Some(&owner)
    }

    /// Returns true if any source of `owner` references `key`.
    pub fn has_child_key(&self, owner: OwnerId, key: &str) -> bool {
        self.child_to_source
            .get(key)
            .map(|refs| refs.owners.iter().any(|(o, _)| *o == owner))
            .unwrap_or(false)
    }

    /// Returns true if anything references `key`.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.child_to_source.contains_key(key)
    }

    /// Number of composite keys referencing `key`.
    pub fn ref_count(&self, key: &str) -> usize {
        self.child_to_source
            .get(key)
            .map(ChildRefs::ref_count)
            .unwrap_or(0)
    }

    /// The forward set of `owner:source`.
    pub fn children_of(&self, owner: OwnerId, source: &str) -> Option<&BTreeSet<DocId>> {
        self.source_to_child.get(&CompositeKey::new(owner, source))
    }

    /// Composite keys referencing `key`, primary owner first.
    pub fn sources_of(&self, key: &str) -> Vec<CompositeKey> {
        self.child_to_source
            .get(key)
            .map(|refs| {
                refs.owners
                    .iter()
                    .flat_map(|(owner, sources)| {
                        sources.iter().map(move |s| CompositeKey::new(*owner, s.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sources of `owner` whose forward set contains `key`.
    pub fn owner_sources_of(&self, owner: OwnerId, key: &str) -> Vec<DocId> {
        self.child_to_source
            .get(key)
            .and_then(|refs| refs.owners.iter().find(|(o, _)| *o == owner))
            .map(|(_, sources)| sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live child keys.
    #[inline]
    pub fn child_count(&self) -> usize {
        self.child_to_source.len()
    }

    /// Number of live composite keys.
    #[inline]
    pub fn source_count(&self) -> usize {
        self.source_to_child.len()
    }

    /// Returns true if no edges are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.source_to_child.is_empty()
    }

    /// The registry-wide diff since the last clear.
    #[inline]
    pub fn diff(&self) -> &DiffSet<DocId> {
        &self.diff
    }

    /// Child keys newly referenced since the last clear.
    #[inline]
    pub fn added(&self) -> &BTreeSet<DocId> {
        self.diff.added()
    }

    /// Child keys newly released since the last clear.
    #[inline]
    pub fn removed(&self) -> &BTreeSet<DocId> {
        self.diff.removed()
    }

    /// Drains one key from the added side.
    pub fn take_added(&mut self, key: &str) -> bool {
        self.diff.take_added(&key.to_string())
    }

    /// Drains one key from the removed side.
    pub fn take_removed(&mut self, key: &str) -> bool {
        self.releasers.remove(key);
        self.diff.take_removed(&key.to_string())
    }

    /// Empties the registry-wide diff.
    pub fn clear(&mut self) {
        self.diff.clear();
        self.releasers.clear();
    }

    /// Records that `key` was announced at the publication boundary.
    pub fn mark_published(&mut self, key: &str) {
        self.published.insert(key.to_string());
    }

    /// Forgets an announcement. Returns false if `key` was never announced.
    pub fn unmark_published(&mut self, key: &str) -> bool {
        self.published.remove(key)
    }

    /// Returns true if `key` is currently announced.
    #[inline]
    pub fn is_published(&self, key: &str) -> bool {
        self.published.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(keys: &[&str]) -> Vec<DocId> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn sorted(set: &BTreeSet<DocId>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_add_records_new_children() {
        let mut registry = ForeignKeyRegistry::new();
        let delta = registry.add(1, "s", ids(&["a", "b"]));

        assert_eq!(sorted(registry.added()), vec!["a", "b"]);
        assert_eq!(sorted(delta.added()), vec!["a", "b"]);
        assert_eq!(registry.ref_count("a"), 1);
        assert!(registry.has_child_key(1, "a"));
        assert!(!registry.has_child_key(2, "a"));
    }

    #[test]
    fn test_add_empty_is_noop() {
        let mut registry = ForeignKeyRegistry::new();
        let delta = registry.add(1, "s", Vec::new());
        assert!(delta.is_empty());
        assert!(registry.is_empty());
        assert!(registry.children_of(1, "s").is_none());
    }

    #[test]
    fn test_add_twice_is_idempotent() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s", ids(&["a"]));
        registry.clear();
        let delta = registry.add(1, "s", ids(&["a"]));

        assert!(delta.is_empty());
        assert!(registry.diff().is_empty());
        assert_eq!(registry.ref_count("a"), 1);
    }

    #[test]
    fn test_replace_touches_symmetric_difference() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s", ids(&["a", "b", "c"]));
        registry.clear();

        let delta = registry.replace(1, "s", ids(&["a", "c", "d"]));
        assert_eq!(sorted(registry.added()), vec!["d"]);
        assert_eq!(sorted(registry.removed()), vec!["b"]);
        assert_eq!(sorted(delta.added()), vec!["d"]);
        assert_eq!(sorted(delta.removed()), vec!["b"]);
    }

    #[test]
    fn test_replace_with_empty_clears_edge() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s", ids(&["a"]));
        registry.clear();

        registry.replace(1, "s", Vec::new());
        assert!(registry.children_of(1, "s").is_none());
        assert_eq!(sorted(registry.removed()), vec!["a"]);
    }

    #[test]
    fn test_add_then_remove_cancels_in_window() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s", ids(&["a"]));
        registry.remove(1, "s");
        assert!(registry.diff().is_empty());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = ForeignKeyRegistry::new();
        assert!(registry.remove(7, "missing").is_empty());
        assert!(registry.diff().is_empty());
    }

    #[test]
    fn test_refcount_across_owners() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s1", ids(&["a"]));
        registry.add(2, "s2", ids(&["a"]));
        registry.clear();

        let delta = registry.remove(1, "s1");
        assert_eq!(sorted(delta.removed()), vec!["a"]);
        assert!(registry.contains("a"));
        assert!(registry.removed().is_empty());

        registry.remove(2, "s2");
        assert!(!registry.contains("a"));
        assert_eq!(sorted(registry.removed()), vec!["a"]);
    }

    #[test]
    fn test_same_owner_two_sources() {
        let mut registry = ForeignKeyRegistry::new();
        let first = registry.add(1, "s1", ids(&["a"]));
        let second = registry.add(1, "s2", ids(&["a"]));
        assert_eq!(sorted(first.added()), vec!["a"]);
        assert!(second.is_empty());
        assert_eq!(registry.ref_count("a"), 2);

        let delta = registry.remove(1, "s1");
        assert!(delta.is_empty());
        assert!(registry.has_child_key(1, "a"));
        assert_eq!(registry.ref_count("a"), 1);

        let delta = registry.remove(1, "s2");
        assert_eq!(sorted(delta.removed()), vec!["a"]);
    }

    #[test]
    fn test_primary_is_first_owner_until_released() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s1", ids(&["a"]));
        registry.add(2, "s2", ids(&["a"]));
        registry.add(1, "s3", ids(&["a"]));
        assert!(registry.is_primary_for_child_key(1, "a"));

        registry.remove(1, "s1");
        assert!(registry.is_primary_for_child_key(1, "a"));

        registry.remove(1, "s3");
        assert!(registry.is_primary_for_child_key(2, "a"));
        assert!(!registry.is_primary_for_child_key(1, "a"));
    }

    #[test]
    fn test_releaser_is_last_owner_out() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s1", ids(&["a"]));
        registry.add(2, "s2", ids(&["a"]));
        registry.clear();

        registry.remove(1, "s1");
        assert!(!registry.is_releaser(1, "a"));
        registry.remove(2, "s2");
        assert!(registry.is_releaser(2, "a"));
        assert!(!registry.is_releaser(1, "a"));

        registry.add(3, "s3", ids(&["a"]));
        assert!(!registry.is_releaser(2, "a"));
        assert!(registry.diff().is_empty());
    }

    #[test]
    fn test_sources_of_lists_primary_first() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(5, "x", ids(&["a"]));
        registry.add(3, "y", ids(&["a"]));
        let sources: Vec<String> = registry
            .sources_of("a")
            .iter()
            .map(CompositeKey::assemble)
            .collect();
        assert_eq!(sources, vec!["5:x".to_string(), "3:y".to_string()]);
        assert_eq!(registry.owner_sources_of(3, "a"), ids(&["y"]));
    }

    #[test]
    fn test_remove_assembled() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(4, "p1", ids(&["a"]));
        let delta = registry.remove_assembled("4:p1").unwrap();
        assert_eq!(sorted(delta.removed()), vec!["a"]);
        assert!(registry.remove_assembled("nope").is_err());
    }

    #[test]
    fn test_remove_children_keeps_rest() {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s", ids(&["a", "b"]));
        registry.remove_children(1, "s", ids(&["a", "zzz"]));
        assert_eq!(sorted(registry.children_of(1, "s").unwrap()), vec!["b"]);
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_published_marks() {
        let mut registry = ForeignKeyRegistry::new();
        registry.mark_published("a");
        assert!(registry.is_published("a"));
        assert!(registry.unmark_published("a"));
        assert!(!registry.unmark_published("a"));
    }
}
