//! Property-based tests for the foreign-key registry.
//!
//! A naive model (a plain forward map plus first-reference owner order) is
//! driven with the same random operations as the registry, and the two are
//! compared after every step.

use proptest::prelude::*;
use rejoin_incremental::ForeignKeyRegistry;
use std::collections::{BTreeMap, BTreeSet};

const OWNERS: [u64; 3] = [1, 2, 3];
const SOURCES: [&str; 3] = ["s1", "s2", "s3"];
const CHILDREN: [&str; 5] = ["a", "b", "c", "d", "e"];

#[derive(Clone, Debug)]
enum Op {
    Add(u64, &'static str, Vec<&'static str>),
    Replace(u64, &'static str, Vec<&'static str>),
    Remove(u64, &'static str),
}

fn keys_strategy() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(CHILDREN.to_vec()), 0..4)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let owner = prop::sample::select(OWNERS.to_vec());
    let source = prop::sample::select(SOURCES.to_vec());
    prop_oneof![
        (owner.clone(), source.clone(), keys_strategy()).prop_map(|(o, s, k)| Op::Add(o, s, k)),
        (owner.clone(), source.clone(), keys_strategy())
            .prop_map(|(o, s, k)| Op::Replace(o, s, k)),
        (owner, source).prop_map(|(o, s)| Op::Remove(o, s)),
    ]
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

#[derive(Default)]
struct Model {
    forward: BTreeMap<(u64, &'static str), BTreeSet<&'static str>>,
    owner_order: BTreeMap<&'static str, Vec<u64>>,
}

impl Model {
    fn apply(&mut self, op: &Op) {
        match op {
            Op::Add(o, s, keys) => {
                if !keys.is_empty() {
                    self.forward.entry((*o, *s)).or_default().extend(keys.iter().copied());
                }
            }
            Op::Replace(o, s, keys) => {
                if keys.is_empty() {
                    self.forward.remove(&(*o, *s));
                } else {
                    self.forward.insert((*o, *s), keys.iter().copied().collect());
                }
            }
            Op::Remove(o, s) => {
                self.forward.remove(&(*o, *s));
            }
        }
        self.sync_owner_order();
    }

    fn owners_of(&self, child: &str) -> BTreeSet<u64> {
        self.forward
            .iter()
            .filter(|(_, keys)| keys.contains(child))
            .map(|((o, _), _)| *o)
            .collect()
    }

    fn sync_owner_order(&mut self) {
        for child in CHILDREN {
            let owners = self.owners_of(child);
            let order = self.owner_order.entry(child).or_default();
            order.retain(|o| owners.contains(o));
            for owner in owners {
                if !order.contains(&owner) {
                    order.push(owner);
                }
            }
        }
    }

    fn ref_count(&self, child: &str) -> usize {
        self.forward.values().filter(|keys| keys.contains(child)).count()
    }

    fn live(&self) -> BTreeSet<String> {
        CHILDREN
            .iter()
            .filter(|c| self.ref_count(c) > 0)
            .map(|c| c.to_string())
            .collect()
    }
}

fn apply(registry: &mut ForeignKeyRegistry, op: &Op) {
    match op {
        Op::Add(o, s, keys) => {
            registry.add(*o, s, owned(keys));
        }
        Op::Replace(o, s, keys) => {
            registry.replace(*o, s, owned(keys));
        }
        Op::Remove(o, s) => {
            registry.remove(*o, s);
        }
    }
}

proptest! {
    /// Property: refcounts and liveness match the naive model, and without a
    /// clear the registry-wide diff is exactly the live set.
    #[test]
    fn refcounts_match_model(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut registry = ForeignKeyRegistry::new();
        let mut model = Model::default();
        for op in &ops {
            apply(&mut registry, op);
            model.apply(op);
            for child in CHILDREN {
                prop_assert_eq!(registry.ref_count(child), model.ref_count(child));
            }
            prop_assert_eq!(registry.added().clone(), model.live());
            prop_assert!(registry.removed().is_empty());
        }
    }

    /// Property: the primary owner is the earliest owner still referencing
    /// the child.
    #[test]
    fn primary_is_stable(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut registry = ForeignKeyRegistry::new();
        let mut model = Model::default();
        for op in &ops {
            apply(&mut registry, op);
            model.apply(op);
            for child in CHILDREN {
                let expected = model.owner_order.get(child).and_then(|o| o.first()).copied();
                prop_assert_eq!(registry.primary_owner(child), expected);
            }
        }
    }

    /// Property: repeating an add changes neither the diff nor refcounts.
    #[test]
    fn add_is_idempotent(
        ops in prop::collection::vec(op_strategy(), 0..20),
        owner in prop::sample::select(OWNERS.to_vec()),
        source in prop::sample::select(SOURCES.to_vec()),
        keys in keys_strategy(),
    ) {
        let mut registry = ForeignKeyRegistry::new();
        for op in &ops {
            apply(&mut registry, op);
        }
        registry.add(owner, source, owned(&keys));
        let diff = registry.diff().clone();
        let counts: Vec<usize> = CHILDREN.iter().map(|c| registry.ref_count(c)).collect();

        let delta = registry.add(owner, source, owned(&keys));
        prop_assert!(delta.is_empty());
        prop_assert_eq!(registry.diff().clone(), diff);
        let again: Vec<usize> = CHILDREN.iter().map(|c| registry.ref_count(c)).collect();
        prop_assert_eq!(again, counts);
    }

    /// Property: on a single edge, replace reports exactly the symmetric
    /// difference.
    #[test]
    fn replace_is_diff_minimal(before in keys_strategy(), after in keys_strategy()) {
        let mut registry = ForeignKeyRegistry::new();
        registry.add(1, "s", owned(&before));
        registry.clear();
        registry.replace(1, "s", owned(&after));

        let before: BTreeSet<String> = owned(&before).into_iter().collect();
        let after: BTreeSet<String> = owned(&after).into_iter().collect();
        let added: BTreeSet<String> = after.difference(&before).cloned().collect();
        let removed: BTreeSet<String> = before.difference(&after).cloned().collect();
        prop_assert_eq!(registry.added().clone(), added);
        prop_assert_eq!(registry.removed().clone(), removed);
    }

    /// Property: adding and removing a fresh edge inside one window leaves
    /// the diff untouched.
    #[test]
    fn add_remove_cancels(
        ops in prop::collection::vec(op_strategy(), 0..20),
        keys in keys_strategy(),
    ) {
        let mut registry = ForeignKeyRegistry::new();
        for op in &ops {
            apply(&mut registry, op);
        }
        registry.clear();

        registry.add(9, "fresh", owned(&keys));
        registry.remove(9, "fresh");
        prop_assert!(registry.diff().is_empty());
    }
}

#[test]
fn test_two_owners_release_exactly_once() {
    let mut registry = ForeignKeyRegistry::new();
    registry.add(1, "s1", owned(&["a"]));
    registry.add(2, "s2", owned(&["a"]));
    registry.clear();

    registry.remove(1, "s1");
    assert!(registry.contains("a"));
    assert!(registry.removed().is_empty());

    registry.remove(2, "s2");
    registry.remove(2, "s2");
    assert_eq!(registry.removed().len(), 1);
    assert!(!registry.contains("a"));
}
