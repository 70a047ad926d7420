//! Selectors and their canonical identity.
//!
//! A selector is a JSON query document in the familiar `{field: value}` /
//! `{field: {$op: value}}` form. Two selectors are considered the same matcher
//! when their canonical serializations are equal; object keys are sorted, so
//! key order does not matter.

use core::hash::Hasher;
use rejoin_core::DocId;
use serde_json::{json, Value};

/// A JSON selector.
pub type Selector = Value;

/// FNV-1a hasher used for selector fingerprints.
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self {
            state: Self::FNV_OFFSET,
        }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}

/// Canonical serialization of a selector.
///
/// Object keys come out sorted because documents are backed by ordered maps.
pub fn canonical(selector: &Selector) -> String {
    selector.to_string()
}

/// Computes a fingerprint of a canonical selector string.
pub fn fingerprint(canonical: &str) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(canonical.as_bytes());
    hasher.finish()
}

/// Builds `{_id: {$in: ids}}`.
pub fn by_ids<'a, I>(ids: I) -> Selector
where
    I: IntoIterator<Item = &'a DocId>,
{
    let ids: Vec<Value> = ids.into_iter().map(|id| Value::String(id.clone())).collect();
    json!({ "_id": { "$in": ids } })
}

/// Combines selectors with `$or`. A single selector is returned unchanged.
pub fn any_of(mut selectors: Vec<Selector>) -> Selector {
    if selectors.len() == 1 {
        return selectors.remove(0);
    }
    json!({ "$or": selectors })
}
