//! Field-level diffs.
//!
//! Downstream consumers only understand top-level field replacement, so every
//! diff here is keyed by top-level field name: a change to `a.b.c` is reported
//! as a new value for the whole of `a`, and array fields are always reported
//! whole, never by index.

use crate::document::{Document, ID_FIELD};
use serde_json::Value;
use std::collections::BTreeMap;

/// The new state of one top-level field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldChange {
    /// The field now holds this value.
    Set(Value),
    /// The field was removed.
    ///
    /// Kept distinct from "not in the diff", which means untouched.
    Unset,
}

impl FieldChange {
    /// Returns the new value, or `None` for an unset field.
    #[inline]
    pub fn value(&self) -> Option<&Value> {
        match self {
            FieldChange::Set(v) => Some(v),
            FieldChange::Unset => None,
        }
    }

    /// Returns true if this change removes the field.
    #[inline]
    pub fn is_unset(&self) -> bool {
        matches!(self, FieldChange::Unset)
    }
}

/// A top-level field diff, ordered by field name.
pub type FieldDiff = BTreeMap<String, FieldChange>;

/// Returns the top-level field a dotted path belongs to.
#[inline]
pub fn top_level_field(path: &str) -> &str {
    match path.split_once('.') {
        Some((head, _)) => head,
        None => path,
    }
}

/// Converts a raw update description into a top-level field diff.
///
/// Values are taken from `full` (the post-image), because a nested path only
/// tells which top-level field moved. A touched field that is missing from
/// the post-image is reported as [`FieldChange::Unset`]. Without a post-image
/// only plain top-level `updated` entries can be reported; nested paths are
/// dropped.
pub fn diff_from_update(
    updated: &Document,
    removed: &[String],
    full: Option<&Document>,
) -> FieldDiff {
    let mut diff = FieldDiff::new();

    for (path, value) in updated {
        let top = top_level_field(path);
        match full {
            Some(doc) => {
                diff.insert(top.to_string(), current_value(doc, top));
            }
            None if top == path => {
                diff.insert(top.to_string(), FieldChange::Set(value.clone()));
            }
            None => {}
        }
    }

    for path in removed {
        let top = top_level_field(path);
        if top == path {
            diff.insert(top.to_string(), FieldChange::Unset);
        } else if let Some(doc) = full {
            diff.insert(top.to_string(), current_value(doc, top));
        }
    }

    diff.remove(ID_FIELD);
    diff
}

fn current_value(doc: &Document, field: &str) -> FieldChange {
    match doc.get(field) {
        Some(v) => FieldChange::Set(v.clone()),
        None => FieldChange::Unset,
    }
}

/// A diff that sets every field of `doc` except `_id`.
pub fn full_document_diff(doc: &Document) -> FieldDiff {
    doc.iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .map(|(k, v)| (k.clone(), FieldChange::Set(v.clone())))
        .collect()
}

/// Computes the top-level diff that turns `old` into `new`.
pub fn diff_documents(old: &Document, new: &Document) -> FieldDiff {
    let mut diff = FieldDiff::new();
    for (k, v) in new {
        if k == ID_FIELD {
            continue;
        }
        if old.get(k) != Some(v) {
            diff.insert(k.clone(), FieldChange::Set(v.clone()));
        }
    }
    for k in old.keys() {
        if k != ID_FIELD && !new.contains_key(k) {
            diff.insert(k.clone(), FieldChange::Unset);
        }
    }
    diff
}

/// Applies a diff to a document in place.
pub fn apply_diff(doc: &mut Document, diff: &FieldDiff) {
    for (field, change) in diff {
        match change {
            FieldChange::Set(v) => {
                doc.insert(field.clone(), v.clone());
            }
            FieldChange::Unset => {
                doc.remove(field);
            }
        }
    }
}
