//! Ready-made join resolvers.
//!
//! A static join resolves a parent document to child ids; a selector join
//! resolves it to a selector over the child collection. Returning `None`
//! means the parent references nothing.

use rejoin_core::document::{id_from_value, lookup_path};
use rejoin_core::{DocId, Document};
use rejoin_query::Selector;
use serde_json::{Map, Value};

/// Resolver of a static join.
pub type StaticResolver = dyn Fn(&Document) -> Option<Vec<DocId>>;

/// Resolver of a selector join.
pub type SelectorResolver = dyn Fn(&Document) -> Option<Selector>;

/// Reads child ids from a (possibly dotted) parent field holding an id or an
/// array of ids. Absent or null fields resolve to `None`.
pub fn field_ids(field: impl Into<String>) -> impl Fn(&Document) -> Option<Vec<DocId>> {
    let field = field.into();
    move |doc| {
        let values = lookup_path(doc, &field);
        if values.is_empty() {
            return None;
        }
        let mut ids = Vec::new();
        for value in values {
            match value {
                Value::Array(items) => ids.extend(items.iter().filter_map(id_from_value)),
                Value::Null => {}
                other => ids.extend(id_from_value(other)),
            }
        }
        if ids.is_empty() {
            None
        } else {
            Some(ids)
        }
    }
}

/// Selects children whose `child_field` equals the parent's `parent_field`.
/// An absent parent field resolves to `None`.
pub fn field_equals(
    child_field: impl Into<String>,
    parent_field: impl Into<String>,
) -> impl Fn(&Document) -> Option<Selector> {
    let child_field = child_field.into();
    let parent_field = parent_field.into();
    move |doc| {
        let value = doc.get(&parent_field)?;
        if value.is_null() {
            return None;
        }
        let mut selector = Map::new();
        selector.insert(child_field.clone(), value.clone());
        Some(Value::Object(selector))
    }
}
