//! Document model.
//!
//! Documents are JSON objects keyed by field name. Every stored document has an
//! `_id` field; its string form is the document's [`DocId`].

use serde_json::{Map, Value};

/// Unique identifier for a document within a collection.
pub type DocId = String;

/// A document: a JSON object.
pub type Document = Map<String, Value>;

/// Name of the identity field.
pub const ID_FIELD: &str = "_id";

/// Returns the id of a document, if it has a usable `_id`.
pub fn doc_id(doc: &Document) -> Option<DocId> {
    doc.get(ID_FIELD).and_then(id_from_value)
}

/// Converts an `_id` value into a [`DocId`].
///
/// Strings are used as-is and numbers by their decimal form; other value kinds
/// cannot serve as ids.
pub fn id_from_value(value: &Value) -> Option<DocId> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Builds a document from a JSON value, returning `None` for non-objects.
pub fn from_value(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Resolves a dotted path against a document.
///
/// Arrays on the way are traversed element-wise unless the next segment is a
/// numeric index, so `tags.name` over `tags: [{name: "a"}, {name: "b"}]`
/// yields both names.
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut segments = path.split('.');
    let first = match segments.next() {
        Some(s) => s,
        None => return Vec::new(),
    };
    let mut current: Vec<&Value> = match doc.get(first) {
        Some(v) => vec![v],
        None => return Vec::new(),
    };
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            descend(value, segment, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

fn descend<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(segment) {
                out.push(v);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(v) = items.get(index) {
                    out.push(v);
                }
            } else {
                for item in items {
                    if let Value::Object(map) = item {
                        if let Some(v) = map.get(segment) {
                            out.push(v);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Sets a dotted path, creating intermediate objects as needed.
///
/// Returns false if an intermediate value exists but is not an object or an
/// indexable array.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> bool {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
            true
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_in_value(entry, rest, value)
        }
    }
}

fn set_in_value(target: &mut Value, path: &str, value: Value) -> bool {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };
    let slot = match target {
        Value::Object(map) => match rest {
            Some(_) => map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            None => {
                map.insert(head.to_string(), value);
                return true;
            }
        },
        Value::Array(items) => {
            let index = match head.parse::<usize>() {
                Ok(i) => i,
                Err(_) => return false,
            };
            while items.len() <= index {
                items.push(Value::Null);
            }
            match rest {
                Some(_) => &mut items[index],
                None => {
                    items[index] = value;
                    return true;
                }
            }
        }
        _ => return false,
    };
    match rest {
        Some(r) => set_in_value(slot, r, value),
        None => true,
    }
}

/// Removes a dotted path. Returns true if something was removed.
pub fn unset_path(doc: &mut Document, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => doc.remove(path).is_some(),
        Some((parent, leaf)) => {
            let mut segments = parent.split('.');
            let first = match segments.next() {
                Some(s) => s,
                None => return false,
            };
            let mut current = match doc.get_mut(first) {
                Some(v) => v,
                None => return false,
            };
            for segment in segments {
                current = match current {
                    Value::Object(map) => match map.get_mut(segment) {
                        Some(v) => v,
                        None => return false,
                    },
                    Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                        Some(v) => v,
                        None => return false,
                    },
                    _ => return false,
                };
            }
            match current {
                Value::Object(map) => map.remove(leaf).is_some(),
                Value::Array(items) => match leaf.parse::<usize>() {
                    // Unsetting an array slot nulls it, it does not shift the array.
                    Ok(i) if i < items.len() => {
                        items[i] = Value::Null;
                        true
                    }
                    _ => false,
                },
                _ => false,
            }
        }
    }
}
