//! Normalized change events.
//!
//! A raw change-feed event names dotted paths and may omit the document; a
//! `ChangeEvent` carries a top-level field diff and the authoritative full
//! document, which is what join nodes consume.

use rejoin_core::{diff_from_update, DocId, Document, Error, FieldDiff, Result};
use rejoin_storage::{OperationType, RawChangeEvent};

/// One change to one document of a watched collection.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    /// A document was inserted.
    Added { id: DocId, doc: Document },
    /// Top-level fields of a document changed. Fields removed by the update
    /// appear as [`FieldChange::Unset`](rejoin_core::FieldChange::Unset).
    Changed {
        id: DocId,
        diff: FieldDiff,
        doc: Document,
    },
    /// A document was replaced wholesale.
    Replaced { id: DocId, doc: Document },
    /// A document was deleted.
    Removed { id: DocId },
}

impl ChangeEvent {
    /// Converts a raw event. Returns `None` for events that carry nothing the
    /// engine acts on: unknown operation types and updates whose post-image
    /// was no longer available.
    pub fn normalize(collection: &str, raw: &RawChangeEvent) -> Result<Option<Self>> {
        let id = raw.id().to_string();
        let event = match raw.operation_type {
            OperationType::Insert => match &raw.full_document {
                Some(doc) => ChangeEvent::Added {
                    id,
                    doc: doc.clone(),
                },
                None => return Err(Error::missing_full_document(collection, id)),
            },
            OperationType::Update => {
                let doc = match &raw.full_document {
                    Some(doc) => doc.clone(),
                    None => {
                        tracing::trace!("Update of {}/{} has no post-image, skipping", collection, id);
                        return Ok(None);
                    }
                };
                let diff = match &raw.update_description {
                    Some(desc) => {
                        diff_from_update(&desc.updated_fields, &desc.removed_fields, Some(&doc))
                    }
                    None => FieldDiff::new(),
                };
                ChangeEvent::Changed { id, diff, doc }
            }
            OperationType::Replace => match &raw.full_document {
                Some(doc) => ChangeEvent::Replaced {
                    id,
                    doc: doc.clone(),
                },
                None => return Err(Error::missing_full_document(collection, id)),
            },
            OperationType::Delete => ChangeEvent::Removed { id },
            OperationType::Other => return Ok(None),
        };
        tracing::trace!("Normalized {} on {}/{}", event.kind(), collection, event.id());
        Ok(Some(event))
    }

    /// Id of the changed document.
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Added { id, .. }
            | ChangeEvent::Changed { id, .. }
            | ChangeEvent::Replaced { id, .. }
            | ChangeEvent::Removed { id } => id,
        }
    }

    /// The document after the change, if it still exists.
    pub fn doc(&self) -> Option<&Document> {
        match self {
            ChangeEvent::Added { doc, .. }
            | ChangeEvent::Changed { doc, .. }
            | ChangeEvent::Replaced { doc, .. } => Some(doc),
            ChangeEvent::Removed { .. } => None,
        }
    }

    /// Short name: `added`, `changed`, `replaced` or `removed`.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Added { .. } => "added",
            ChangeEvent::Changed { .. } => "changed",
            ChangeEvent::Replaced { .. } => "replaced",
            ChangeEvent::Removed { .. } => "removed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejoin_core::document::from_value;
    use rejoin_core::FieldChange;
    use rejoin_storage::UpdateDescription;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        from_value(value).unwrap()
    }

    #[test]
    fn test_insert_becomes_added() {
        let raw = RawChangeEvent::insert("p1", doc(json!({"_id": "p1"})));
        let event = ChangeEvent::normalize("posts", &raw).unwrap().unwrap();
        assert_eq!(event.kind(), "added");
        assert_eq!(event.id(), "p1");
    }

    #[test]
    fn test_update_collapses_nested_paths() {
        let full = doc(json!({"_id": "p1", "meta": {"views": 3, "likes": 1}, "tags": ["a", "b"]}));
        let desc = UpdateDescription {
            updated_fields: doc(json!({"meta.views": 3, "tags.1": "b"})),
            removed_fields: vec!["draft".to_string()],
        };
        let raw = RawChangeEvent::update("p1", desc, Some(full));

        match ChangeEvent::normalize("posts", &raw).unwrap().unwrap() {
            ChangeEvent::Changed { diff, .. } => {
                assert_eq!(diff["meta"], FieldChange::Set(json!({"views": 3, "likes": 1})));
                assert_eq!(diff["tags"], FieldChange::Set(json!(["a", "b"])));
                assert_eq!(diff["draft"], FieldChange::Unset);
                assert_eq!(diff.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_update_without_post_image_is_skipped() {
        let raw = RawChangeEvent::update("p1", UpdateDescription::default(), None);
        assert!(ChangeEvent::normalize("posts", &raw).unwrap().is_none());
    }

    #[test]
    fn test_replace_requires_full_document() {
        let raw = RawChangeEvent::replace("p1", None);
        let err = ChangeEvent::normalize("posts", &raw).unwrap_err();
        assert!(matches!(err, Error::MissingFullDocument { .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_other_operations_ignored() {
        let raw: RawChangeEvent = serde_json::from_value(json!({
            "operationType": "drop",
            "documentKey": {"_id": "p1"}
        }))
        .unwrap();
        assert!(ChangeEvent::normalize("posts", &raw).unwrap().is_none());
    }

    #[test]
    fn test_delete_becomes_removed() {
        let event = ChangeEvent::normalize("posts", &RawChangeEvent::delete("p1"))
            .unwrap()
            .unwrap();
        assert_eq!(event, ChangeEvent::Removed { id: "p1".into() });
        assert!(event.doc().is_none());
    }
}
