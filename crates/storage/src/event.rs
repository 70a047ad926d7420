//! Raw change-feed events.
//!
//! These mirror the wire shape of a document database change stream
//! (`operationType`, `documentKey._id`, `fullDocument`,
//! `updateDescription.{updatedFields, removedFields}`), so a driver can hand
//! its events over with a plain serde conversion.

use rejoin_core::{DocId, Document};
use serde::{Deserialize, Serialize};

/// Kind of change reported by a feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    /// Any other operation (`drop`, `rename`, `invalidate`, ...).
    #[serde(other)]
    Other,
}

/// The `documentKey` of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentKey {
    #[serde(rename = "_id")]
    pub id: DocId,
}

/// The `updateDescription` of an update event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    /// Dotted paths that were set, with their new values.
    #[serde(default)]
    pub updated_fields: Document,
    /// Dotted paths that were removed.
    #[serde(default)]
    pub removed_fields: Vec<String>,
}

/// One raw change-feed event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChangeEvent {
    pub operation_type: OperationType,
    pub document_key: DocumentKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_description: Option<UpdateDescription>,
}

impl RawChangeEvent {
    /// Creates an insert event.
    pub fn insert(id: impl Into<DocId>, doc: Document) -> Self {
        Self::new(OperationType::Insert, id, Some(doc), None)
    }

    /// Creates an update event.
    pub fn update(
        id: impl Into<DocId>,
        description: UpdateDescription,
        full_document: Option<Document>,
    ) -> Self {
        Self::new(OperationType::Update, id, full_document, Some(description))
    }

    /// Creates a replace event.
    pub fn replace(id: impl Into<DocId>, doc: Option<Document>) -> Self {
        Self::new(OperationType::Replace, id, doc, None)
    }

    /// Creates a delete event.
    pub fn delete(id: impl Into<DocId>) -> Self {
        Self::new(OperationType::Delete, id, None, None)
    }

    fn new(
        operation_type: OperationType,
        id: impl Into<DocId>,
        full_document: Option<Document>,
        update_description: Option<UpdateDescription>,
    ) -> Self {
        Self {
            operation_type,
            document_key: DocumentKey { id: id.into() },
            full_document,
            update_description,
        }
    }

    /// Returns the id of the changed document.
    #[inline]
    pub fn id(&self) -> &str {
        &self.document_key.id
    }
}
