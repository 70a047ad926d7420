//! Rejoin Core - Core types for the rejoin reactive-join engine.
//!
//! This crate provides the foundational types shared by every layer:
//!
//! - `Document` / `DocId`: JSON documents and their identities
//! - `FieldChange` / `FieldDiff`: top-level field diffs and the utilities that
//!   build them from raw change-feed update descriptions
//! - `Projection`: allow-list or deny-list field projections
//! - `CompositeKey`: the `ownerId:sourceId` key naming one parent edge
//! - `EngineConfig`: process-level engine settings
//! - `Error`: Error types for engine operations
//!
//! # Example
//!
//! ```rust
//! use rejoin_core::{diff_from_update, document, FieldChange};
//! use serde_json::json;
//!
//! let full = document::from_value(json!({"_id": "p1", "meta": {"views": 2}})).unwrap();
//! let updated = document::from_value(json!({"meta.views": 2})).unwrap();
//!
//! let diff = diff_from_update(&updated, &[], Some(&full));
//! assert_eq!(diff["meta"], FieldChange::Set(json!({"views": 2})));
//! ```

mod config;
mod diff;
pub mod document;
mod error;
mod key;
mod projection;

pub use config::{EngineConfig, DEFAULT_MAX_EVENTS_PER_PUMP};
pub use diff::{
    apply_diff, diff_documents, diff_from_update, full_document_diff, top_level_field,
    FieldChange, FieldDiff,
};
pub use document::{doc_id, DocId, Document, ID_FIELD};
pub use error::{Error, Result};
pub use key::{next_owner_id, CompositeKey, OwnerId, KEY_DELIMITER};
pub use projection::Projection;
