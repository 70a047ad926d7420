//! Error types for rejoin.

use thiserror::Error;

/// Result type alias for rejoin operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for rejoin operations.
///
/// Contract violations (`MalformedCompositeKey`, `MixedProjection`,
/// `AlreadyObserving`, `MissingFullDocument`) indicate a bug in the caller or a
/// misconfigured storage driver and are never retried.
#[derive(Debug, Error)]
pub enum Error {
    /// A composite key could not be split into owner and source.
    #[error("Malformed composite key: {key}")]
    MalformedCompositeKey { key: String },
    /// A field projection mixed inclusion and exclusion.
    #[error("Projection cannot mix inclusion and exclusion (field {field})")]
    MixedProjection { field: String },
    /// `observe()` was called on something already observing.
    #[error("Already observing: {what}")]
    AlreadyObserving { what: String },
    /// A replace change event arrived without a full document.
    #[error("Replace event for {collection}/{id} carries no full document")]
    MissingFullDocument { collection: String, id: String },
    /// An operation that is not supported at this boundary.
    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },
    /// A selector could not be compiled.
    #[error("Invalid selector: {message}")]
    InvalidSelector { message: String },
    /// An operation was attempted in the wrong lifecycle state.
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
    /// Collection not found.
    #[error("Collection not found: {name}")]
    CollectionNotFound { name: String },
    /// Document not found.
    #[error("Document {id} not found in {collection}")]
    DocumentNotFound { collection: String, id: String },
    /// Failure reported by the storage driver.
    #[error("Storage error: {message}")]
    Storage { message: String },
    /// (De)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates a malformed composite key error.
    pub fn malformed_key(key: impl Into<String>) -> Self {
        Error::MalformedCompositeKey { key: key.into() }
    }

    /// Creates a mixed projection error.
    pub fn mixed_projection(field: impl Into<String>) -> Self {
        Error::MixedProjection {
            field: field.into(),
        }
    }

    /// Creates an already observing error.
    pub fn already_observing(what: impl Into<String>) -> Self {
        Error::AlreadyObserving { what: what.into() }
    }

    /// Creates a missing full document error.
    pub fn missing_full_document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Error::MissingFullDocument {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid selector error.
    pub fn invalid_selector(message: impl Into<String>) -> Self {
        Error::InvalidSelector {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a collection not found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Error::CollectionNotFound { name: name.into() }
    }

    /// Creates a document not found error.
    pub fn document_not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Error::DocumentNotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    /// Returns true for errors that signal a caller bug or driver misconfiguration.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::MalformedCompositeKey { .. }
                | Error::MixedProjection { .. }
                | Error::AlreadyObserving { .. }
                | Error::MissingFullDocument { .. }
        )
    }
}
