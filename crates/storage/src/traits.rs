//! Storage boundary.
//!
//! The engine consumes storage through two operations: a selector query and a
//! change feed per collection. Both are single-threaded; a feed is a queue the
//! engine drains when it pumps, which is where the engine yields to storage.

use crate::event::RawChangeEvent;
use rejoin_core::{Document, Projection, Result};
use rejoin_query::Selector;

/// Whether update events carry the post-image of the document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FullDocument {
    /// Only inserts and replaces carry a full document.
    #[default]
    Default,
    /// Updates carry the document as it is after the update.
    UpdateLookup,
}

/// Options for opening a change feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub full_document: FullDocument,
}

impl WatchOptions {
    /// Options requesting post-images on updates.
    pub fn update_lookup() -> Self {
        Self {
            full_document: FullDocument::UpdateLookup,
        }
    }
}

/// A document store the engine can query and watch.
pub trait Storage {
    /// Returns the documents of `collection` matching `selector`, projected.
    fn find(&self, collection: &str, selector: &Selector, projection: &Projection)
        -> Result<Vec<Document>>;

    /// Opens a change feed on `collection`.
    fn watch(&self, collection: &str, options: WatchOptions) -> Result<Box<dyn ChangeFeed>>;
}

/// An open change feed.
pub trait ChangeFeed {
    /// Takes the next queued event, if any.
    fn next_event(&mut self) -> Result<Option<RawChangeEvent>>;

    /// Closes the feed. Further events are discarded.
    fn close(&mut self) -> Result<()>;
}
