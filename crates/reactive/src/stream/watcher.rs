//! Single-document change-stream adapter.
//!
//! A `DocumentWatcher` follows one document of a drain collection: a
//! collection whose documents exist only because some parent points at them.
//! Field changes and replacements are forwarded; an insert or delete of the
//! followed document is incoherent at this layer and is reported as an
//! unsupported operation.

use super::demultiplexer::{ChangeStreamDeMultiplexer, ListenerHandle};
use crate::change::ChangeEvent;
use rejoin_core::{full_document_diff, DocId, Document, Error, FieldDiff, Result};
use std::cell::RefCell;
use std::rc::Rc;

/// Callback receiving the diff and the full document after each change.
pub type DocumentCallback = Rc<dyn Fn(&FieldDiff, &Document) -> Result<()>>;

/// Follows changes to one document.
pub struct DocumentWatcher {
    streams: ChangeStreamDeMultiplexer,
    collection: String,
    id: DocId,
    callback: DocumentCallback,
    handle: RefCell<Option<ListenerHandle>>,
}

impl DocumentWatcher {
    pub fn new<F>(
        streams: ChangeStreamDeMultiplexer,
        collection: impl Into<String>,
        id: impl Into<DocId>,
        callback: F,
    ) -> Self
    where
        F: Fn(&FieldDiff, &Document) -> Result<()> + 'static,
    {
        Self {
            streams,
            collection: collection.into(),
            id: id.into(),
            callback: Rc::new(callback),
            handle: RefCell::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_observing(&self) -> bool {
        self.handle.borrow().is_some()
    }

    /// Starts following the document.
    pub fn observe(&self) -> Result<()> {
        if self.is_observing() {
            return Err(Error::already_observing(format!(
                "{}/{}",
                self.collection, self.id
            )));
        }
        let id = self.id.clone();
        let collection = self.collection.clone();
        let callback = self.callback.clone();
        let handle = self
            .streams
            .add_listener(&self.collection, move |event, _| {
                if event.id() != id {
                    return Ok(());
                }
                match event {
                    ChangeEvent::Changed { diff, doc, .. } => callback(diff, doc),
                    ChangeEvent::Replaced { doc, .. } => callback(&full_document_diff(doc), doc),
                    ChangeEvent::Added { .. } => Err(Error::unsupported(format!(
                        "insert of watched document {}/{}",
                        collection, id
                    ))),
                    ChangeEvent::Removed { .. } => Err(Error::unsupported(format!(
                        "delete of watched document {}/{}",
                        collection, id
                    ))),
                }
            })?;
        *self.handle.borrow_mut() = Some(handle);
        Ok(())
    }

    /// Stops following. Safe to call more than once.
    pub fn stop(&self) -> Result<()> {
        let handle = self.handle.borrow_mut().take();
        match handle {
            Some(mut handle) => handle.stop(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejoin_core::{EngineConfig, FieldChange};
    use rejoin_storage::{MemoryStore, UpdateSpec};
    use serde_json::json;

    fn setup() -> (Rc<MemoryStore>, ChangeStreamDeMultiplexer) {
        let store = Rc::new(MemoryStore::new());
        store
            .insert_value("users", json!({"_id": "u1", "name": "ann"}))
            .unwrap();
        let demux = ChangeStreamDeMultiplexer::new(store.clone(), &EngineConfig::default());
        (store, demux)
    }

    #[test]
    fn test_forwards_changes_of_followed_document() {
        let (store, demux) = setup();
        store.insert_value("users", json!({"_id": "u2"})).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let watcher = DocumentWatcher::new(demux.clone(), "users", "u1", move |diff, _| {
            sink.borrow_mut().push(diff.clone());
            Ok(())
        });
        watcher.observe().unwrap();

        store
            .update("users", "u1", &UpdateSpec::new().set("name", json!("bob")))
            .unwrap();
        store
            .update("users", "u2", &UpdateSpec::new().set("name", json!("x")))
            .unwrap();
        demux.pump_until_idle().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["name"], FieldChange::Set(json!("bob")));
    }

    #[test]
    fn test_observe_twice_fails() {
        let (_, demux) = setup();
        let watcher = DocumentWatcher::new(demux, "users", "u1", |_, _| Ok(()));
        watcher.observe().unwrap();
        let err = watcher.observe().unwrap_err();
        assert!(matches!(err, Error::AlreadyObserving { .. }));
    }

    #[test]
    fn test_delete_of_followed_document_is_unsupported() {
        let (store, demux) = setup();
        let watcher = DocumentWatcher::new(demux.clone(), "users", "u1", |_, _| Ok(()));
        watcher.observe().unwrap();

        store.remove("users", "u1").unwrap();
        let err = demux.pump_until_idle().unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_stop_releases_feed() {
        let (store, demux) = setup();
        let watcher = DocumentWatcher::new(demux, "users", "u1", |_, _| Ok(()));
        watcher.observe().unwrap();
        assert_eq!(store.open_feeds("users"), 1);
        watcher.stop().unwrap();
        watcher.stop().unwrap();
        assert!(!watcher.is_observing());
        assert_eq!(store.open_feeds("users"), 0);
    }
}
