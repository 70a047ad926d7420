//! In-memory document store.
//!
//! `MemoryStore` keeps collections as ordered maps from id to document and
//! implements [`Storage`]. Every mutation is queued, in commit order, onto each
//! open feed of the mutated collection; nothing is delivered until the feed is
//! drained.

use crate::event::{RawChangeEvent, UpdateDescription};
use crate::traits::{ChangeFeed, FullDocument, Storage, WatchOptions};
use rejoin_core::document::{set_path, unset_path};
use rejoin_core::{doc_id, DocId, Document, Error, Projection, Result, ID_FIELD};
use rejoin_query::{Matcher, Selector};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// Counters describing store activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of `find` calls.
    pub finds: usize,
    /// Number of feeds opened.
    pub feeds_opened: usize,
    /// Number of feeds closed.
    pub feeds_closed: usize,
    /// Number of events queued onto feeds.
    pub events_queued: usize,
}

/// A `$set` / `$unset` style update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateSpec {
    set: Vec<(String, Value)>,
    unset: Vec<String>,
}

impl UpdateSpec {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a (possibly dotted) path.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.push((path.into(), value));
        self
    }

    /// Removes a (possibly dotted) path.
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    /// Parses `{"$set": {...}, "$unset": {...}}`.
    pub fn from_json(spec: &Value) -> Result<Self> {
        let map = spec
            .as_object()
            .ok_or_else(|| Error::invalid_state("update must be an object"))?;
        let mut update = Self::new();
        for (op, fields) in map {
            let fields = fields
                .as_object()
                .ok_or_else(|| Error::invalid_state(format!("{} expects an object", op)))?;
            match op.as_str() {
                "$set" => {
                    for (path, value) in fields {
                        update.set.push((path.clone(), value.clone()));
                    }
                }
                "$unset" => update.unset.extend(fields.keys().cloned()),
                other => {
                    return Err(Error::unsupported(format!("update operator {}", other)));
                }
            }
        }
        Ok(update)
    }

    /// Returns true if the update touches nothing.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

struct FeedQueue {
    events: VecDeque<RawChangeEvent>,
    closed: bool,
}

struct FeedSlot {
    collection: String,
    options: WatchOptions,
    queue: Rc<RefCell<FeedQueue>>,
}

/// A feed handed out by [`MemoryStore::watch`].
pub struct MemoryFeed {
    collection: String,
    queue: Rc<RefCell<FeedQueue>>,
    stats: Rc<Cell<StoreStats>>,
}

impl ChangeFeed for MemoryFeed {
    fn next_event(&mut self) -> Result<Option<RawChangeEvent>> {
        let mut queue = self.queue.borrow_mut();
        if queue.closed {
            return Ok(None);
        }
        Ok(queue.events.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        let mut queue = self.queue.borrow_mut();
        if !queue.closed {
            queue.closed = true;
            queue.events.clear();
            let mut stats = self.stats.get();
            stats.feeds_closed += 1;
            self.stats.set(stats);
            tracing::debug!("Closed memory feed on {}", self.collection);
        }
        Ok(())
    }
}

impl Drop for MemoryFeed {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// An in-memory, single-threaded document store.
#[derive(Default)]
pub struct MemoryStore {
    collections: RefCell<BTreeMap<String, BTreeMap<DocId, Document>>>,
    feeds: RefCell<Vec<FeedSlot>>,
    stats: Rc<Cell<StoreStats>>,
    finds_by_collection: RefCell<BTreeMap<String, usize>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document, which must carry a string or numeric `_id`.
    pub fn insert(&self, collection: &str, doc: Document) -> Result<DocId> {
        let id = doc_id(&doc)
            .ok_or_else(|| Error::invalid_state(format!("document in {} has no _id", collection)))?;
        {
            let mut collections = self.collections.borrow_mut();
            let docs = collections.entry(collection.to_string()).or_default();
            if docs.contains_key(&id) {
                return Err(Error::invalid_state(format!(
                    "duplicate _id {} in {}",
                    id, collection
                )));
            }
            docs.insert(id.clone(), doc.clone());
        }
        self.emit(collection, |_| RawChangeEvent::insert(id.clone(), doc.clone()));
        Ok(id)
    }

    /// Inserts a JSON object.
    pub fn insert_value(&self, collection: &str, doc: Value) -> Result<DocId> {
        match doc {
            Value::Object(map) => self.insert(collection, map),
            _ => Err(Error::invalid_state("document must be an object")),
        }
    }

    /// Applies an update. Returns false if the document does not exist.
    ///
    /// An update that leaves the document unchanged queues no event.
    pub fn update(&self, collection: &str, id: &str, update: &UpdateSpec) -> Result<bool> {
        if update.set.iter().any(|(path, _)| path == ID_FIELD)
            || update.unset.iter().any(|path| path == ID_FIELD)
        {
            return Err(Error::unsupported("updating _id"));
        }

        let (after, description) = {
            let mut collections = self.collections.borrow_mut();
            let doc = match collections.get_mut(collection).and_then(|c| c.get_mut(id)) {
                Some(doc) => doc,
                None => return Ok(false),
            };
            let before = doc.clone();
            let mut description = UpdateDescription::default();
            for (path, value) in &update.set {
                if !set_path(doc, path, value.clone()) {
                    *doc = before;
                    return Err(Error::invalid_state(format!(
                        "cannot set {} on {}/{}",
                        path, collection, id
                    )));
                }
                description.updated_fields.insert(path.clone(), value.clone());
            }
            for path in &update.unset {
                if unset_path(doc, path) {
                    description.removed_fields.push(path.clone());
                }
            }
            if *doc == before {
                return Ok(true);
            }
            (doc.clone(), description)
        };

        self.emit(collection, |options| {
            let full = match options.full_document {
                FullDocument::UpdateLookup => Some(after.clone()),
                FullDocument::Default => None,
            };
            RawChangeEvent::update(id, description.clone(), full)
        });
        Ok(true)
    }

    /// Replaces a document wholesale, keeping its id.
    pub fn replace(&self, collection: &str, id: &str, mut doc: Document) -> Result<bool> {
        doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        {
            let mut collections = self.collections.borrow_mut();
            match collections.get_mut(collection).and_then(|c| c.get_mut(id)) {
                Some(existing) => *existing = doc.clone(),
                None => return Ok(false),
            }
        }
        self.emit(collection, |_| RawChangeEvent::replace(id, Some(doc.clone())));
        Ok(true)
    }

    /// Removes a document. Returns false if it did not exist.
    pub fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = self
            .collections
            .borrow_mut()
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some();
        if removed {
            self.emit(collection, |_| RawChangeEvent::delete(id));
        }
        Ok(removed)
    }

    /// Queues a raw event onto every open feed of `collection` as-is.
    pub fn inject_event(&self, collection: &str, event: RawChangeEvent) {
        self.emit(collection, |_| event.clone());
    }

    /// Returns a copy of a document.
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .borrow()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Returns the number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .borrow()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Returns true if the collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Returns activity counters.
    pub fn stats(&self) -> StoreStats {
        self.stats.get()
    }

    /// Returns the number of `find` calls against one collection.
    pub fn find_count(&self, collection: &str) -> usize {
        self.finds_by_collection
            .borrow()
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of open feeds on a collection.
    pub fn open_feeds(&self, collection: &str) -> usize {
        self.feeds
            .borrow()
            .iter()
            .filter(|slot| slot.collection == collection && !slot.queue.borrow().closed)
            .count()
    }

    fn emit<F>(&self, collection: &str, mut make_event: F)
    where
        F: FnMut(&WatchOptions) -> RawChangeEvent,
    {
        let mut feeds = self.feeds.borrow_mut();
        feeds.retain(|slot| !slot.queue.borrow().closed);
        let mut queued = 0;
        for slot in feeds.iter().filter(|slot| slot.collection == collection) {
            slot.queue.borrow_mut().events.push_back(make_event(&slot.options));
            queued += 1;
        }
        if queued > 0 {
            let mut stats = self.stats.get();
            stats.events_queued += queued;
            self.stats.set(stats);
        }
    }
}

impl Storage for MemoryStore {
    fn find(
        &self,
        collection: &str,
        selector: &Selector,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        let matcher = Matcher::compile(selector)?;
        let mut stats = self.stats.get();
        stats.finds += 1;
        self.stats.set(stats);
        *self
            .finds_by_collection
            .borrow_mut()
            .entry(collection.to_string())
            .or_insert(0) += 1;

        tracing::trace!("find on {}: {}", collection, selector);
        let collections = self.collections.borrow();
        let docs = match collections.get(collection) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };
        Ok(docs
            .values()
            .filter(|doc| matcher.matches(doc))
            .map(|doc| projection.apply(doc))
            .collect())
    }

    fn watch(&self, collection: &str, options: WatchOptions) -> Result<Box<dyn ChangeFeed>> {
        let queue = Rc::new(RefCell::new(FeedQueue {
            events: VecDeque::new(),
            closed: false,
        }));
        self.feeds.borrow_mut().push(FeedSlot {
            collection: collection.to_string(),
            options,
            queue: queue.clone(),
        });
        let mut stats = self.stats.get();
        stats.feeds_opened += 1;
        self.stats.set(stats);
        tracing::debug!("Opened memory feed on {}", collection);
        Ok(Box::new(MemoryFeed {
            collection: collection.to_string(),
            queue,
            stats: self.stats.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OperationType;
    use serde_json::json;

    fn store_with_posts() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_value("posts", json!({"_id": "p1", "title": "a", "meta": {"views": 1}}))
            .unwrap();
        store
            .insert_value("posts", json!({"_id": "p2", "title": "b"}))
            .unwrap();
        store
    }

    fn drain(feed: &mut Box<dyn ChangeFeed>) -> Vec<RawChangeEvent> {
        let mut events = Vec::new();
        while let Some(event) = feed.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_insert_requires_id() {
        let store = MemoryStore::new();
        assert!(store.insert_value("posts", json!({"title": "x"})).is_err());
        assert!(store.insert_value("posts", json!(1)).is_err());
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let store = store_with_posts();
        assert!(store.insert_value("posts", json!({"_id": "p1"})).is_err());
        assert_eq!(store.len("posts"), 2);
    }

    #[test]
    fn test_find_with_selector_and_projection() {
        let store = store_with_posts();
        let docs = store
            .find("posts", &json!({"title": "b"}), &Projection::include(["title"]))
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0], rejoin_core::document::from_value(json!({"_id": "p2", "title": "b"})).unwrap());
        assert_eq!(store.stats().finds, 1);
        assert_eq!(store.find_count("posts"), 1);
        assert_eq!(store.find_count("users"), 0);
    }

    #[test]
    fn test_find_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.find("nothing", &json!({}), &Projection::All).unwrap().is_empty());
    }

    #[test]
    fn test_feed_receives_events_in_order() {
        let store = store_with_posts();
        let mut feed = store.watch("posts", WatchOptions::update_lookup()).unwrap();

        store.insert_value("posts", json!({"_id": "p3"})).unwrap();
        store
            .update("posts", "p1", &UpdateSpec::new().set("meta.views", json!(2)).unset("title"))
            .unwrap();
        store.replace("posts", "p2", rejoin_core::document::from_value(json!({"x": 1})).unwrap()).unwrap();
        store.remove("posts", "p3").unwrap();

        let events = drain(&mut feed);
        let kinds: Vec<OperationType> = events.iter().map(|e| e.operation_type).collect();
        assert_eq!(
            kinds,
            vec![
                OperationType::Insert,
                OperationType::Update,
                OperationType::Replace,
                OperationType::Delete
            ]
        );

        let update = &events[1];
        let desc = update.update_description.as_ref().unwrap();
        assert_eq!(desc.updated_fields["meta.views"], json!(2));
        assert_eq!(desc.removed_fields, vec!["title".to_string()]);
        assert_eq!(
            update.full_document.as_ref().unwrap()["meta"],
            json!({"views": 2})
        );
        assert_eq!(events[2].full_document.as_ref().unwrap()["_id"], json!("p2"));
    }

    #[test]
    fn test_default_feed_omits_update_post_image() {
        let store = store_with_posts();
        let mut feed = store.watch("posts", WatchOptions::default()).unwrap();
        store
            .update("posts", "p1", &UpdateSpec::new().set("title", json!("z")))
            .unwrap();
        let events = drain(&mut feed);
        assert_eq!(events.len(), 1);
        assert!(events[0].full_document.is_none());
    }

    #[test]
    fn test_noop_update_queues_nothing() {
        let store = store_with_posts();
        let mut feed = store.watch("posts", WatchOptions::update_lookup()).unwrap();
        assert!(store
            .update("posts", "p1", &UpdateSpec::new().set("title", json!("a")))
            .unwrap());
        assert!(!store
            .update("posts", "missing", &UpdateSpec::new().set("title", json!("a")))
            .unwrap());
        assert!(drain(&mut feed).is_empty());
    }

    #[test]
    fn test_update_rejects_id_changes() {
        let store = store_with_posts();
        let err = store
            .update("posts", "p1", &UpdateSpec::new().set("_id", json!("x")))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_update_spec_from_json() {
        let spec = UpdateSpec::from_json(&json!({"$set": {"a.b": 1}, "$unset": {"c": ""}})).unwrap();
        assert_eq!(spec, UpdateSpec::new().set("a.b", json!(1)).unset("c"));
        assert!(UpdateSpec::from_json(&json!({"$inc": {"a": 1}})).is_err());
        assert!(UpdateSpec::new().is_empty());
    }

    #[test]
    fn test_close_stops_delivery() {
        let store = store_with_posts();
        let mut feed = store.watch("posts", WatchOptions::default()).unwrap();
        assert_eq!(store.open_feeds("posts"), 1);

        feed.close().unwrap();
        store.insert_value("posts", json!({"_id": "p9"})).unwrap();

        assert!(feed.next_event().unwrap().is_none());
        assert_eq!(store.open_feeds("posts"), 0);
        assert_eq!(store.stats().feeds_opened, 1);
        assert_eq!(store.stats().feeds_closed, 1);
    }

    #[test]
    fn test_dropping_feed_closes_it() {
        let store = store_with_posts();
        {
            let _feed = store.watch("posts", WatchOptions::default()).unwrap();
            assert_eq!(store.open_feeds("posts"), 1);
        }
        assert_eq!(store.open_feeds("posts"), 0);
        assert_eq!(store.stats().feeds_closed, 1);
    }
}
