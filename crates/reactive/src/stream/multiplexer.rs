//! One change feed, many listeners.
//!
//! A `ChangeStreamMultiplexer` owns at most one underlying feed for its
//! collection. The feed is opened when the first listener arrives (or when
//! the multiplexer is pinned with [`keep_running`](ChangeStreamMultiplexer::keep_running))
//! and closed when the last listener leaves, unless pinned.
//!
//! Events are delivered in passes. After the events of a pass reach every
//! listener, each listener is asked to settle once, then told the pass is
//! over.

use crate::change::ChangeEvent;
use rejoin_core::Result;
use rejoin_storage::{ChangeFeed, RawChangeEvent, Storage, WatchOptions};
use std::cell::RefCell;
use std::rc::Rc;

/// Identifier of a listener within one multiplexer.
pub type ListenerId = u64;

/// Receiver of one collection's change events.
pub trait ChangeListener {
    /// Receives each normalized event together with its raw form.
    fn on_change(&self, event: &ChangeEvent, raw: &RawChangeEvent) -> Result<()>;

    /// Runs once per pump pass that delivered at least one event, after the
    /// last of them.
    fn on_settle(&self) -> Result<()> {
        Ok(())
    }

    /// Runs after every listener of the pass settled, even if one failed.
    fn on_pass_end(&self) {}
}

pub type Listener = Rc<dyn ChangeListener>;

/// Adapts a plain callback that needs no settle step.
struct FnListener<F>(F);

impl<F> ChangeListener for FnListener<F>
where
    F: Fn(&ChangeEvent, &RawChangeEvent) -> Result<()>,
{
    fn on_change(&self, event: &ChangeEvent, raw: &RawChangeEvent) -> Result<()> {
        (self.0)(event, raw)
    }
}

struct MultiplexerState {
    feed: Option<Box<dyn ChangeFeed>>,
    listeners: Vec<(ListenerId, Listener)>,
    keep_running: bool,
    next_id: ListenerId,
}

/// Fans one collection's change feed out to listeners.
pub struct ChangeStreamMultiplexer {
    collection: String,
    storage: Rc<dyn Storage>,
    max_events_per_pump: usize,
    state: RefCell<MultiplexerState>,
}

impl ChangeStreamMultiplexer {
    /// Creates an idle multiplexer.
    pub fn new(
        collection: impl Into<String>,
        storage: Rc<dyn Storage>,
        max_events_per_pump: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            storage,
            max_events_per_pump: max_events_per_pump.max(1),
            state: RefCell::new(MultiplexerState {
                feed: None,
                listeners: Vec::new(),
                keep_running: false,
                next_id: 1,
            }),
        }
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Registers a callback, opening the feed if it is not running.
    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&ChangeEvent, &RawChangeEvent) -> Result<()> + 'static,
    {
        self.attach(Rc::new(FnListener(listener)))
    }

    /// Registers a listener, opening the feed if it is not running.
    pub fn attach(&self, listener: Listener) -> Result<ListenerId> {
        self.ensure_running()?;
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, listener));
        tracing::debug!(
            "Listener {} attached to {} ({} total)",
            id,
            self.collection,
            state.listeners.len()
        );
        Ok(id)
    }

    /// Unregisters a listener. The feed is closed when the last listener
    /// leaves and the multiplexer is not pinned.
    pub fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        let should_close = {
            let mut state = self.state.borrow_mut();
            let before = state.listeners.len();
            state.listeners.retain(|(lid, _)| *lid != id);
            if state.listeners.len() == before {
                return Ok(false);
            }
            tracing::debug!("Listener {} detached from {}", id, self.collection);
            state.listeners.is_empty() && !state.keep_running
        };
        if should_close {
            self.close_feed()?;
        }
        Ok(true)
    }

    /// Pins the feed open regardless of listener count.
    pub fn keep_running(&self) -> Result<()> {
        self.state.borrow_mut().keep_running = true;
        self.ensure_running()
    }

    /// Returns true if the feed is pinned.
    pub fn is_keep_running(&self) -> bool {
        self.state.borrow().keep_running
    }

    /// Returns true if the underlying feed is open.
    pub fn is_running(&self) -> bool {
        self.state.borrow().feed.is_some()
    }

    /// Returns true if nothing keeps this multiplexer alive.
    pub fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.listeners.is_empty() && !state.keep_running
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    fn has_listener(&self, id: ListenerId) -> bool {
        self.state
            .borrow()
            .listeners
            .iter()
            .any(|(lid, _)| *lid == id)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let feed = self
            .storage
            .watch(&self.collection, WatchOptions::update_lookup())?;
        self.state.borrow_mut().feed = Some(feed);
        tracing::debug!("Opened change stream on {}", self.collection);
        Ok(())
    }

    fn close_feed(&self) -> Result<()> {
        let feed = self.state.borrow_mut().feed.take();
        if let Some(mut feed) = feed {
            tracing::debug!("Closing change stream on {}", self.collection);
            feed.close()?;
        }
        Ok(())
    }

    /// Runs one pass: delivers up to `max_events_per_pump` queued events to
    /// the listeners, then settles them.
    ///
    /// Returns the number of raw events taken from the feed. An error from a
    /// listener stops delivery of that event to the remaining listeners and
    /// is returned as-is.
    pub fn pump(&self) -> Result<usize> {
        let mut taken = 0;
        let mut delivered = 0;
        while taken < self.max_events_per_pump {
            let raw = {
                let mut state = self.state.borrow_mut();
                match state.feed.as_mut() {
                    Some(feed) => feed.next_event()?,
                    None => break,
                }
            };
            let raw = match raw {
                Some(raw) => raw,
                None => break,
            };
            taken += 1;

            let event = match ChangeEvent::normalize(&self.collection, &raw)? {
                Some(event) => event,
                None => continue,
            };
            delivered += 1;
            for (id, listener) in self.snapshot() {
                // A listener may have been detached by an earlier one.
                if self.has_listener(id) {
                    listener.on_change(&event, &raw)?;
                }
            }
        }
        if delivered > 0 {
            self.settle()?;
        }
        Ok(taken)
    }

    fn snapshot(&self) -> Vec<(ListenerId, Listener)> {
        self.state.borrow().listeners.clone()
    }

    fn settle(&self) -> Result<()> {
        let listeners = self.snapshot();
        let mut result = Ok(());
        for (id, listener) in &listeners {
            if result.is_ok() && self.has_listener(*id) {
                result = listener.on_settle();
            }
        }
        for (_, listener) in &listeners {
            listener.on_pass_end();
        }
        result
    }

    /// Drops every listener, unpins and closes the feed.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            state.listeners.clear();
            state.keep_running = false;
        }
        self.close_feed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejoin_core::Error;
    use rejoin_storage::MemoryStore;
    use serde_json::json;
    use std::cell::RefCell;

    fn setup() -> (Rc<MemoryStore>, ChangeStreamMultiplexer) {
        let store = Rc::new(MemoryStore::new());
        let mux = ChangeStreamMultiplexer::new("posts", store.clone(), 16);
        (store, mux)
    }

    #[test]
    fn test_feed_follows_listener_count() {
        let (store, mux) = setup();
        assert!(!mux.is_running());

        let first = mux.add_listener(|_, _| Ok(())).unwrap();
        let second = mux.add_listener(|_, _| Ok(())).unwrap();
        assert!(mux.is_running());
        assert_eq!(store.stats().feeds_opened, 1);

        assert!(mux.remove_listener(first).unwrap());
        assert!(mux.is_running());
        assert!(mux.remove_listener(second).unwrap());
        assert!(!mux.is_running());
        assert!(!mux.remove_listener(second).unwrap());
        assert_eq!(store.stats().feeds_closed, 1);
    }

    #[test]
    fn test_keep_running_survives_last_listener() {
        let (store, mux) = setup();
        mux.keep_running().unwrap();
        assert!(mux.is_running());

        let id = mux.add_listener(|_, _| Ok(())).unwrap();
        mux.remove_listener(id).unwrap();
        assert!(mux.is_running());
        assert!(!mux.is_idle());

        mux.stop().unwrap();
        assert!(!mux.is_running());
        assert_eq!(store.stats().feeds_closed, 1);
    }

    #[test]
    fn test_pump_fans_out_in_feed_order() {
        let (store, mux) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            mux.add_listener(move |event, _| {
                seen.borrow_mut().push(format!("{}:{}:{}", tag, event.kind(), event.id()));
                Ok(())
            })
            .unwrap();
        }

        store.insert_value("posts", json!({"_id": "p1"})).unwrap();
        store.remove("posts", "p1").unwrap();
        assert_eq!(mux.pump().unwrap(), 2);
        assert_eq!(mux.pump().unwrap(), 0);

        assert_eq!(
            *seen.borrow(),
            vec!["a:added:p1", "b:added:p1", "a:removed:p1", "b:removed:p1"]
        );
    }

    struct Batching {
        log: Rc<RefCell<Vec<String>>>,
        name: &'static str,
    }

    impl ChangeListener for Batching {
        fn on_change(&self, event: &ChangeEvent, _raw: &RawChangeEvent) -> Result<()> {
            self.log
                .borrow_mut()
                .push(format!("{}:{}", self.name, event.id()));
            Ok(())
        }

        fn on_settle(&self) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:settle", self.name));
            Ok(())
        }

        fn on_pass_end(&self) {
            self.log.borrow_mut().push(format!("{}:end", self.name));
        }
    }

    #[test]
    fn test_pass_settles_once_after_all_events() {
        let (store, mux) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b"] {
            mux.attach(Rc::new(Batching {
                log: log.clone(),
                name,
            }))
            .unwrap();
        }

        store.insert_value("posts", json!({"_id": "p1"})).unwrap();
        store.insert_value("posts", json!({"_id": "p2"})).unwrap();
        assert_eq!(mux.pump().unwrap(), 2);
        assert_eq!(
            *log.borrow(),
            vec![
                "a:p1", "b:p1", "a:p2", "b:p2", "a:settle", "b:settle", "a:end", "b:end"
            ]
        );

        log.borrow_mut().clear();
        assert_eq!(mux.pump().unwrap(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_pump_respects_event_cap() {
        let store = Rc::new(MemoryStore::new());
        let mux = ChangeStreamMultiplexer::new("posts", store.clone(), 2);
        mux.add_listener(|_, _| Ok(())).unwrap();
        for i in 0..5 {
            store.insert_value("posts", json!({"_id": format!("p{}", i)})).unwrap();
        }
        assert_eq!(mux.pump().unwrap(), 2);
        assert_eq!(mux.pump().unwrap(), 2);
        assert_eq!(mux.pump().unwrap(), 1);
    }

    #[test]
    fn test_listener_error_stops_dispatch() {
        let (store, mux) = setup();
        let later = Rc::new(RefCell::new(0));
        mux.add_listener(|_, _| Err(Error::invalid_state("boom"))).unwrap();
        let counter = later.clone();
        mux.add_listener(move |_, _| {
            *counter.borrow_mut() += 1;
            Ok(())
        })
        .unwrap();

        store.insert_value("posts", json!({"_id": "p1"})).unwrap();
        assert!(mux.pump().is_err());
        assert_eq!(*later.borrow(), 0);
    }

    #[test]
    fn test_replace_without_document_fails_loudly() {
        let (store, mux) = setup();
        mux.add_listener(|_, _| Ok(())).unwrap();
        store.inject_event("posts", RawChangeEvent::replace("p1", None));
        let err = mux.pump().unwrap_err();
        assert!(matches!(err, Error::MissingFullDocument { .. }));
    }
}
