//! Collection to multiplexer registry.
//!
//! A `ChangeStreamDeMultiplexer` is an injected service: each engine owns one,
//! and it owns every multiplexer the engine's join trees listen on. Cloning
//! it yields another handle to the same registry.

use super::multiplexer::{ChangeStreamMultiplexer, Listener, ListenerId};
use crate::change::ChangeEvent;
use rejoin_core::{EngineConfig, Result};
use rejoin_storage::{RawChangeEvent, Storage};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

struct DeMultiplexerInner {
    storage: Rc<dyn Storage>,
    max_events_per_pump: usize,
    multiplexers: RefCell<BTreeMap<String, Rc<ChangeStreamMultiplexer>>>,
}

impl DeMultiplexerInner {
    fn release(&self, collection: &str, id: ListenerId) -> Result<()> {
        let mux = match self.multiplexers.borrow().get(collection) {
            Some(mux) => mux.clone(),
            None => return Ok(()),
        };
        mux.remove_listener(id)?;
        if mux.is_idle() {
            self.multiplexers.borrow_mut().remove(collection);
            tracing::debug!("Dropped idle multiplexer for {}", collection);
        }
        Ok(())
    }
}

/// Registry of one multiplexer per watched collection.
#[derive(Clone)]
pub struct ChangeStreamDeMultiplexer {
    inner: Rc<DeMultiplexerInner>,
}

impl ChangeStreamDeMultiplexer {
    /// Creates an empty registry over `storage`.
    pub fn new(storage: Rc<dyn Storage>, config: &EngineConfig) -> Self {
        Self {
            inner: Rc::new(DeMultiplexerInner {
                storage,
                max_events_per_pump: config.max_events_per_pump,
                multiplexers: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    fn multiplexer(&self, collection: &str) -> Rc<ChangeStreamMultiplexer> {
        self.inner
            .multiplexers
            .borrow_mut()
            .entry(collection.to_string())
            .or_insert_with(|| {
                Rc::new(ChangeStreamMultiplexer::new(
                    collection,
                    self.inner.storage.clone(),
                    self.inner.max_events_per_pump,
                ))
            })
            .clone()
    }

    /// Attaches a callback to `collection`, creating its multiplexer on
    /// demand. Dropping or stopping the handle detaches it.
    pub fn add_listener<F>(&self, collection: &str, listener: F) -> Result<ListenerHandle>
    where
        F: Fn(&ChangeEvent, &RawChangeEvent) -> Result<()> + 'static,
    {
        let mux = self.multiplexer(collection);
        let id = mux.add_listener(listener);
        self.handle(collection, &mux, id)
    }

    /// Attaches a listener with a settle step to `collection`.
    pub fn attach(&self, collection: &str, listener: Listener) -> Result<ListenerHandle> {
        let mux = self.multiplexer(collection);
        let id = mux.attach(listener);
        self.handle(collection, &mux, id)
    }

    fn handle(
        &self,
        collection: &str,
        mux: &ChangeStreamMultiplexer,
        id: Result<ListenerId>,
    ) -> Result<ListenerHandle> {
        let id = match id {
            Ok(id) => id,
            Err(err) => {
                if mux.is_idle() {
                    self.inner.multiplexers.borrow_mut().remove(collection);
                }
                return Err(err);
            }
        };
        Ok(ListenerHandle {
            collection: collection.to_string(),
            id,
            demux: Rc::downgrade(&self.inner),
            active: true,
        })
    }

    /// Returns the multiplexer of `collection`, pinned so it keeps its feed
    /// open with zero listeners.
    pub fn watch(&self, collection: &str) -> Result<Rc<ChangeStreamMultiplexer>> {
        let mux = self.multiplexer(collection);
        mux.keep_running()?;
        Ok(mux)
    }

    /// Returns the multiplexer of `collection`, if one exists.
    pub fn get(&self, collection: &str) -> Option<Rc<ChangeStreamMultiplexer>> {
        self.inner.multiplexers.borrow().get(collection).cloned()
    }

    /// Watched collections in name order.
    pub fn collections(&self) -> Vec<String> {
        self.inner.multiplexers.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.multiplexers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.multiplexers.borrow().is_empty()
    }

    /// Runs one pump pass over every multiplexer, in collection order.
    /// Returns the number of raw events taken.
    pub fn pump(&self) -> Result<usize> {
        let muxes: Vec<Rc<ChangeStreamMultiplexer>> =
            self.inner.multiplexers.borrow().values().cloned().collect();
        let mut taken = 0;
        for mux in muxes {
            taken += mux.pump()?;
        }
        Ok(taken)
    }

    /// Pumps until a pass takes no events.
    pub fn pump_until_idle(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let taken = self.pump()?;
            if taken == 0 {
                return Ok(total);
            }
            total += taken;
        }
    }

    /// Stops and drops every multiplexer. A failure to stop one collection's
    /// feed is logged and does not prevent the others from stopping.
    pub fn stop(&self) {
        let muxes = std::mem::take(&mut *self.inner.multiplexers.borrow_mut());
        for (collection, mux) in muxes {
            if let Err(err) = mux.stop() {
                tracing::warn!("Failed to stop change stream on {}: {}", collection, err);
            }
        }
    }
}

/// Detachable registration of one listener.
pub struct ListenerHandle {
    collection: String,
    id: ListenerId,
    demux: Weak<DeMultiplexerInner>,
    active: bool,
}

impl ListenerHandle {
    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[inline]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Detaches the listener. Safe to call more than once.
    pub fn stop(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        match self.demux.upgrade() {
            Some(inner) => inner.release(&self.collection, self.id),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!("Failed to detach listener from {}: {}", self.collection, err);
        }
    }
}
