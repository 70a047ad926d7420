//! Engine entry point.

use crate::link::scope::RootScope;
use crate::link::Link;
use crate::options::LinkOptions;
use crate::stream::ChangeStreamDeMultiplexer;
use rejoin_core::{EngineConfig, Result};
use rejoin_incremental::Publisher;
use rejoin_query::{DocumentMatcher, Selector};
use rejoin_storage::Storage;
use std::rc::Rc;

/// Owns the change-stream registry of one storage backend and builds join
/// trees over it.
///
/// The engine is single-threaded and driven by [`pump`](Engine::pump): every
/// publication happens synchronously inside a pump call (or inside
/// [`Link::observe`] for the initial result set).
pub struct Engine {
    storage: Rc<dyn Storage>,
    streams: ChangeStreamDeMultiplexer,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine and pins the feeds of `config.keep_running`.
    pub fn new(storage: Rc<dyn Storage>, config: EngineConfig) -> Result<Self> {
        let streams = ChangeStreamDeMultiplexer::new(storage.clone(), &config);
        for collection in &config.keep_running {
            streams.watch(collection)?;
            tracing::debug!("Pinned change stream on {}", collection);
        }
        Ok(Self {
            storage,
            streams,
            config,
        })
    }

    /// Declares the root of a join tree narrating to `publisher`.
    ///
    /// The tree does nothing until [`Link::observe`] is called on the
    /// returned root. When the publisher stops, the tree is stopped.
    pub fn root(
        &self,
        publisher: Rc<dyn Publisher>,
        collection: &str,
        selector: Selector,
        options: LinkOptions,
    ) -> Result<Link> {
        let matcher = DocumentMatcher::new(selector)?;
        let scope = Rc::new(RootScope::new(
            self.storage.clone(),
            self.streams.clone(),
            publisher.clone(),
            self.config.clone(),
        ));
        let root = Link::root(scope, collection, matcher, options);

        let weak = root.downgrade();
        let name = collection.to_string();
        publisher.on_stop(Box::new(move || {
            if let Some(root) = weak.upgrade() {
                if let Err(err) = root.stop() {
                    tracing::warn!("Failed to stop join tree on {}: {}", name, err);
                }
            }
        }));
        Ok(root)
    }

    /// Delivers one batch of pending change events. Returns the number of
    /// raw events taken.
    pub fn pump(&self) -> Result<usize> {
        self.streams.pump()
    }

    /// Delivers change events until every feed is drained.
    pub fn pump_until_idle(&self) -> Result<usize> {
        self.streams.pump_until_idle()
    }

    /// Closes every change stream, pinned ones included.
    pub fn stop(&self) {
        self.streams.stop();
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn streams(&self) -> &ChangeStreamDeMultiplexer {
        &self.streams
    }
}
