//! State shared by every node of one join tree.

use crate::stream::ChangeStreamDeMultiplexer;
use hashbrown::HashMap;
use rejoin_core::EngineConfig;
use rejoin_incremental::{ForeignKeyRegistry, Publisher};
use rejoin_storage::Storage;
use std::cell::RefCell;
use std::rc::Rc;

/// Services and registries owned by a root and reached by its descendants.
///
/// Nodes targeting the same collection share one registry, so a child
/// reachable through two join paths is one entity.
pub(crate) struct RootScope {
    pub(crate) storage: Rc<dyn Storage>,
    pub(crate) streams: ChangeStreamDeMultiplexer,
    pub(crate) publisher: Rc<dyn Publisher>,
    pub(crate) config: EngineConfig,
    registries: RefCell<HashMap<String, Rc<RefCell<ForeignKeyRegistry>>>>,
}

impl RootScope {
    pub(crate) fn new(
        storage: Rc<dyn Storage>,
        streams: ChangeStreamDeMultiplexer,
        publisher: Rc<dyn Publisher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            streams,
            publisher,
            config,
            registries: RefCell::new(HashMap::new()),
        }
    }

    /// The registry of `collection`, created on first use.
    pub(crate) fn registry(&self, collection: &str) -> Rc<RefCell<ForeignKeyRegistry>> {
        self.registries
            .borrow_mut()
            .entry(collection.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(ForeignKeyRegistry::new())))
            .clone()
    }

    /// Ends a publication drain cycle on every registry.
    pub(crate) fn clear_all(&self) {
        for registry in self.registries.borrow().values() {
            registry.borrow_mut().clear();
        }
    }
}
