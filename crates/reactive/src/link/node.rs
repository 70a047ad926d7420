//! Join tree nodes.
//!
//! Every node shares the same propagation contract (`parent_added`,
//! `parent_changed`, `parent_removed`, `commit`, `flush`, `observe`, `stop`);
//! the join kind only supplies how parent documents become child edges and
//! how the node reacts to its own collection's change feed.

use super::root::RootJoin;
use super::scope::RootScope;
use super::selector::SelectorJoin;
use super::static_join::StaticJoin;
use crate::change::ChangeEvent;
use crate::child::ChildDeMultiplexer;
use crate::options::LinkOptions;
use crate::stream::{ChangeListener, ListenerHandle};
use rejoin_core::{doc_id, next_owner_id, DocId, Document, Error, OwnerId, Projection, Result};
use rejoin_incremental::{OwnerDelta, PublicationContext};
use rejoin_query::selector::by_ids;
use rejoin_storage::RawChangeEvent;
use std::cell::{RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

pub(crate) type NodeRef = Rc<RefCell<LinkNode>>;

/// Lifecycle of a join node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Declared, not yet watching anything.
    Constructed,
    /// Watching its collection and publishing.
    Observing,
    /// Torn down. Terminal.
    Stopped,
}

pub(crate) enum LinkKind {
    Root(RootJoin),
    Static(StaticJoin),
    Selector(SelectorJoin),
}

impl LinkKind {
    fn name(&self) -> &'static str {
        match self {
            LinkKind::Root(_) => "root",
            LinkKind::Static(_) => "static",
            LinkKind::Selector(_) => "selector",
        }
    }
}

/// Borrows a node, reporting re-entrant access as an error.
pub(crate) fn borrow_node(node: &NodeRef) -> Result<RefMut<'_, LinkNode>> {
    node.try_borrow_mut()
        .map_err(|_| Error::invalid_state("join node re-entered while settling"))
}

/// State common to every join kind.
pub(crate) struct NodeCore {
    pub(crate) owner: OwnerId,
    pub(crate) collection: String,
    pub(crate) state: LinkState,
    pub(crate) context: PublicationContext,
    /// Children this node started or stopped referencing since its last
    /// publication.
    pub(crate) pending: OwnerDelta,
    /// Documents already at hand for this window, by id.
    pub(crate) staged: BTreeMap<DocId, Document>,
    pub(crate) children: ChildDeMultiplexer,
    pub(crate) parent: Weak<RefCell<LinkNode>>,
    pub(crate) scope: Rc<RootScope>,
    listener: Option<ListenerHandle>,
}

impl NodeCore {
    fn new(
        scope: Rc<RootScope>,
        parent: Weak<RefCell<LinkNode>>,
        collection: &str,
        options: LinkOptions,
    ) -> Self {
        let owner = next_owner_id();
        let context = PublicationContext::new(
            scope.registry(collection),
            scope.publisher.clone(),
            collection,
            owner,
        )
        .with_projection(options.fields)
        .with_skip_publication(options.skip_publication);
        Self {
            owner,
            collection: collection.to_string(),
            state: LinkState::Constructed,
            context,
            pending: OwnerDelta::new(),
            staged: BTreeMap::new(),
            children: ChildDeMultiplexer::new(),
            parent,
            scope,
            listener: None,
        }
    }

    #[inline]
    pub(crate) fn is_observing(&self) -> bool {
        self.state == LinkState::Observing
    }

    /// Adds `keys` to the edge of `source`.
    pub(crate) fn track(&mut self, source: &str, keys: Vec<DocId>) {
        let delta = self.context.add_to_registry(source, keys);
        self.pending.merge(delta);
    }

    /// Sets the edge of `source` to `keys`; `None` or nothing clears it.
    pub(crate) fn link_edge(&mut self, source: &str, keys: Option<Vec<DocId>>) {
        let delta = match keys {
            Some(keys) if !keys.is_empty() => self.context.replace_from_registry(source, keys),
            _ => self.context.remove_from_registry(source),
        };
        self.pending.merge(delta);
    }

    /// Clears the edge of `source`.
    pub(crate) fn unlink_edge(&mut self, source: &str) {
        let delta = self.context.remove_from_registry(source);
        self.pending.merge(delta);
    }

    /// Removes `id` from the edge of `source`.
    pub(crate) fn untrack(&mut self, source: &str, id: &str) {
        let delta = self
            .context
            .remove_children_from_registry(source, vec![id.to_string()]);
        self.pending.merge(delta);
    }

    /// Removes `id` from every edge of this node.
    pub(crate) fn unlink_child(&mut self, id: &str) {
        let sources = self
            .context
            .registry()
            .borrow()
            .owner_sources_of(self.owner, id);
        for source in sources {
            let delta = self
                .context
                .remove_children_from_registry(&source, vec![id.to_string()]);
            self.pending.merge(delta);
        }
    }

    /// Returns true if the edge of `source` contains `id`.
    pub(crate) fn is_linked(&self, source: &str, id: &str) -> bool {
        self.context
            .registry()
            .borrow()
            .children_of(self.owner, source)
            .map(|children| children.contains(id))
            .unwrap_or(false)
    }

    pub(crate) fn stage(&mut self, id: DocId, doc: Document) {
        self.staged.insert(id, doc);
    }

    /// Resolves ids to documents: staged ones first, the rest with one
    /// `$in` lookup.
    fn fetch(&mut self, ids: Vec<DocId>) -> Result<BTreeMap<DocId, Document>> {
        let mut docs = BTreeMap::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.staged.remove(&id) {
                Some(doc) => {
                    docs.insert(id, doc);
                }
                None => missing.push(id),
            }
        }
        if missing.is_empty() {
            return Ok(docs);
        }

        tracing::debug!(
            "Fetching {} documents from {} with $in",
            missing.len(),
            self.collection
        );
        let found =
            self.scope
                .storage
                .find(&self.collection, &by_ids(missing.iter()), &Projection::All)?;
        for doc in found {
            if let Some(id) = doc_id(&doc) {
                docs.insert(id, doc);
            }
        }
        for id in &missing {
            if !docs.contains_key(id) {
                tracing::warn!("{}/{} is referenced but does not exist", self.collection, id);
            }
        }
        Ok(docs)
    }

    /// Narrates this node's pending delta, removals first, then hands the
    /// same delta to its children.
    pub(crate) fn publish_pending(&mut self) -> Result<()> {
        let (added, removed) = self.pending.take();
        for id in &removed {
            self.context.removed(id);
            self.children.parent_removed(id)?;
        }

        if !added.is_empty() {
            // Documents are needed for children, or to announce ids this
            // node narrates.
            let needed: Vec<DocId> = if self.children.is_empty() {
                let registry = self.context.registry();
                let registry = registry.borrow();
                let narrated: Vec<DocId> = added
                    .iter()
                    .filter(|id| {
                        registry.is_primary_for_child_key(self.owner, id)
                            && registry.added().contains(*id)
                    })
                    .cloned()
                    .collect();
                narrated
            } else {
                added.iter().cloned().collect()
            };
            let docs = self.fetch(needed)?;
            tracing::trace!(
                "{} {} added {} of {} children",
                self.collection,
                self.owner,
                docs.len(),
                added.len()
            );
            for (id, doc) in &docs {
                self.context.added(id, doc);
                self.children.parent_added(id, doc)?;
            }
        }
        self.staged.clear();
        Ok(())
    }
}

/// One node of a join tree.
pub(crate) struct LinkNode {
    pub(crate) core: NodeCore,
    pub(crate) kind: LinkKind,
}

impl LinkNode {
    pub(crate) fn new_root(
        scope: Rc<RootScope>,
        collection: &str,
        root: RootJoin,
        options: LinkOptions,
    ) -> NodeRef {
        Rc::new(RefCell::new(LinkNode {
            core: NodeCore::new(scope, Weak::new(), collection, options),
            kind: LinkKind::Root(root),
        }))
    }

    /// Declares a child join under `parent`. Only valid before `parent`
    /// starts observing.
    pub(crate) fn new_child(
        parent: &NodeRef,
        collection: &str,
        kind: LinkKind,
        options: LinkOptions,
    ) -> Result<NodeRef> {
        let mut this = borrow_node(parent)?;
        if this.core.state != LinkState::Constructed {
            return Err(Error::invalid_state(format!(
                "cannot declare a join under {} after observe or stop",
                this.core.collection
            )));
        }
        let child = Rc::new(RefCell::new(LinkNode {
            core: NodeCore::new(
                this.core.scope.clone(),
                Rc::downgrade(parent),
                collection,
                options,
            ),
            kind,
        }));
        this.core.children.push(child.clone());
        Ok(child)
    }

    pub(crate) fn parent_added(&mut self, source: &str, doc: &Document) -> Result<()> {
        self.parent_upsert(source, doc)
    }

    pub(crate) fn parent_changed(&mut self, source: &str, doc: &Document) -> Result<()> {
        self.parent_upsert(source, doc)
    }

    fn parent_upsert(&mut self, source: &str, doc: &Document) -> Result<()> {
        if !self.core.is_observing() {
            return Ok(());
        }
        match &mut self.kind {
            LinkKind::Root(_) => {}
            LinkKind::Static(join) => join.parent_upsert(&mut self.core, source, doc),
            LinkKind::Selector(join) => join.parent_upsert(source, doc),
        }
        Ok(())
    }

    pub(crate) fn parent_removed(&mut self, source: &str) -> Result<()> {
        if !self.core.is_observing() {
            return Ok(());
        }
        match &mut self.kind {
            LinkKind::Root(_) => {}
            LinkKind::Static(_) => self.core.unlink_edge(source),
            LinkKind::Selector(join) => join.parent_removed(source),
        }
        Ok(())
    }

    /// Resolves queued work into registry changes. Root and static joins
    /// also publish here; selector joins publish in [`flush`](Self::flush).
    pub(crate) fn commit(&mut self) -> Result<()> {
        if !self.core.is_observing() {
            return Ok(());
        }
        match &mut self.kind {
            LinkKind::Root(_) | LinkKind::Static(_) => {
                self.core.publish_pending()?;
                self.core.children.settle()
            }
            LinkKind::Selector(join) => join.commit(&mut self.core),
        }
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if !self.core.is_observing() {
            return Ok(());
        }
        match &mut self.kind {
            LinkKind::Selector(join) => join.flush(&mut self.core),
            _ => Ok(()),
        }
    }

    /// Starts watching. A root also runs its cold query and settles the tree.
    pub(crate) fn observe(node: &NodeRef) -> Result<()> {
        let weak = Rc::downgrade(node);
        let mut guard = borrow_node(node)?;
        let this = &mut *guard;
        match this.core.state {
            LinkState::Constructed => {}
            LinkState::Observing => {
                return Err(Error::already_observing(format!(
                    "{} join on {}",
                    this.kind.name(),
                    this.core.collection
                )))
            }
            LinkState::Stopped => {
                return Err(Error::invalid_state(format!(
                    "{} join on {} is stopped",
                    this.kind.name(),
                    this.core.collection
                )))
            }
        }

        this.attach(weak)?;
        this.core.state = LinkState::Observing;
        tracing::debug!(
            "Observing {} join on {} (owner {})",
            this.kind.name(),
            this.core.collection,
            this.core.owner
        );
        this.core.children.observe()?;

        if let LinkKind::Root(root) = &this.kind {
            root.cold_start(&mut this.core)?;
            this.commit()?;
            this.flush()?;
            this.core.scope.clear_all();
        }
        Ok(())
    }

    fn attach(&mut self, weak: Weak<RefCell<LinkNode>>) -> Result<()> {
        let scope = self.core.scope.clone();
        if let LinkKind::Selector(_) = self.kind {
            if scope.config.pin_selector_feeds {
                scope.streams.watch(&self.core.collection)?;
            }
        }
        let handle = scope
            .streams
            .attach(&self.core.collection, Rc::new(NodeListener { node: weak }))?;
        self.core.listener = Some(handle);
        Ok(())
    }

    /// Applies one event of this node's own collection to the registry.
    /// Publication of added and removed documents waits for [`settle`](Self::settle).
    fn on_event(&mut self, event: &ChangeEvent) -> Result<()> {
        if !self.core.is_observing() {
            return Ok(());
        }
        match &mut self.kind {
            LinkKind::Root(join) => join.on_event(&mut self.core, event),
            LinkKind::Static(join) => join.on_event(&mut self.core, event),
            LinkKind::Selector(join) => join.on_event(event),
        }
    }

    /// Settles the subtree once after a pass of own-collection events.
    fn settle(&mut self) -> Result<()> {
        self.commit()?;
        self.flush()
    }

    /// Detaches from the change feed and stops every child. Idempotent.
    pub(crate) fn stop(&mut self) -> Result<()> {
        if self.core.state == LinkState::Stopped {
            return Ok(());
        }
        self.core.state = LinkState::Stopped;
        let detached = match self.core.listener.take() {
            Some(mut handle) => handle.stop(),
            None => Ok(()),
        };
        let children = self.core.children.stop();
        self.core.pending.clear();
        self.core.staged.clear();
        if let LinkKind::Selector(join) = &mut self.kind {
            join.reset();
        }
        tracing::debug!(
            "Stopped {} join on {} (owner {})",
            self.kind.name(),
            self.core.collection,
            self.core.owner
        );
        detached.and(children)
    }
}

/// Feed listener of one node. Holds the node weakly so a dropped tree
/// detaches on its own.
struct NodeListener {
    node: Weak<RefCell<LinkNode>>,
}

impl ChangeListener for NodeListener {
    fn on_change(&self, event: &ChangeEvent, _raw: &RawChangeEvent) -> Result<()> {
        let node = match self.node.upgrade() {
            Some(node) => node,
            None => return Ok(()),
        };
        let mut this = borrow_node(&node)?;
        this.on_event(event)
    }

    fn on_settle(&self) -> Result<()> {
        let node = match self.node.upgrade() {
            Some(node) => node,
            None => return Ok(()),
        };
        let mut this = borrow_node(&node)?;
        this.settle()
    }

    fn on_pass_end(&self) {
        let node = match self.node.upgrade() {
            Some(node) => node,
            None => return,
        };
        let this = match node.try_borrow() {
            Ok(this) => this,
            Err(_) => return,
        };
        this.core.scope.clear_all();
    }
}
