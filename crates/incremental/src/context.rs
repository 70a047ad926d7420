//! Per-node publication context.
//!
//! A `PublicationContext` binds one join node (its owner id) to the registry
//! shared by every node targeting the same collection, and turns registry
//! diffs into publication calls. Membership decides whether a call is made at
//! all; primary ownership decides who narrates `added` and `changed`, and the
//! owner that dropped the last reference narrates `removed`.

use crate::publisher::Publisher;
use crate::registry::{ForeignKeyRegistry, OwnerDelta};
use rejoin_core::{DocId, Document, FieldDiff, OwnerId, Projection, ID_FIELD};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Publication facade of one join node over a shared registry.
pub struct PublicationContext {
    registry: Rc<RefCell<ForeignKeyRegistry>>,
    publisher: Rc<dyn Publisher>,
    collection: String,
    owner: OwnerId,
    projection: Projection,
    skip_publication: bool,
}

impl PublicationContext {
    /// Creates a context narrating `collection` for `owner`.
    pub fn new(
        registry: Rc<RefCell<ForeignKeyRegistry>>,
        publisher: Rc<dyn Publisher>,
        collection: impl Into<String>,
        owner: OwnerId,
    ) -> Self {
        Self {
            registry,
            publisher,
            collection: collection.into(),
            owner,
            projection: Projection::All,
            skip_publication: false,
        }
    }

    /// Sets the field projection applied to published documents and diffs.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Keeps registry bookkeeping but suppresses every publication call.
    pub fn with_skip_publication(mut self, skip: bool) -> Self {
        self.skip_publication = skip;
        self
    }

    #[inline]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[inline]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    #[inline]
    pub fn skips_publication(&self) -> bool {
        self.skip_publication
    }

    /// The shared registry.
    pub fn registry(&self) -> Rc<RefCell<ForeignKeyRegistry>> {
        self.registry.clone()
    }

    /// Child keys newly referenced since the last clear.
    pub fn added_children_ids(&self) -> BTreeSet<DocId> {
        self.registry.borrow().added().clone()
    }

    /// Child keys newly released since the last clear.
    pub fn removed_children_ids(&self) -> BTreeSet<DocId> {
        self.registry.borrow().removed().clone()
    }

    /// Returns true if this context's owner still references `id`.
    pub fn has_child_key(&self, id: &str) -> bool {
        self.registry.borrow().has_child_key(self.owner, id)
    }

    /// Returns true if this context narrates changes of `id`.
    pub fn is_primary(&self, id: &str) -> bool {
        self.registry
            .borrow()
            .is_primary_for_child_key(self.owner, id)
    }

    pub fn add_to_registry<I>(&self, source: &str, keys: I) -> OwnerDelta
    where
        I: IntoIterator<Item = DocId>,
    {
        self.registry.borrow_mut().add(self.owner, source, keys)
    }

    pub fn replace_from_registry<I>(&self, source: &str, keys: I) -> OwnerDelta
    where
        I: IntoIterator<Item = DocId>,
    {
        self.registry.borrow_mut().replace(self.owner, source, keys)
    }

    pub fn remove_from_registry(&self, source: &str) -> OwnerDelta {
        self.registry.borrow_mut().remove(self.owner, source)
    }

    pub fn remove_children_from_registry<I>(&self, source: &str, keys: I) -> OwnerDelta
    where
        I: IntoIterator<Item = DocId>,
    {
        self.registry
            .borrow_mut()
            .remove_children(self.owner, source, keys)
    }

    /// Publishes `doc` if `id` is a pending addition and this context is its
    /// primary owner. A non-primary call leaves the addition pending. Returns
    /// true if the publisher was called.
    pub fn added(&self, id: &str, doc: &Document) -> bool {
        {
            let mut registry = self.registry.borrow_mut();
            if !registry.is_primary_for_child_key(self.owner, id) {
                tracing::trace!("{}/{} owned elsewhere, skipping added", self.collection, id);
                return false;
            }
            if !registry.take_added(id) {
                tracing::trace!("{}/{} not pending, skipping added", self.collection, id);
                return false;
            }
        }
        if self.skip_publication {
            return false;
        }
        let mut doc = self.projection.apply(doc);
        doc.remove(ID_FIELD);
        self.publisher.added(&self.collection, id, &doc);
        self.registry.borrow_mut().mark_published(id);
        true
    }

    /// Publishes `diff` if it is non-empty after projection, `id` is
    /// announced, and this context is its primary owner.
    pub fn changed(&self, id: &str, diff: &FieldDiff) -> bool {
        let mut diff = self.projection.apply_diff(diff);
        diff.remove(ID_FIELD);
        if diff.is_empty() || self.skip_publication {
            return false;
        }
        {
            let registry = self.registry.borrow();
            if !registry.is_published(id) {
                return false;
            }
            if !registry.is_primary_for_child_key(self.owner, id) {
                tracing::trace!("{}/{} owned elsewhere, skipping changed", self.collection, id);
                return false;
            }
        }
        self.publisher.changed(&self.collection, id, &diff);
        true
    }

    /// Publishes the removal of `id` if it is a pending removal of an
    /// announced document and this context's owner released it last.
    ///
    /// An announced document is retracted even when this context skips
    /// publication, so the boundary never keeps a document nobody references.
    pub fn removed(&self, id: &str) -> bool {
        {
            let mut registry = self.registry.borrow_mut();
            if !registry.is_releaser(self.owner, id) {
                return false;
            }
            if !registry.take_removed(id) {
                return false;
            }
            if !registry.unmark_published(id) {
                tracing::trace!("{}/{} was never announced", self.collection, id);
                return false;
            }
        }
        self.publisher.removed(&self.collection, id);
        true
    }
}
