//! Join trees.
//!
//! A tree is declared top-down from a root returned by
//! [`Engine::root`](crate::Engine::root): [`Link::link`] adds a static join
//! whose parent documents carry child ids, [`Link::select`] adds a selector
//! join whose parent documents produce a query. Observing the root starts
//! every node; stopping the root tears the whole tree down.
//!
//! ```ignore
//! let posts = engine.root(publisher, "posts", json!({"published": true}), LinkOptions::new())?;
//! let authors = posts.link("users", field_ids("author_id"), LinkOptions::new())?;
//! posts.select("comments", field_equals("post_id", "_id"), LinkOptions::new())?;
//! posts.observe()?;
//! ```

pub(crate) mod node;
mod root;
pub(crate) mod scope;
mod selector;
mod static_join;

pub use node::LinkState;

use crate::options::LinkOptions;
use node::{borrow_node, LinkKind, LinkNode, NodeRef};
use rejoin_core::{DocId, Document, Error, OwnerId, Result};
use rejoin_query::{DocumentMatcher, Selector};
use root::RootJoin;
use scope::RootScope;
use selector::SelectorJoin;
use static_join::StaticJoin;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Handle to one node of a join tree.
#[derive(Clone)]
pub struct Link {
    node: NodeRef,
}

impl Link {
    pub(crate) fn root(
        scope: Rc<RootScope>,
        collection: &str,
        matcher: DocumentMatcher,
        options: LinkOptions,
    ) -> Self {
        Self {
            node: LinkNode::new_root(scope, collection, RootJoin::new(matcher), options),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakLink {
        WeakLink(Rc::downgrade(&self.node))
    }

    /// Declares a static join on `collection`. `resolver` maps a document of
    /// this node to the ids of its children; `None` or no ids means none.
    pub fn link<F>(&self, collection: &str, resolver: F, options: LinkOptions) -> Result<Link>
    where
        F: Fn(&Document) -> Option<Vec<DocId>> + 'static,
    {
        let kind = LinkKind::Static(StaticJoin::new(Rc::new(resolver)));
        let node = LinkNode::new_child(&self.node, collection, kind, options)?;
        Ok(Link { node })
    }

    /// Declares a selector join on `collection`. `resolver` maps a document
    /// of this node to the selector of its children; `None` means none.
    pub fn select<F>(&self, collection: &str, resolver: F, options: LinkOptions) -> Result<Link>
    where
        F: Fn(&Document) -> Option<Selector> + 'static,
    {
        let kind = LinkKind::Selector(SelectorJoin::new(Rc::new(resolver)));
        let node = LinkNode::new_child(&self.node, collection, kind, options)?;
        Ok(Link { node })
    }

    /// Starts the tree. Only valid on a root; sub-joins start with it.
    pub fn observe(&self) -> Result<()> {
        if !self.is_root() {
            return Err(Error::invalid_state(
                "observe is only valid on the root of a join tree",
            ));
        }
        LinkNode::observe(&self.node)
    }

    /// Stops this node and everything below it.
    pub fn stop(&self) -> Result<()> {
        borrow_node(&self.node)?.stop()
    }

    pub fn owner(&self) -> OwnerId {
        self.node.borrow().core.owner
    }

    pub fn collection(&self) -> String {
        self.node.borrow().core.collection.clone()
    }

    pub fn state(&self) -> LinkState {
        self.node.borrow().core.state
    }

    pub fn is_root(&self) -> bool {
        matches!(self.node.borrow().kind, LinkKind::Root(_))
    }

    /// The node this one was declared under; `None` for a root.
    pub fn parent(&self) -> Option<Link> {
        self.node
            .borrow()
            .core
            .parent
            .upgrade()
            .map(|node| Link { node })
    }

    /// The root of this node's tree.
    pub fn root_link(&self) -> Link {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Handles of the sub-joins declared directly under this node.
    pub fn children(&self) -> Vec<Link> {
        self.node
            .borrow()
            .core
            .children
            .nodes()
            .iter()
            .map(|node| Link { node: node.clone() })
            .collect()
    }
}

/// Non-owning handle to a join node.
pub(crate) struct WeakLink(Weak<RefCell<LinkNode>>);

impl WeakLink {
    pub(crate) fn upgrade(&self) -> Option<Link> {
        self.0.upgrade().map(|node| Link { node })
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.node.try_borrow() {
            Ok(node) => f
                .debug_struct("Link")
                .field("collection", &node.core.collection)
                .field("owner", &node.core.owner)
                .field("state", &node.core.state)
                .finish(),
            Err(_) => f.write_str("Link { <settling> }"),
        }
    }
}
