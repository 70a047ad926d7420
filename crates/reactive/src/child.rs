//! Fan-out of parent notifications to sub-joins.

use crate::link::node::{borrow_node, LinkNode, NodeRef};
use rejoin_core::{Document, Result};

/// The sub-joins of one node, notified in declaration order.
#[derive(Default)]
pub(crate) struct ChildDeMultiplexer {
    children: Vec<NodeRef>,
}

impl ChildDeMultiplexer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, child: NodeRef) {
        self.children.push(child);
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn nodes(&self) -> &[NodeRef] {
        &self.children
    }

    pub(crate) fn parent_added(&self, source: &str, doc: &Document) -> Result<()> {
        for child in &self.children {
            borrow_node(child)?.parent_added(source, doc)?;
        }
        Ok(())
    }

    pub(crate) fn parent_changed(&self, source: &str, doc: &Document) -> Result<()> {
        for child in &self.children {
            borrow_node(child)?.parent_changed(source, doc)?;
        }
        Ok(())
    }

    pub(crate) fn parent_removed(&self, source: &str) -> Result<()> {
        for child in &self.children {
            borrow_node(child)?.parent_removed(source)?;
        }
        Ok(())
    }

    pub(crate) fn commit(&self) -> Result<()> {
        for child in &self.children {
            borrow_node(child)?.commit()?;
        }
        Ok(())
    }

    pub(crate) fn flush(&self) -> Result<()> {
        for child in &self.children {
            borrow_node(child)?.flush()?;
        }
        Ok(())
    }

    /// Commits every child, then flushes every child.
    pub(crate) fn settle(&self) -> Result<()> {
        self.commit()?;
        self.flush()
    }

    pub(crate) fn observe(&self) -> Result<()> {
        for child in &self.children {
            LinkNode::observe(child)?;
        }
        Ok(())
    }

    /// Stops every child. All children are stopped even if one fails; the
    /// first error is returned.
    pub(crate) fn stop(&self) -> Result<()> {
        let mut first = Ok(());
        for child in &self.children {
            let stopped = borrow_node(child).and_then(|mut node| node.stop());
            if let Err(err) = stopped {
                tracing::warn!("Failed to stop sub-join: {}", err);
                if first.is_ok() {
                    first = Err(err);
                }
            }
        }
        first
    }
}
