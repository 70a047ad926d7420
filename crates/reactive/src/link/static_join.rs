//! Static join: parent documents name their children by id.

use super::node::NodeCore;
use crate::change::ChangeEvent;
use crate::resolve::StaticResolver;
use rejoin_core::{full_document_diff, Document, Result};
use std::rc::Rc;

pub(crate) struct StaticJoin {
    resolver: Rc<StaticResolver>,
}

impl StaticJoin {
    pub(crate) fn new(resolver: Rc<StaticResolver>) -> Self {
        Self { resolver }
    }

    /// Re-resolves the edge of `source`. Publication happens on commit.
    pub(crate) fn parent_upsert(&mut self, core: &mut NodeCore, source: &str, doc: &Document) {
        let ids = (self.resolver)(doc);
        core.link_edge(source, ids);
    }

    /// Narrates field changes of held children. Sub-joins settle with the
    /// node.
    pub(crate) fn on_event(&mut self, core: &mut NodeCore, event: &ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::Changed { id, diff, doc } => {
                if core.context.has_child_key(id) {
                    core.context.changed(id, diff);
                    core.children.parent_changed(id, doc)?;
                }
            }
            ChangeEvent::Replaced { id, doc } => {
                if core.context.has_child_key(id) {
                    core.context.changed(id, &full_document_diff(doc));
                    core.children.parent_changed(id, doc)?;
                }
            }
            // Membership is decided by the parent; a child appearing or
            // vanishing is picked up the next time its parent re-resolves.
            ChangeEvent::Added { id, .. } | ChangeEvent::Removed { id } => {
                tracing::trace!("Static join on {} ignores {} of {}", core.collection, event.kind(), id);
            }
        }
        Ok(())
    }
}
