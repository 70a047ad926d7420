//! Root join: the documents of one collection matching a selector.

use super::node::NodeCore;
use crate::change::ChangeEvent;
use rejoin_core::{doc_id, full_document_diff, Document, FieldDiff, Projection, Result};
use rejoin_query::DocumentMatcher;

/// A root tracks every matching document as an edge to itself.
pub(crate) struct RootJoin {
    matcher: DocumentMatcher,
}

impl RootJoin {
    pub(crate) fn new(matcher: DocumentMatcher) -> Self {
        Self { matcher }
    }

    /// Loads the initial result set.
    pub(crate) fn cold_start(&self, core: &mut NodeCore) -> Result<()> {
        let docs = core
            .scope
            .storage
            .find(&core.collection, self.matcher.selector(), &Projection::All)?;
        tracing::debug!("Cold start of {} found {} documents", core.collection, docs.len());
        for doc in docs {
            if let Some(id) = doc_id(&doc) {
                core.track(&id, vec![id.clone()]);
                core.stage(id, doc);
            }
        }
        Ok(())
    }

    /// Applies one event. Membership changes stay pending until the node
    /// settles; changes of announced documents are narrated right away.
    pub(crate) fn on_event(&mut self, core: &mut NodeCore, event: &ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::Added { id, doc } | ChangeEvent::Replaced { id, doc } => {
                self.update(core, id, &full_document_diff(doc), doc)
            }
            ChangeEvent::Changed { id, diff, doc } => self.update(core, id, diff, doc),
            ChangeEvent::Removed { id } => {
                core.unlink_edge(id);
                Ok(())
            }
        }
    }

    fn update(
        &self,
        core: &mut NodeCore,
        id: &str,
        diff: &FieldDiff,
        doc: &Document,
    ) -> Result<()> {
        let tracked = core.is_linked(id, id);
        match (tracked, self.matcher.matches(doc)) {
            (true, true) => {
                if core.pending.is_added(&id.to_string()) {
                    core.stage(id.to_string(), doc.clone());
                }
                core.context.changed(id, diff);
                core.children.parent_changed(id, doc)?;
            }
            (true, false) => core.unlink_edge(id),
            (false, true) => {
                // Left and came back within one pass: still announced.
                let relinked = core.pending.is_removed(&id.to_string());
                core.track(id, vec![id.to_string()]);
                if relinked {
                    core.context.changed(id, &full_document_diff(doc));
                    core.children.parent_changed(id, doc)?;
                } else {
                    core.stage(id.to_string(), doc.clone());
                }
            }
            (false, false) => {}
        }
        Ok(())
    }
}
