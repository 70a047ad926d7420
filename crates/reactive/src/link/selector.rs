//! Selector join: parent documents describe their children with a query.
//!
//! Work arrives as tasks (parent upserts and removals, own-collection
//! changes) and is settled in two phases. `commit` turns every queued parent
//! selector that actually changed into one batched `$or` query and updates
//! the registry; `flush` publishes the result and forwards field changes to
//! sub-joins. Tasks queued during one pump pass are committed together. Siblings commit before any of them flushes, so a child that
//! moves from one join path to another within a window is not narrated as a
//! removal followed by an addition.

use super::node::NodeCore;
use crate::change::ChangeEvent;
use crate::resolve::SelectorResolver;
use hashbrown::HashSet;
use rejoin_core::{doc_id, full_document_diff, DocId, Document, FieldDiff, Projection, Result};
use rejoin_query::selector::any_of;
use rejoin_query::{DocumentMatcher, QueryResolver};
use std::rc::Rc;

enum SelectorTask {
    ParentUpsert { source: DocId, doc: Document },
    ParentRemoved { source: DocId },
    DocAdded { id: DocId, doc: Document },
    DocChanged { id: DocId, diff: FieldDiff, doc: Document },
    DocRemoved { id: DocId },
}

enum Step {
    Resolve { source: DocId, matcher: DocumentMatcher },
    Clear { source: DocId },
    Own(SelectorTask),
}

pub(crate) struct SelectorJoin {
    resolver: Rc<SelectorResolver>,
    queries: QueryResolver,
    tasks: Vec<SelectorTask>,
    /// Field changes of tracked children awaiting flush.
    changed: Vec<(DocId, FieldDiff, Document)>,
}

impl SelectorJoin {
    pub(crate) fn new(resolver: Rc<SelectorResolver>) -> Self {
        Self {
            resolver,
            queries: QueryResolver::new(),
            tasks: Vec::new(),
            changed: Vec::new(),
        }
    }

    pub(crate) fn parent_upsert(&mut self, source: &str, doc: &Document) {
        self.tasks.push(SelectorTask::ParentUpsert {
            source: source.to_string(),
            doc: doc.clone(),
        });
    }

    pub(crate) fn parent_removed(&mut self, source: &str) {
        self.tasks.push(SelectorTask::ParentRemoved {
            source: source.to_string(),
        });
    }

    /// Queues one own-collection event until the node settles.
    pub(crate) fn on_event(&mut self, event: &ChangeEvent) -> Result<()> {
        let task = match event {
            ChangeEvent::Added { id, doc } => SelectorTask::DocAdded {
                id: id.clone(),
                doc: doc.clone(),
            },
            ChangeEvent::Changed { id, diff, doc } => SelectorTask::DocChanged {
                id: id.clone(),
                diff: diff.clone(),
                doc: doc.clone(),
            },
            ChangeEvent::Replaced { id, doc } => SelectorTask::DocChanged {
                id: id.clone(),
                diff: full_document_diff(doc),
                doc: doc.clone(),
            },
            ChangeEvent::Removed { id } => SelectorTask::DocRemoved { id: id.clone() },
        };
        self.tasks.push(task);
        Ok(())
    }

    /// Resolves queued tasks into registry changes.
    pub(crate) fn commit(&mut self, core: &mut NodeCore) -> Result<()> {
        let tasks = std::mem::take(&mut self.tasks);
        if tasks.is_empty() {
            return Ok(());
        }

        let mut steps = Vec::with_capacity(tasks.len());
        let mut batch = Vec::new();
        let mut batched: HashSet<String> = HashSet::new();
        let mut touched: HashSet<DocId> = HashSet::new();
        for task in tasks {
            match task {
                SelectorTask::ParentUpsert { source, doc } => match (self.resolver)(&doc) {
                    None => {
                        touched.insert(source.clone());
                        steps.push(Step::Clear { source });
                    }
                    Some(selector) => {
                        if !touched.contains(&source) && self.queries.is_current(&source, &selector)
                        {
                            tracing::trace!("Selector of {} unchanged", source);
                            continue;
                        }
                        let matcher = DocumentMatcher::new(selector)?;
                        if batched.insert(matcher.key().to_string()) {
                            batch.push(matcher.selector().clone());
                        }
                        touched.insert(source.clone());
                        steps.push(Step::Resolve { source, matcher });
                    }
                },
                SelectorTask::ParentRemoved { source } => {
                    touched.insert(source.clone());
                    steps.push(Step::Clear { source });
                }
                own => steps.push(Step::Own(own)),
            }
        }

        let found = if batch.is_empty() {
            Vec::new()
        } else {
            tracing::debug!(
                "Resolving {} selectors on {} in one query",
                batch.len(),
                core.collection
            );
            core.scope
                .storage
                .find(&core.collection, &any_of(batch), &Projection::All)?
        };

        for step in steps {
            match step {
                Step::Resolve { source, matcher } => {
                    let mut ids = Vec::new();
                    for doc in found.iter().filter(|doc| matcher.matches(doc)) {
                        if let Some(id) = doc_id(doc) {
                            core.stage(id.clone(), doc.clone());
                            ids.push(id);
                        }
                    }
                    core.link_edge(&source, Some(ids));
                    self.queries.set(source, matcher);
                }
                Step::Clear { source } => {
                    self.queries.remove(&source);
                    core.unlink_edge(&source);
                }
                Step::Own(SelectorTask::DocAdded { id, doc }) => {
                    self.doc_upsert(core, id, None, doc)
                }
                Step::Own(SelectorTask::DocChanged { id, diff, doc }) => {
                    self.doc_upsert(core, id, Some(diff), doc)
                }
                Step::Own(SelectorTask::DocRemoved { id }) => core.unlink_child(&id),
                Step::Own(_) => {}
            }
        }
        Ok(())
    }

    /// Re-evaluates every current selector against one document of this
    /// join's collection.
    fn doc_upsert(&mut self, core: &mut NodeCore, id: DocId, diff: Option<FieldDiff>, doc: Document) {
        let was_tracked = core.context.has_child_key(&id);
        // Left and came back within one pass: still announced.
        let relinked = !was_tracked && core.pending.is_removed(&id);
        let verdicts: Vec<(DocId, bool)> = self
            .queries
            .iter()
            .map(|(source, matcher)| (source.clone(), matcher.matches(&doc)))
            .collect();
        for (source, matches) in verdicts {
            let linked = core.is_linked(&source, &id);
            if matches && !linked {
                core.track(&source, vec![id.clone()]);
            } else if !matches && linked {
                core.untrack(&source, &id);
            }
        }

        if !core.context.has_child_key(&id) {
            return;
        }
        if relinked {
            let diff = full_document_diff(&doc);
            self.changed.push((id, diff, doc));
            return;
        }
        core.stage(id.clone(), doc.clone());
        if let (true, Some(diff)) = (was_tracked, diff) {
            self.changed.push((id, diff, doc));
        }
    }

    /// Publishes the committed delta and forwards pending field changes.
    pub(crate) fn flush(&mut self, core: &mut NodeCore) -> Result<()> {
        core.publish_pending()?;
        for (id, diff, doc) in std::mem::take(&mut self.changed) {
            if core.context.has_child_key(&id) {
                core.context.changed(&id, &diff);
                core.children.parent_changed(&id, &doc)?;
            }
        }
        core.children.settle()
    }

    pub(crate) fn reset(&mut self) {
        self.queries.clear();
        self.tasks.clear();
        self.changed.clear();
    }
}
