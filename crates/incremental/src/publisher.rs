//! Publication boundary.
//!
//! A `Publisher` is the host subscription a join tree narrates to. The engine
//! guarantees that, per collection, it never calls `added` twice for one id
//! without an intervening `removed`, never calls `changed` for an id that is
//! not currently added, and never calls `changed` with an empty diff.

use rejoin_core::{DocId, Document, FieldDiff};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Callback invoked when the host subscription stops.
pub type StopCallback = Box<dyn FnOnce()>;

/// The host side of one subscription.
pub trait Publisher {
    /// A document became visible.
    fn added(&self, collection: &str, id: &str, doc: &Document);

    /// Top-level fields of a visible document changed.
    fn changed(&self, collection: &str, id: &str, diff: &FieldDiff);

    /// A document is no longer visible.
    fn removed(&self, collection: &str, id: &str);

    /// Registers a callback to run when the subscription stops.
    fn on_stop(&self, callback: StopCallback);
}

/// One recorded publication call.
#[derive(Clone, Debug, PartialEq)]
pub enum Published {
    Added {
        collection: String,
        id: DocId,
        doc: Document,
    },
    Changed {
        collection: String,
        id: DocId,
        diff: FieldDiff,
    },
    Removed {
        collection: String,
        id: DocId,
    },
}

impl Published {
    /// Collection of the call.
    pub fn collection(&self) -> &str {
        match self {
            Published::Added { collection, .. }
            | Published::Changed { collection, .. }
            | Published::Removed { collection, .. } => collection,
        }
    }

    /// Document id of the call.
    pub fn id(&self) -> &str {
        match self {
            Published::Added { id, .. }
            | Published::Changed { id, .. }
            | Published::Removed { id, .. } => id,
        }
    }

    /// Short name of the call: `added`, `changed` or `removed`.
    pub fn kind(&self) -> &'static str {
        match self {
            Published::Added { .. } => "added",
            Published::Changed { .. } => "changed",
            Published::Removed { .. } => "removed",
        }
    }
}

/// A publisher that records every call in order.
///
/// Clearing the recorder keeps what was visible at that point, so visibility
/// and violation checks stay meaningful across clears.
#[derive(Default)]
pub struct RecordingPublisher {
    events: RefCell<Vec<Published>>,
    baseline: RefCell<BTreeMap<String, BTreeSet<DocId>>>,
    stop_callbacks: RefCell<Vec<StopCallback>>,
}

impl RecordingPublisher {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded calls.
    pub fn events(&self) -> Vec<Published> {
        self.events.borrow().clone()
    }

    /// Takes the recorded calls, leaving the recorder empty.
    pub fn take(&self) -> Vec<Published> {
        let events = std::mem::take(&mut *self.events.borrow_mut());
        let mut baseline = self.baseline.borrow_mut();
        for event in &events {
            let ids = baseline.entry(event.collection().to_string()).or_default();
            match event {
                Published::Added { id, .. } => {
                    ids.insert(id.clone());
                }
                Published::Removed { id, .. } => {
                    ids.remove(id);
                }
                Published::Changed { .. } => {}
            }
        }
        events
    }

    /// Recorded calls for one collection.
    pub fn for_collection(&self, collection: &str) -> Vec<Published> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.collection() == collection)
            .cloned()
            .collect()
    }

    /// Calls rendered as `kind collection/id`, handy for order assertions.
    pub fn summary(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(|e| format!("{} {}/{}", e.kind(), e.collection(), e.id()))
            .collect()
    }

    /// Number of calls of one kind.
    pub fn count(&self, kind: &str) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// Ids currently visible in `collection`, replaying the recorded calls.
    pub fn visible(&self, collection: &str) -> BTreeSet<DocId> {
        let mut visible = self
            .baseline
            .borrow()
            .get(collection)
            .cloned()
            .unwrap_or_default();
        for event in self.events.borrow().iter() {
            match event {
                Published::Added { collection: c, id, .. } if c == collection => {
                    visible.insert(id.clone());
                }
                Published::Removed { collection: c, id } if c == collection => {
                    visible.remove(id);
                }
                _ => {}
            }
        }
        visible
    }

    /// Calls that break the boundary guarantees, described one per entry.
    pub fn violations(&self) -> Vec<String> {
        let mut visible = self.baseline.borrow().clone();
        let mut violations = Vec::new();
        let events = self.events.borrow();
        for (index, event) in events.iter().enumerate() {
            let ids = visible.entry(event.collection().to_string()).or_default();
            match event {
                Published::Added { id, .. } => {
                    if !ids.insert(id.clone()) {
                        violations.push(format!("#{} added {} twice", index, id));
                    }
                }
                Published::Changed { id, diff, .. } => {
                    if !ids.contains(id) {
                        violations.push(format!("#{} changed {} while not added", index, id));
                    }
                    if diff.is_empty() {
                        violations.push(format!("#{} changed {} with empty diff", index, id));
                    }
                }
                Published::Removed { id, .. } => {
                    if !ids.remove(id) {
                        violations.push(format!("#{} removed {} while not added", index, id));
                    }
                }
            }
        }
        violations
    }

    /// Forgets recorded calls, keeping what they left visible.
    pub fn clear(&self) {
        self.take();
    }

    /// Runs every registered stop callback, as the host does when the
    /// subscription ends.
    pub fn stop(&self) {
        let callbacks = std::mem::take(&mut *self.stop_callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }
}

impl Publisher for RecordingPublisher {
    fn added(&self, collection: &str, id: &str, doc: &Document) {
        self.events.borrow_mut().push(Published::Added {
            collection: collection.to_string(),
            id: id.to_string(),
            doc: doc.clone(),
        });
    }

    fn changed(&self, collection: &str, id: &str, diff: &FieldDiff) {
        self.events.borrow_mut().push(Published::Changed {
            collection: collection.to_string(),
            id: id.to_string(),
            diff: diff.clone(),
        });
    }

    fn removed(&self, collection: &str, id: &str) {
        self.events.borrow_mut().push(Published::Removed {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    fn on_stop(&self, callback: StopCallback) {
        self.stop_callbacks.borrow_mut().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejoin_core::FieldChange;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_records_in_order() {
        let publisher = RecordingPublisher::new();
        publisher.added("posts", "p1", &Document::new());
        publisher.removed("posts", "p1");

        assert_eq!(
            publisher.summary(),
            vec!["added posts/p1".to_string(), "removed posts/p1".to_string()]
        );
        assert_eq!(publisher.count("added"), 1);
        assert!(publisher.visible("posts").is_empty());
        assert!(publisher.violations().is_empty());
    }

    #[test]
    fn test_violations_detected() {
        let publisher = RecordingPublisher::new();
        publisher.added("posts", "p1", &Document::new());
        publisher.added("posts", "p1", &Document::new());
        publisher.changed("posts", "p2", &FieldDiff::new());
        publisher.removed("users", "u1");

        assert_eq!(publisher.violations().len(), 4);
    }

    #[test]
    fn test_changed_on_visible_is_clean() {
        let publisher = RecordingPublisher::new();
        let mut diff = FieldDiff::new();
        diff.insert("title".into(), FieldChange::Unset);
        publisher.added("posts", "p1", &Document::new());
        publisher.changed("posts", "p1", &diff);
        assert!(publisher.violations().is_empty());
        assert_eq!(publisher.for_collection("posts").len(), 2);
        assert_eq!(publisher.take().len(), 2);
        assert!(publisher.events().is_empty());
    }

    #[test]
    fn test_clear_keeps_visibility() {
        let publisher = RecordingPublisher::new();
        publisher.added("posts", "p1", &Document::new());
        publisher.clear();

        let mut diff = FieldDiff::new();
        diff.insert("title".into(), FieldChange::Unset);
        publisher.changed("posts", "p1", &diff);
        assert!(publisher.visible("posts").contains("p1"));
        publisher.removed("posts", "p1");
        assert!(publisher.violations().is_empty());
        assert!(publisher.visible("posts").is_empty());
        assert_eq!(publisher.summary(), vec!["changed posts/p1", "removed posts/p1"]);
    }

    #[test]
    fn test_stop_runs_callbacks_once() {
        let publisher = RecordingPublisher::new();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        publisher.on_stop(Box::new(move || counter.set(counter.get() + 1)));

        publisher.stop();
        publisher.stop();
        assert_eq!(fired.get(), 1);
    }
}
