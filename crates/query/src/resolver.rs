//! Document matchers and the per-source query resolver.
//!
//! A [`DocumentMatcher`] pairs a compiled selector with an identity key derived
//! from the selector's canonical serialization. The [`QueryResolver`] remembers
//! the current matcher of every parent source so that a parent update that
//! produces the same selector can be recognised without re-resolving it.
//!
//! Identity is exact only for plain JSON selectors: two selectors that differ
//! textually but match the same documents (say `{a: {$in: [1]}}` and `{a: 1}`)
//! compare unequal and are resolved twice.

use crate::matcher::Matcher;
use crate::selector::{canonical, fingerprint, Selector};
use hashbrown::HashMap;
use rejoin_core::{DocId, Document, Result};
use std::rc::Rc;

/// A compiled selector with an identity key.
#[derive(Clone, Debug)]
pub struct DocumentMatcher {
    selector: Selector,
    key: String,
    fingerprint: u64,
    matcher: Rc<Matcher>,
}

impl DocumentMatcher {
    /// Compiles a selector.
    pub fn new(selector: Selector) -> Result<Self> {
        let matcher = Matcher::compile(&selector)?;
        let key = canonical(&selector);
        Ok(Self {
            fingerprint: fingerprint(&key),
            selector,
            key,
            matcher: Rc::new(matcher),
        })
    }

    /// Returns the selector this matcher was compiled from.
    #[inline]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Returns the identity key.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if both matchers were compiled from the same selector.
    #[inline]
    pub fn same_as(&self, other: &DocumentMatcher) -> bool {
        self.fingerprint == other.fingerprint && self.key == other.key
    }

    /// Evaluates the matcher against a document.
    #[inline]
    pub fn matches(&self, doc: &Document) -> bool {
        self.matcher.matches(doc)
    }
}

impl PartialEq for DocumentMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for DocumentMatcher {}

/// The current matcher of every parent source.
#[derive(Clone, Debug, Default)]
pub struct QueryResolver {
    matchers: HashMap<DocId, DocumentMatcher>,
}

impl QueryResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `matcher` differs from the one recorded for `source`.
    /// An unknown source always counts as changed.
    pub fn has_changed(&self, source: &str, matcher: &DocumentMatcher) -> bool {
        match self.matchers.get(source) {
            Some(current) => !current.same_as(matcher),
            None => true,
        }
    }

    /// Returns true if `selector` is already recorded for `source`. Only the
    /// canonical forms are compared; nothing is compiled.
    pub fn is_current(&self, source: &str, selector: &Selector) -> bool {
        self.matchers
            .get(source)
            .map(|current| current.key == canonical(selector))
            .unwrap_or(false)
    }

    /// Records the matcher for a source. Returns true if it changed.
    pub fn set(&mut self, source: impl Into<DocId>, matcher: DocumentMatcher) -> bool {
        let source = source.into();
        let changed = self.has_changed(&source, &matcher);
        if changed {
            self.matchers.insert(source, matcher);
        }
        changed
    }

    /// Forgets a source.
    pub fn remove(&mut self, source: &str) -> Option<DocumentMatcher> {
        self.matchers.remove(source)
    }

    /// Returns the matcher recorded for a source.
    pub fn get(&self, source: &str) -> Option<&DocumentMatcher> {
        self.matchers.get(source)
    }

    /// Returns the sources whose matcher accepts `doc`, in id order.
    pub fn sources_matching(&self, doc: &Document) -> Vec<DocId> {
        let mut sources: Vec<DocId> = self
            .matchers
            .iter()
            .filter(|(_, m)| m.matches(doc))
            .map(|(s, _)| s.clone())
            .collect();
        sources.sort();
        sources
    }

    /// Iterates over `(source, matcher)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&DocId, &DocumentMatcher)> {
        self.matchers.iter()
    }

    /// Returns the number of tracked sources.
    #[inline]
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Returns true if no source is tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Forgets every source.
    pub fn clear(&mut self) {
        self.matchers.clear();
    }
}
