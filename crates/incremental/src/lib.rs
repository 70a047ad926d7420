//! Rejoin Incremental - Reference-counted join bookkeeping for rejoin.
//!
//! This crate implements the incremental core of the engine: which child
//! documents are reachable from which parent edges, and what has to be told to
//! the host subscription when that changes.
//!
//! # Core Concepts
//!
//! - `DiffSet<K>`: Net additions and removals within one diff window; an
//!   addition cancels a pending removal and vice versa
//! - `ForeignKeyRegistry`: The reference-counted bipartite index between
//!   `owner:source` composite keys and child keys, with a stable primary owner
//!   per child key
//! - `PublicationContext`: One join node's view of a shared registry, turning
//!   registry diffs into at-most-once publication calls
//! - `Publisher`: The host subscription boundary
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use rejoin_core::Document;
//! use rejoin_incremental::{ForeignKeyRegistry, PublicationContext, RecordingPublisher};
//!
//! let registry = Rc::new(RefCell::new(ForeignKeyRegistry::new()));
//! let publisher = Rc::new(RecordingPublisher::new());
//! let context = PublicationContext::new(registry.clone(), publisher.clone(), "users", 1);
//!
//! // Post p1 references user u1.
//! context.add_to_registry("p1", vec!["u1".to_string()]);
//! assert!(context.added("u1", &Document::new()));
//!
//! // A second call for the same key is a no-op.
//! assert!(!context.added("u1", &Document::new()));
//! assert_eq!(publisher.count("added"), 1);
//! ```

pub mod context;
pub mod diff_set;
pub mod publisher;
pub mod registry;

pub use context::PublicationContext;
pub use diff_set::DiffSet;
pub use publisher::{Published, Publisher, RecordingPublisher, StopCallback};
pub use registry::{ForeignKeyRegistry, OwnerDelta};
