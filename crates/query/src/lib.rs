//! Rejoin Query - Selector compiler and query resolver.
//!
//! This crate implements the selector side of the engine:
//!
//! - `Matcher`: compiles a JSON selector into a document predicate
//! - `DocumentMatcher`: a compiled selector with an identity key, so repeated
//!   identical selectors are detected without recompilation
//! - `QueryResolver`: the current matcher of every parent source of a
//!   selector join
//! - `selector`: canonical serialization and the `$in` / `$or` builders used
//!   by batched commits
//!
//! # Example
//!
//! ```rust
//! use rejoin_query::{DocumentMatcher, QueryResolver};
//! use serde_json::json;
//!
//! let mut resolver = QueryResolver::new();
//! let first = DocumentMatcher::new(json!({"authorId": "u1"})).unwrap();
//! assert!(resolver.set("post1", first));
//!
//! // Same selector again: nothing to re-resolve.
//! let again = DocumentMatcher::new(json!({"authorId": "u1"})).unwrap();
//! assert!(!resolver.has_changed("post1", &again));
//! ```

pub mod matcher;
pub mod resolver;
pub mod selector;

pub use matcher::{EvalType, Matcher};
pub use resolver::{DocumentMatcher, QueryResolver};
pub use selector::Selector;
