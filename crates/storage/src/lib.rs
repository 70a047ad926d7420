//! Rejoin Storage - Storage boundary for the rejoin reactive-join engine.
//!
//! This crate provides the storage side of the engine:
//!
//! - `Storage` / `ChangeFeed`: the query and change-feed boundary the engine
//!   consumes
//! - `RawChangeEvent`: raw change-feed events in their wire shape
//! - `MemoryStore`: an in-memory document store with queued change feeds
//!
//! # Example
//!
//! ```rust
//! use rejoin_core::Projection;
//! use rejoin_storage::{MemoryStore, OperationType, Storage, WatchOptions};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! let mut feed = store.watch("posts", WatchOptions::update_lookup()).unwrap();
//!
//! store.insert_value("posts", json!({"_id": "p1", "title": "hello"})).unwrap();
//!
//! let event = feed.next_event().unwrap().unwrap();
//! assert_eq!(event.operation_type, OperationType::Insert);
//! assert_eq!(store.find("posts", &json!({}), &Projection::All).unwrap().len(), 1);
//! ```

pub mod event;
pub mod memory;
pub mod traits;

pub use event::{DocumentKey, OperationType, RawChangeEvent, UpdateDescription};
pub use memory::{MemoryFeed, MemoryStore, StoreStats, UpdateSpec};
pub use traits::{ChangeFeed, FullDocument, Storage, WatchOptions};
