//! Rejoin Reactive - incremental reactive joins over change streams.
//!
//! A join tree publishes a root result set together with every document
//! reachable from it through declared foreign-key links, and keeps that
//! published view current as the underlying collections change.
//!
//! # Core Concepts
//!
//! - `Engine`: owns the change-stream registry and builds join trees
//! - `Link`: one node of a join tree (root, static join or selector join)
//! - `ChangeStreamDeMultiplexer`: one shared change feed per collection
//! - `DocumentWatcher`: follows a single document of a collection
//!
//! # Example
//!
//! ```ignore
//! use rejoin_reactive::{field_ids, Engine, LinkOptions};
//! use rejoin_incremental::RecordingPublisher;
//!
//! let engine = Engine::new(store.clone(), EngineConfig::default())?;
//! let publisher = Rc::new(RecordingPublisher::new());
//!
//! let posts = engine.root(publisher.clone(), "posts", json!({}), LinkOptions::new())?;
//! posts.link("users", field_ids("authorId"), LinkOptions::new())?;
//! posts.observe()?;
//!
//! // Deliver pending change events; publications happen synchronously.
//! engine.pump_until_idle()?;
//! ```

pub mod change;
mod child;
pub mod engine;
pub mod link;
pub mod options;
pub mod resolve;
pub mod stream;

pub use change::ChangeEvent;
pub use engine::Engine;
pub use link::{Link, LinkState};
pub use options::LinkOptions;
pub use resolve::{field_equals, field_ids, SelectorResolver, StaticResolver};
pub use stream::{
    ChangeListener, ChangeStreamDeMultiplexer, ChangeStreamMultiplexer, DocumentCallback, DocumentWatcher,
    Listener, ListenerHandle, ListenerId,
};

// Re-export commonly used types from dependencies
pub use rejoin_core::{EngineConfig, Error, Result};
pub use rejoin_incremental::{Publisher, RecordingPublisher};
