//! Change-feed multiplexing.

mod demultiplexer;
mod multiplexer;
mod watcher;

pub use demultiplexer::{ChangeStreamDeMultiplexer, ListenerHandle};
pub use multiplexer::{ChangeListener, ChangeStreamMultiplexer, Listener, ListenerId};
pub use watcher::{DocumentCallback, DocumentWatcher};
