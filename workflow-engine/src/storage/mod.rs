//! Event store, event bus and recorder implementations

mod memory;
mod sqlite;

pub use memory::{BroadcastEventBus, BusMessage, InMemoryEventStore, InMemoryRecorder};
pub use sqlite::SqliteStore;
