//! Event persistence and broadcast contracts

use async_trait::async_trait;

use crate::error::StoreError;
use crate::event::SerializedEvent;
use crate::ids::SessionId;

/// Durable, ordered, per-session event log
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, session_id: &SessionId, event: &SerializedEvent) -> Result<(), StoreError>;

    /// Full log of a session in append order
    async fn read(&self, session_id: &SessionId) -> Result<Vec<SerializedEvent>, StoreError>;
}

/// Fan-out to live subscribers. At-most-once delivery is acceptable.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, session_id: &SessionId, event: &SerializedEvent) -> Result<(), StoreError>;
}
