//! In-process collaborators for tests, demos and single-process embedding

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex, RwLock};
use workflow_engine_sdk::{
    AgentResult, EventBus, EventStore, ProviderEvent, Recorder, RecordingEntry, RecordingId, RecordingMeta,
    RecordingSummary, SerializedEvent, SessionId, StoreError,
};

/// Event store keeping every session log in memory
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    sessions: RwLock<HashMap<SessionId, Vec<SerializedEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every session with at least one event
    pub async fn sessions(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().copied().collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, session_id: &SessionId, event: &SerializedEvent) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(*session_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn read(&self, session_id: &SessionId) -> Result<Vec<SerializedEvent>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// One event published on a [`BroadcastEventBus`]
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub session_id: SessionId,
    pub event: SerializedEvent,
}

/// Event bus over a tokio broadcast channel. Slow subscribers lag and lose
/// events; publishing with no subscribers drops the event.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, session_id: &SessionId, event: &SerializedEvent) -> Result<(), StoreError> {
        // A send error only means nobody is listening right now
        let _ = self.tx.send(BusMessage {
            session_id: *session_id,
            event: event.clone(),
        });
        Ok(())
    }
}

#[derive(Debug)]
struct PendingRecording {
    hash: String,
    meta: RecordingMeta,
    stream: Vec<ProviderEvent>,
}

#[derive(Debug, Default)]
struct Recordings {
    pending: HashMap<RecordingId, PendingRecording>,
    finalized: HashMap<String, RecordingEntry>,
}

/// Recorder keeping recordings in memory. Pending recordings are invisible
/// to `load` until finalised.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    inner: Mutex<Recordings>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a finalised recording directly, e.g. from a fixture
    pub async fn insert(&self, entry: RecordingEntry) {
        self.inner.lock().await.finalized.insert(entry.hash.clone(), entry);
    }

    /// Number of recordings started but never finalised
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

#[async_trait]
impl Recorder for InMemoryRecorder {
    async fn load(&self, hash: &str) -> Result<Option<RecordingEntry>, StoreError> {
        Ok(self.inner.lock().await.finalized.get(hash).cloned())
    }

    async fn start_recording(&self, hash: &str, meta: RecordingMeta) -> Result<RecordingId, StoreError> {
        let id = RecordingId::new();
        self.inner.lock().await.pending.insert(
            id.clone(),
            PendingRecording {
                hash: hash.to_string(),
                meta,
                stream: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn append_event(&self, id: &RecordingId, event: &ProviderEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let pending = inner
            .pending
            .get_mut(id)
            .ok_or_else(|| StoreError::new("append_event", format!("unknown recording {}", id)))?;
        pending.stream.push(event.clone());
        Ok(())
    }

    async fn finalize_recording(&self, id: &RecordingId, result: &AgentResult) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let pending = inner
            .pending
            .remove(id)
            .ok_or_else(|| StoreError::new("finalize_recording", format!("unknown recording {}", id)))?;
        inner.finalized.insert(
            pending.hash.clone(),
            RecordingEntry {
                hash: pending.hash,
                meta: pending.meta,
                stream: pending.stream,
                result: result.clone(),
            },
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RecordingSummary>, StoreError> {
        let inner = self.inner.lock().await;
        let mut summaries: Vec<_> = inner
            .finalized
            .values()
            .map(|entry| RecordingSummary {
                hash: entry.hash.clone(),
                meta: entry.meta.clone(),
                event_count: entry.stream.len(),
            })
            .collect();
        summaries.sort_by(|a, b| b.meta.recorded_at.cmp(&a.meta.recorded_at));
        Ok(summaries)
    }

    async fn delete(&self, hash: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.pending.retain(|_, pending| pending.hash != hash);
        Ok(inner.finalized.remove(hash).is_some())
    }
}
