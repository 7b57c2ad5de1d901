//! Recorder contract for crash-safe capture and playback of provider calls

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ids::RecordingId;
use crate::provider::{AgentResult, ProviderEvent};

/// Descriptive data stored alongside a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMeta {
    pub prompt: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A finalised recording: the provider stream and its terminal result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub hash: String,
    pub meta: RecordingMeta,
    pub stream: Vec<ProviderEvent>,
    pub result: AgentResult,
}

/// Listing row for stored recordings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub hash: String,
    pub meta: RecordingMeta,
    pub event_count: usize,
}

/// Storage for provider recordings, keyed by request content hash.
///
/// Only `load` is load-bearing (in playback mode). Everything else is a best
/// effort side channel from the engine's point of view.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Finalised recording for `hash`, if any. In-progress recordings are
    /// never returned.
    async fn load(&self, hash: &str) -> Result<Option<RecordingEntry>, StoreError>;

    async fn start_recording(&self, hash: &str, meta: RecordingMeta) -> Result<RecordingId, StoreError>;

    async fn append_event(&self, id: &RecordingId, event: &ProviderEvent) -> Result<(), StoreError>;

    /// Seal a recording. Replaces any earlier finalised recording with the
    /// same hash.
    async fn finalize_recording(&self, id: &RecordingId, result: &AgentResult) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<RecordingSummary>, StoreError>;

    /// Remove every recording for `hash`; returns whether one existed
    async fn delete(&self, hash: &str) -> Result<bool, StoreError>;
}
