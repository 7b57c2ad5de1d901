//! Shared vocabulary for workflow-engine
//!
//! This crate holds the pieces every side of an execution agrees on: the
//! closed event set and its wire form, the JSON patch algebra used for state
//! intents, the error taxonomy, and the contracts for the injected
//! collaborators (providers, recorders, event stores, buses, human input
//! handlers, observers). It has no runtime of its own.

pub mod error;
pub mod event;
pub mod human;
pub mod ids;
pub mod observer;
pub mod patch;
pub mod provider;
pub mod recording;
pub mod store;

pub use error::{
    AgentError, AgentFailurePhase, PhaseError, ProviderError, ProviderErrorCode, Result, StoreError,
    WorkflowError, ABORTED_BY_USER,
};
pub use event::{make_event, InputType, PhaseExitReason, SerializedEvent, WorkflowEvent};
pub use human::{interpret_approval, HumanInputHandler, HumanPrompt, HumanResponse};
pub use ids::{EventId, RecordingId, SessionId};
pub use observer::{dispatch, ObserverHook, WorkflowObserver};
pub use patch::{apply_patches, diff, PatchError, PatchOp, PatchPath, PathSegment};
pub use provider::{
    request_hash, AgentResult, Provider, ProviderEvent, ProviderRequest, ProviderStream, TokenUsage,
};
pub use recording::{Recorder, RecordingEntry, RecordingMeta, RecordingSummary};
pub use store::{EventBus, EventStore};

// Re-export async trait for convenience
pub use async_trait::async_trait;
