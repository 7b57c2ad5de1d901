//! Event-sourced execution engine for AI-agent workflows
//!
//! Workflows are either a single looping agent or a named-phase state
//! machine. Every state change and lifecycle transition is an event in an
//! append-only, causally chained log, so an execution can be observed live,
//! persisted, resumed from a checkpoint, or replayed against recorded
//! provider calls.

// Workflow, phase and agent definitions
pub mod definition;

// Runtime orchestrator and control surface
pub mod runtime;

// Agent execution bridge (live and playback)
mod bridge;

// Phase and agent scheduling
pub(crate) mod scheduler;

pub mod config;
pub mod projection;
pub mod scripted;
pub mod storage;

pub use workflow_engine_sdk as sdk;

pub use config::{ExecutionMode, RuntimeConfig};
pub use definition::{AgentDef, AgentDefBuilder, PhaseDef, Transition, WorkflowDef, WorkflowDefBuilder, WorkflowState};
pub use projection::{fold_events, ResumePoint};
pub use runtime::{
    EventCallback, EventStream, ExecuteOptions, ExecutionControl, ExecutionHandle, StateSnapshot, StreamingExecution,
    WorkflowResult, WorkflowRuntime,
};
pub use scripted::ScriptedProvider;
pub use storage::{BroadcastEventBus, BusMessage, InMemoryEventStore, InMemoryRecorder, SqliteStore};
pub use workflow_engine_sdk::{Result, WorkflowError};
