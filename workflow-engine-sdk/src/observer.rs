//! Structured observer API and the event dispatch that feeds it

use serde_json::Value;

use crate::error::WorkflowError;
use crate::event::{SerializedEvent, WorkflowEvent};
use crate::ids::SessionId;
use crate::patch::PatchOp;

/// Callbacks for following an execution. Every method defaults to a no-op.
pub trait WorkflowObserver: Send + Sync {
    fn on_started(&self, _session_id: &SessionId, _workflow: &str) {}

    fn on_phase_changed(&self, _phase: &str, _from_phase: Option<&str>) {}

    fn on_agent_started(&self, _agent: &str, _phase: Option<&str>) {}

    fn on_agent_completed(&self, _agent: &str, _output: &Value, _duration_ms: u64) {}

    fn on_state_changed(&self, _state: &Value, _patches: &[PatchOp]) {}

    fn on_text_delta(&self, _agent: &str, _delta: &str) {}

    fn on_thinking_delta(&self, _agent: &str, _delta: &str) {}

    fn on_tool_called(&self, _agent: &str, _tool_name: &str, _input: &Value) {}

    fn on_tool_result(&self, _agent: &str, _tool_id: &str, _output: &Value, _is_error: bool) {}

    fn on_completed(&self, _final_state: &Value, _exit_phase: Option<&str>) {}

    /// Called at most once when an execution fails or is aborted. Failures
    /// are reported after every earlier event was dispatched; an abort is
    /// reported as soon as it is requested.
    fn on_error(&self, _error: &WorkflowError) {}

    /// Catch-all: receives every serialized event
    fn on_event(&self, _event: &SerializedEvent) {}
}

/// Which structured hook handled an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverHook {
    Started,
    PhaseChanged,
    AgentStarted,
    AgentCompleted,
    StateChanged,
    TextDelta,
    ThinkingDelta,
    ToolCalled,
    ToolResult,
    Completed,
    /// The variant has no structured hook; only `on_event` saw it
    NoOp,
}

/// Route one event to the observer.
///
/// The match is total over [`WorkflowEvent`] with no wildcard arm: adding a
/// variant does not compile until it is routed here.
pub fn dispatch(observer: &dyn WorkflowObserver, event: &WorkflowEvent, serialized: &SerializedEvent) -> ObserverHook {
    observer.on_event(serialized);

    match event {
        WorkflowEvent::WorkflowStarted {
            session_id,
            workflow,
            ..
        } => {
            observer.on_started(session_id, workflow);
            ObserverHook::Started
        }
        WorkflowEvent::WorkflowCompleted {
            final_state,
            exit_phase,
            ..
        } => {
            observer.on_completed(final_state, exit_phase.as_deref());
            ObserverHook::Completed
        }
        WorkflowEvent::PhaseEntered { phase, from_phase } => {
            observer.on_phase_changed(phase, from_phase.as_deref());
            ObserverHook::PhaseChanged
        }
        WorkflowEvent::PhaseExited { .. } => ObserverHook::NoOp,
        WorkflowEvent::AgentStarted { agent, phase } => {
            observer.on_agent_started(agent, phase.as_deref());
            ObserverHook::AgentStarted
        }
        WorkflowEvent::AgentCompleted {
            agent,
            output,
            duration_ms,
        } => {
            observer.on_agent_completed(agent, output, *duration_ms);
            ObserverHook::AgentCompleted
        }
        WorkflowEvent::StateIntent { state, patches, .. } => {
            observer.on_state_changed(state, patches);
            ObserverHook::StateChanged
        }
        WorkflowEvent::StateCheckpoint { .. } => ObserverHook::NoOp,
        WorkflowEvent::SessionForked { .. } => ObserverHook::NoOp,
        WorkflowEvent::TextDelta { agent, delta } => {
            observer.on_text_delta(agent, delta);
            ObserverHook::TextDelta
        }
        WorkflowEvent::ThinkingDelta { agent, delta } => {
            observer.on_thinking_delta(agent, delta);
            ObserverHook::ThinkingDelta
        }
        WorkflowEvent::ToolCalled {
            agent,
            tool_name,
            input,
            ..
        } => {
            observer.on_tool_called(agent, tool_name, input);
            ObserverHook::ToolCalled
        }
        WorkflowEvent::ToolResult {
            agent,
            tool_id,
            output,
            is_error,
        } => {
            observer.on_tool_result(agent, tool_id, output, *is_error);
            ObserverHook::ToolResult
        }
        WorkflowEvent::InputRequested { .. } => ObserverHook::NoOp,
        WorkflowEvent::InputReceived { .. } => ObserverHook::NoOp,
    }
}
