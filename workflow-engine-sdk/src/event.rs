//! The closed workflow event vocabulary and its wire form
//!
//! [`WorkflowEvent`] is the internal tagged union. [`SerializedEvent`] is the
//! storage/wire shape `{id, name, payload, timestamp, causedBy}` that event
//! stores, buses and stream consumers see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EventId, SessionId};
use crate::patch::PatchOp;

/// Why a phase was left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseExitReason {
    Next,
    Terminal,
}

/// Kind of human input a gate asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Approval,
    Choice,
}

/// Everything observable that happens during an execution.
///
/// The set of variants is closed. Code that dispatches over events matches
/// without a wildcard arm so a new variant fails to compile until handled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all_fields = "camelCase")]
pub enum WorkflowEvent {
    WorkflowStarted {
        session_id: SessionId,
        workflow: String,
        input: Value,
        resumed: bool,
    },
    WorkflowCompleted {
        session_id: SessionId,
        final_state: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_phase: Option<String>,
    },
    PhaseEntered {
        phase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_phase: Option<String>,
    },
    PhaseExited {
        phase: String,
        reason: PhaseExitReason,
    },
    AgentStarted {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
    AgentCompleted {
        agent: String,
        output: Value,
        duration_ms: u64,
    },
    StateIntent {
        state: Value,
        patches: Vec<PatchOp>,
        inverse_patches: Vec<PatchOp>,
    },
    StateCheckpoint {
        state: Value,
        position: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
    SessionForked {
        parent_session_id: SessionId,
        state: Value,
    },
    TextDelta {
        agent: String,
        delta: String,
    },
    ThinkingDelta {
        agent: String,
        delta: String,
    },
    ToolCalled {
        agent: String,
        tool_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        agent: String,
        tool_id: String,
        output: Value,
        is_error: bool,
    },
    InputRequested {
        id: String,
        prompt: String,
        input_type: InputType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
    },
    InputReceived {
        id: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approved: Option<bool>,
    },
}

impl WorkflowEvent {
    /// The wire tag for this variant
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "WorkflowStarted",
            WorkflowEvent::WorkflowCompleted { .. } => "WorkflowCompleted",
            WorkflowEvent::PhaseEntered { .. } => "PhaseEntered",
            WorkflowEvent::PhaseExited { .. } => "PhaseExited",
            WorkflowEvent::AgentStarted { .. } => "AgentStarted",
            WorkflowEvent::AgentCompleted { .. } => "AgentCompleted",
            WorkflowEvent::StateIntent { .. } => "StateIntent",
            WorkflowEvent::StateCheckpoint { .. } => "StateCheckpoint",
            WorkflowEvent::SessionForked { .. } => "SessionForked",
            WorkflowEvent::TextDelta { .. } => "TextDelta",
            WorkflowEvent::ThinkingDelta { .. } => "ThinkingDelta",
            WorkflowEvent::ToolCalled { .. } => "ToolCalled",
            WorkflowEvent::ToolResult { .. } => "ToolResult",
            WorkflowEvent::InputRequested { .. } => "InputRequested",
            WorkflowEvent::InputReceived { .. } => "InputReceived",
        }
    }

    /// Convert to the wire form, assigning a fresh id and timestamp.
    pub fn to_serialized(&self, caused_by: Option<EventId>) -> Result<SerializedEvent, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Object(Default::default()));
        Ok(make_event(self.name(), payload, caused_by))
    }
}

/// Wire/storage form of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedEvent {
    pub id: EventId,
    pub name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<EventId>,
}

impl SerializedEvent {
    /// Recover the typed event from its wire form.
    pub fn to_event(&self) -> Result<WorkflowEvent, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "name": self.name,
            "payload": self.payload,
        }))
    }
}

/// Build a wire event with a fresh id and the current time.
pub fn make_event(name: impl Into<String>, payload: Value, caused_by: Option<EventId>) -> SerializedEvent {
    SerializedEvent {
        id: EventId::new(),
        name: name.into(),
        payload,
        timestamp: Utc::now(),
        caused_by,
    }
}
