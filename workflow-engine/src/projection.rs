//! State projection from the event log
//!
//! The projection worker keeps an execution's state cell in step with its
//! event stream. [`fold_events`] and [`ResumePoint`] derive state from a
//! persisted log, for resuming, forking and audit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use workflow_engine_sdk::{apply_patches, Result, SerializedEvent, WorkflowError, WorkflowEvent};

use crate::runtime::hub::HubReceiver;
use crate::runtime::state_cell::StateCell;

/// Re-derive state by folding a log onto `initial`.
///
/// `StateIntent` applies its forward patches and `StateCheckpoint` replaces
/// the state with its snapshot. Other events leave state untouched.
pub fn fold_events(initial: Value, events: &[SerializedEvent]) -> Result<Value> {
    let mut state = initial;
    for wire in events {
        match wire.name.as_str() {
            "StateIntent" | "StateCheckpoint" => {}
            _ => continue,
        }
        match wire.to_event()? {
            WorkflowEvent::StateIntent { patches, .. } => {
                state = apply_patches(&state, &patches)?;
            }
            WorkflowEvent::StateCheckpoint { state: snapshot, .. } => {
                state = snapshot;
            }
            _ => {}
        }
    }
    Ok(state)
}

/// Where and with what state an execution can pick up again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePoint {
    pub state: Value,
    pub phase: Option<String>,
    /// Log position of the checkpoint this point was taken from
    pub position: u64,
}

impl ResumePoint {
    /// The most recent checkpoint in `events`
    pub fn latest(events: &[SerializedEvent]) -> Result<Option<Self>> {
        for wire in events.iter().rev() {
            if wire.name != "StateCheckpoint" {
                continue;
            }
            if let WorkflowEvent::StateCheckpoint {
                state,
                position,
                phase,
            } = wire.to_event()?
            {
                return Ok(Some(Self {
                    state,
                    phase,
                    position,
                }));
            }
        }
        Ok(None)
    }

    pub fn state_as<S: DeserializeOwned>(&self) -> Result<S> {
        serde_json::from_value(self.state.clone())
            .map_err(|e| WorkflowError::State(format!("resume state does not match the workflow state: {}", e)))
    }

    /// State after replaying every event that follows this checkpoint
    pub fn replay(&self, events: &[SerializedEvent]) -> Result<Value> {
        let start = usize::try_from(self.position)
            .map_err(|_| WorkflowError::State("checkpoint position out of range".into()))?
            .saturating_add(1);
        let tail = events.get(start..).unwrap_or(&[]);
        fold_events(self.state.clone(), tail)
    }
}

/// Projection worker: republish the state carried by every state event into
/// the cell, tagged with the event's log position
pub(crate) async fn project_into<S>(mut rx: HubReceiver, cell: StateCell<S>)
where
    S: Clone + DeserializeOwned,
{
    while let Some(message) = rx.recv().await {
        let state = match message.event.as_ref() {
            WorkflowEvent::StateIntent { state, .. } => state,
            WorkflowEvent::StateCheckpoint { state, .. } => state,
            _ => continue,
        };
        match S::deserialize(state) {
            Ok(state) => {
                cell.publish(message.position, state);
            }
            Err(e) => warn!(position = message.position, error = %e, "Projection could not decode state"),
        }
    }
}
