//! Workflow, phase and agent definitions
//!
//! Definitions are plain values built once and shared by every execution that
//! runs them. All closures live behind `Arc`, so cloning a definition is cheap.

mod agent;
mod phase;
mod workflow;

pub use agent::{AgentDef, AgentDefBuilder};
pub use phase::{PhaseDef, Transition};
pub use workflow::{WorkflowDef, WorkflowDefBuilder};

pub(crate) use agent::{ForEachRun, SingleRun};
pub(crate) use phase::{HumanFn, ResponseFn};
pub(crate) use workflow::{PhaseGraph, WorkflowKind};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use workflow_engine_sdk::{HumanResponse, Result};

use crate::runtime::RuntimeContext;

/// Bound for the state a workflow carries.
///
/// State must serialize to JSON so every change can be expressed as patches
/// and checkpointed.
pub trait WorkflowState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Store a human response so `next` and `until` can route on it.
    /// The default keeps nothing.
    fn record_human_response(&mut self, _response: &HumanResponse) {}
}

impl WorkflowState for Value {
    fn record_human_response(&mut self, response: &HumanResponse) {
        if let Value::Object(map) = self {
            if let Ok(value) = serde_json::to_value(response) {
                map.insert("humanResponse".to_string(), value);
            }
        }
    }
}

/// Loop-exit predicate over the state and the last agent output
pub type UntilFn<S> = Arc<dyn Fn(&S, Option<&Value>) -> bool + Send + Sync>;

/// Agent work scheduled inside a phase, with its output type erased.
///
/// Implementations run the agent, fold its output into state through
/// `update_state`, and hand back the output as JSON.
#[async_trait]
pub(crate) trait PhaseWork<S>: Send + Sync {
    fn agent_name(&self) -> &str;

    async fn execute(&self, ctx: &RuntimeContext<S>, phase: Option<&str>) -> Result<Value>;
}
