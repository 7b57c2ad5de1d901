//! Error taxonomy for workflow executions
//!
//! Every variant carries structured fields so observers and callers can act on
//! them (retry on `ProviderError { retryable: true }`, show the missing
//! recording hash, ...) without parsing messages.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for workflow operations
pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

/// Where inside an agent run a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentFailurePhase {
    Execution,
    Output,
}

impl std::fmt::Display for AgentFailurePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentFailurePhase::Execution => f.write_str("execution"),
            AgentFailurePhase::Output => f.write_str("output"),
        }
    }
}

/// Agent logic or output failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("agent '{agent}' failed during {phase}: {cause}")]
pub struct AgentError {
    pub agent: String,
    pub phase: AgentFailurePhase,
    pub cause: String,
}

impl AgentError {
    pub fn execution(agent: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            phase: AgentFailurePhase::Execution,
            cause: cause.into(),
        }
    }

    pub fn output(agent: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            phase: AgentFailurePhase::Output,
            cause: cause.into(),
        }
    }
}

/// Provider failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    RateLimited,
    AuthFailed,
    ContextExceeded,
    Unknown,
}

/// Failure reported by a provider. The engine never retries; it surfaces the
/// code and the retry hint to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider error {code:?}: {message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        let retryable = matches!(code, ProviderErrorCode::RateLimited);
        Self {
            code,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ProviderErrorCode::RateLimited, message)
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unknown, message)
    }
}

/// Malformed phase graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("phase '{phase}' has neither `next` nor `terminal`")]
    MissingTransition { phase: String },
    #[error("unknown phase '{phase}'")]
    UnknownPhase { phase: String },
    #[error("workflow declares no phases")]
    NoPhases,
}

/// Persistence failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store operation '{operation}' failed: {message}")]
pub struct StoreError {
    pub operation: String,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Top-level error for everything an execution can fail with
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no recording for hash {hash} (prompt: {prompt_prefix:?})")]
    RecordingNotFound { hash: String, prompt_prefix: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("execution aborted: {reason}")]
    Aborted { reason: String },

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("state error: {0}")]
    State(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Reason used when an execution is aborted through its control surface
pub const ABORTED_BY_USER: &str = "Aborted by user";

impl WorkflowError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        WorkflowError::Aborted {
            reason: reason.into(),
        }
    }

    pub fn recording_not_found(hash: impl Into<String>, prompt: &str) -> Self {
        WorkflowError::RecordingNotFound {
            hash: hash.into(),
            prompt_prefix: prompt.chars().take(100).collect(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, WorkflowError::Aborted { .. })
    }

    /// True when a caller may retry the whole execution
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::Provider(e) => e.retryable,
            WorkflowError::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::State(e.to_string())
    }
}

impl From<crate::patch::PatchError> for WorkflowError {
    fn from(e: crate::patch::PatchError) -> Self {
        WorkflowError::State(e.to_string())
    }
}
