//! Human-in-the-loop contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::event::InputType;

/// What a human gate asks for in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanPrompt {
    pub prompt: String,
    pub input_type: InputType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl HumanPrompt {
    pub fn approval(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            input_type: InputType::Approval,
            options: Vec::new(),
        }
    }

    pub fn choice<I, T>(prompt: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            prompt: prompt.into(),
            input_type: InputType::Choice,
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

/// A human's answer to an [`HumanPrompt`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

impl HumanResponse {
    /// The response as text, for choice routing
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn is_approved(&self) -> bool {
        self.approved.unwrap_or(false)
    }
}

/// Interpret a raw queued value as an approval decision.
///
/// Booleans are taken as-is; strings `approve`, `approved`, `yes`, `y` and
/// `true` (any case) approve; everything else rejects.
pub fn interpret_approval(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "approve" | "approved" | "yes" | "y" | "true"
        ),
        _ => false,
    }
}

/// Injected source of human decisions. When wired, it replaces the
/// execution's input queue.
#[async_trait]
pub trait HumanInputHandler: Send + Sync {
    async fn approval(&self, prompt: &str) -> Result<bool, WorkflowError>;

    async fn choice(&self, prompt: &str, options: &[String]) -> Result<String, WorkflowError>;
}
