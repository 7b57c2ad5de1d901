//! Runtime configuration
//!
//! Values come from defaults, then environment variables (`.env` is loaded by
//! the binary before this runs), then per-execution overrides in
//! [`crate::runtime::ExecuteOptions`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use workflow_engine_sdk::{Result, WorkflowError};

pub const ENV_MODE: &str = "WORKFLOW_MODE";
pub const ENV_AGENT_TIMEOUT: &str = "WORKFLOW_AGENT_TIMEOUT_SECS";
pub const ENV_INPUT_TIMEOUT: &str = "WORKFLOW_INPUT_TIMEOUT_SECS";
pub const ENV_DB_PATH: &str = "WORKFLOW_DB_PATH";

/// Whether agents call their provider or replay recordings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Live,
    Playback,
}

impl FromStr for ExecutionMode {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(ExecutionMode::Live),
            "playback" | "replay" => Ok(ExecutionMode::Playback),
            other => Err(WorkflowError::Configuration(format!(
                "unknown execution mode '{}' (expected live or playback)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Live => f.write_str("live"),
            ExecutionMode::Playback => f.write_str("playback"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub mode: ExecutionMode,
    /// Upper bound for one agent's provider stream
    pub agent_timeout: Option<Duration>,
    /// Upper bound for one human-input wait
    pub input_timeout: Option<Duration>,
    /// SQLite file used by the binary for events and recordings
    pub database_path: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup(ENV_MODE) {
            config.mode = mode.parse()?;
        }
        config.agent_timeout = parse_secs(ENV_AGENT_TIMEOUT, lookup(ENV_AGENT_TIMEOUT))?;
        config.input_timeout = parse_secs(ENV_INPUT_TIMEOUT, lookup(ENV_INPUT_TIMEOUT))?;
        config.database_path = lookup(ENV_DB_PATH)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }

    /// `~/.workflow-engine/engine.db`
    pub fn default_database_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".workflow-engine").join("engine.db"))
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = Some(timeout);
        self
    }

    pub fn with_input_timeout(mut self, timeout: Duration) -> Self {
        self.input_timeout = Some(timeout);
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}

fn parse_secs(key: &str, raw: Option<String>) -> Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let secs: f64 = raw
        .parse()
        .map_err(|_| WorkflowError::Configuration(format!("{} must be a number of seconds, got '{}'", key, raw)))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(WorkflowError::Configuration(format!(
            "{} must be positive, got '{}'",
            key, raw
        )));
    }
    Ok(Some(Duration::from_secs_f64(secs)))
}
