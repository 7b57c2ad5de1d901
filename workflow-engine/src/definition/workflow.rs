use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use workflow_engine_sdk::{PhaseError, Result, WorkflowError};

use super::agent::{AgentDef, SingleRun};
use super::phase::PhaseDef;
use super::{PhaseWork, UntilFn, WorkflowState};

type StartFn<S, I> = Arc<dyn Fn(&I, &mut S) + Send + Sync>;

pub(crate) enum WorkflowKind<S> {
    /// One agent, looped until `until` holds
    Simple {
        agent: Arc<dyn PhaseWork<S>>,
        until: Option<UntilFn<S>>,
    },
    Phased(PhaseGraph<S>),
}

impl<S> Clone for WorkflowKind<S> {
    fn clone(&self) -> Self {
        match self {
            WorkflowKind::Simple { agent, until } => WorkflowKind::Simple {
                agent: agent.clone(),
                until: until.clone(),
            },
            WorkflowKind::Phased(graph) => WorkflowKind::Phased(graph.clone()),
        }
    }
}

/// Named phases in declaration order
pub(crate) struct PhaseGraph<S> {
    pub phases: Vec<(String, PhaseDef<S>)>,
    pub start_phase: Option<String>,
}

impl<S> Clone for PhaseGraph<S> {
    fn clone(&self) -> Self {
        Self {
            phases: self.phases.clone(),
            start_phase: self.start_phase.clone(),
        }
    }
}

impl<S: WorkflowState> PhaseGraph<S> {
    pub fn get(&self, name: &str) -> Option<&PhaseDef<S>> {
        self.phases.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// `start_phase`, else the first declared phase
    pub fn entry(&self) -> Result<&str, PhaseError> {
        match &self.start_phase {
            Some(name) => Ok(name),
            None => self
                .phases
                .first()
                .map(|(name, _)| name.as_str())
                .ok_or(PhaseError::NoPhases),
        }
    }

    /// Check the graph before anything runs: every non-terminal phase has a
    /// transition, and every statically named phase exists.
    pub fn validate(&self) -> Result<(), PhaseError> {
        if self.phases.is_empty() {
            return Err(PhaseError::NoPhases);
        }
        for (name, phase) in &self.phases {
            if !phase.terminal && phase.next.is_none() {
                return Err(PhaseError::MissingTransition { phase: name.clone() });
            }
            if let Some(next) = phase.static_next() {
                if !self.contains(next) {
                    return Err(PhaseError::UnknownPhase {
                        phase: next.to_string(),
                    });
                }
            }
        }
        let entry = self.entry()?;
        if !self.contains(entry) {
            return Err(PhaseError::UnknownPhase {
                phase: entry.to_string(),
            });
        }
        Ok(())
    }
}

/// A reusable workflow: initial state, a `start` initializer fed by the
/// execution input, and either a single looping agent or a phase machine.
pub struct WorkflowDef<S, I = Value> {
    name: String,
    initial_state: S,
    start: Option<StartFn<S, I>>,
    pub(crate) kind: WorkflowKind<S>,
}

impl<S, I> std::fmt::Debug for WorkflowDef<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDef")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<S: Clone, I> Clone for WorkflowDef<S, I> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            initial_state: self.initial_state.clone(),
            start: self.start.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl<S, I> WorkflowDef<S, I>
where
    S: WorkflowState,
    I: Serialize + Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>, initial_state: S) -> WorkflowDefBuilder<S, I> {
        WorkflowDefBuilder {
            name: name.into(),
            initial_state,
            start: None,
            agent: None,
            until: None,
            phases: Vec::new(),
            start_phase: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> &S {
        &self.initial_state
    }

    pub fn is_phased(&self) -> bool {
        matches!(self.kind, WorkflowKind::Phased(_))
    }

    /// Names of the declared phases in order; empty for simple workflows
    pub fn phase_names(&self) -> Vec<&str> {
        match &self.kind {
            WorkflowKind::Simple { .. } => Vec::new(),
            WorkflowKind::Phased(graph) => graph.phases.iter().map(|(n, _)| n.as_str()).collect(),
        }
    }

    pub(crate) fn apply_start(&self, input: &I, draft: &mut S) {
        if let Some(start) = &self.start {
            start(input, draft);
        }
    }
}

pub struct WorkflowDefBuilder<S, I = Value> {
    name: String,
    initial_state: S,
    start: Option<StartFn<S, I>>,
    agent: Option<Arc<dyn PhaseWork<S>>>,
    until: Option<UntilFn<S>>,
    phases: Vec<(String, PhaseDef<S>)>,
    start_phase: Option<String>,
}

impl<S, I> WorkflowDefBuilder<S, I>
where
    S: WorkflowState,
    I: Serialize + Send + Sync + 'static,
{
    pub fn start<F>(mut self, start: F) -> Self
    where
        F: Fn(&I, &mut S) + Send + Sync + 'static,
    {
        self.start = Some(Arc::new(start));
        self
    }

    /// Make this a simple workflow driven by one agent
    pub fn agent<O>(mut self, agent: AgentDef<S, O>) -> Self
    where
        O: DeserializeOwned + Send + Sync + 'static,
    {
        self.agent = Some(Arc::new(SingleRun { agent }));
        self
    }

    /// Loop-exit condition of a simple workflow
    pub fn until<F>(mut self, until: F) -> Self
    where
        F: Fn(&S, Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.until = Some(Arc::new(until));
        self
    }

    /// Declare a phase; the first declared phase is the default entry
    pub fn phase(mut self, name: impl Into<String>, phase: PhaseDef<S>) -> Self {
        self.phases.push((name.into(), phase));
        self
    }

    pub fn start_phase(mut self, name: impl Into<String>) -> Self {
        self.start_phase = Some(name.into());
        self
    }

    /// Structural checks only. Transition problems are reported as
    /// `PhaseError` when an execution starts.
    pub fn build(self) -> Result<WorkflowDef<S, I>> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(WorkflowError::InvalidDefinition("workflow name must not be empty".into()));
        }

        let kind = match self.agent {
            Some(agent) => {
                if !self.phases.is_empty() || self.start_phase.is_some() {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "workflow '{}' declares both an agent and phases",
                        name
                    )));
                }
                WorkflowKind::Simple {
                    agent,
                    until: self.until,
                }
            }
            None => {
                if self.until.is_some() {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "workflow '{}' sets `until` without an agent; put it on a phase",
                        name
                    )));
                }
                let mut seen = HashSet::new();
                for (phase, _) in &self.phases {
                    if !seen.insert(phase.as_str()) {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "workflow '{}' declares phase '{}' twice",
                            name, phase
                        )));
                    }
                }
                WorkflowKind::Phased(PhaseGraph {
                    phases: self.phases,
                    start_phase: self.start_phase,
                })
            }
        };

        Ok(WorkflowDef {
            name,
            initial_state: self.initial_state,
            start: self.start,
            kind,
        })
    }
}
