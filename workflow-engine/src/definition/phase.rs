use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use workflow_engine_sdk::{HumanPrompt, HumanResponse, PhaseError};

use super::agent::{AgentDef, ForEachRun, SingleRun};
use super::{PhaseWork, UntilFn, WorkflowState};

pub(crate) type HumanFn<S> = Arc<dyn Fn(&S, Option<&Value>) -> Option<HumanPrompt> + Send + Sync>;
pub(crate) type ResponseFn<S> = Arc<dyn Fn(&HumanResponse, &mut S) + Send + Sync>;
type NextFn<S> = Arc<dyn Fn(&S) -> Transition + Send + Sync>;

/// Where a phase hands control after its loop finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Goto(String),
    /// Stop the machine here without reaching a terminal phase
    Exit,
}

impl Transition {
    pub fn to(phase: impl Into<String>) -> Self {
        Transition::Goto(phase.into())
    }
}

pub(crate) enum Next<S> {
    Static(String),
    Dynamic(NextFn<S>),
}

impl<S> Clone for Next<S> {
    fn clone(&self) -> Self {
        match self {
            Next::Static(name) => Next::Static(name.clone()),
            Next::Dynamic(f) => Next::Dynamic(f.clone()),
        }
    }
}

/// One node of the phase state machine
pub struct PhaseDef<S> {
    pub(crate) work: Option<Arc<dyn PhaseWork<S>>>,
    pub(crate) until: Option<UntilFn<S>>,
    pub(crate) human: Option<HumanFn<S>>,
    pub(crate) on_response: Option<ResponseFn<S>>,
    pub(crate) next: Option<Next<S>>,
    pub(crate) terminal: bool,
}

impl<S> Clone for PhaseDef<S> {
    fn clone(&self) -> Self {
        Self {
            work: self.work.clone(),
            until: self.until.clone(),
            human: self.human.clone(),
            on_response: self.on_response.clone(),
            next: self.next.clone(),
            terminal: self.terminal,
        }
    }
}

impl<S: WorkflowState> Default for PhaseDef<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: WorkflowState> PhaseDef<S> {
    pub fn new() -> Self {
        Self {
            work: None,
            until: None,
            human: None,
            on_response: None,
            next: None,
            terminal: false,
        }
    }

    /// A phase that ends the workflow as soon as it is entered
    pub fn terminal() -> Self {
        Self {
            terminal: true,
            ..Self::new()
        }
    }

    /// Run `agent` once per loop iteration
    pub fn run<O>(mut self, agent: AgentDef<S, O>) -> Self
    where
        O: DeserializeOwned + Send + Sync + 'static,
    {
        self.work = Some(Arc::new(SingleRun { agent }));
        self
    }

    /// Run `agent` once per context returned by `contexts`, with at most
    /// `parallel` runs in flight. The loop's last output is the array of
    /// outputs in context order.
    pub fn for_each<O, C, F>(mut self, agent: AgentDef<S, O, C>, contexts: F, parallel: usize) -> Self
    where
        O: DeserializeOwned + Send + Sync + 'static,
        C: Send + Sync + 'static,
        F: Fn(&S) -> Vec<C> + Send + Sync + 'static,
    {
        self.work = Some(Arc::new(ForEachRun {
            agent,
            contexts: Arc::new(contexts),
            parallel: parallel.max(1),
        }));
        self
    }

    /// Stop looping once `until` returns true. Without it the body runs once.
    pub fn until<F>(mut self, until: F) -> Self
    where
        F: Fn(&S, Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.until = Some(Arc::new(until));
        self
    }

    /// Ask a human the same question every iteration.
    ///
    /// The answer reaches state through
    /// [`WorkflowState::record_human_response`], which keeps nothing by
    /// default. `Value` state stores it under `humanResponse`; typed state
    /// must override that method or route the answer with
    /// [`on_response`](Self::on_response).
    pub fn human(self, prompt: HumanPrompt) -> Self {
        self.human_with(move |_, _| Some(prompt.clone()))
    }

    /// Decide per iteration whether and what to ask; `None` skips the round.
    /// Answers are stored as described on [`human`](Self::human).
    pub fn human_with<F>(mut self, prompt: F) -> Self
    where
        F: Fn(&S, Option<&Value>) -> Option<HumanPrompt> + Send + Sync + 'static,
    {
        self.human = Some(Arc::new(prompt));
        self
    }

    /// Fold each human answer into state, after
    /// [`WorkflowState::record_human_response`]
    pub fn on_response<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HumanResponse, &mut S) + Send + Sync + 'static,
    {
        self.on_response = Some(Arc::new(handler));
        self
    }

    pub fn next(mut self, phase: impl Into<String>) -> Self {
        self.next = Some(Next::Static(phase.into()));
        self
    }

    pub fn next_with<F>(mut self, next: F) -> Self
    where
        F: Fn(&S) -> Transition + Send + Sync + 'static,
    {
        self.next = Some(Next::Dynamic(Arc::new(next)));
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub(crate) fn static_next(&self) -> Option<&str> {
        match &self.next {
            Some(Next::Static(name)) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn resolve_next(&self, name: &str, state: &S) -> Result<Transition, PhaseError> {
        match &self.next {
            Some(Next::Static(next)) => Ok(Transition::Goto(next.clone())),
            Some(Next::Dynamic(f)) => Ok(f(state)),
            None => Err(PhaseError::MissingTransition {
                phase: name.to_string(),
            }),
        }
    }
}
