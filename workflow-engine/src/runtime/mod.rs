//! Runtime orchestrator
//!
//! [`WorkflowRuntime`] owns the injected collaborators and starts executions.
//! Each execution runs as one task. Every emission is appended to the event
//! store and published to the bus before the emitter continues. A scoped set
//! of subscriber tasks (projection, observer, callback) is drained before the
//! result settles and aborted if the task is torn down.

mod context;
mod control;
mod handle;
pub(crate) mod hub;
pub(crate) mod state_cell;
mod subscribers;

pub(crate) use context::RuntimeContext;
pub use control::ExecutionControl;
pub use handle::{EventStream, ExecutionHandle, StreamingExecution};
pub use state_cell::StateSnapshot;
pub use subscribers::EventCallback;

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use workflow_engine_sdk::{
    EventBus, EventStore, HumanInputHandler, Recorder, Result, SerializedEvent, SessionId, WorkflowError,
    WorkflowEvent, WorkflowObserver,
};

use crate::config::{ExecutionMode, RuntimeConfig};
use crate::definition::{WorkflowDef, WorkflowKind, WorkflowState};
use crate::projection::{self, ResumePoint};
use crate::scheduler;
use context::ContextParts;
use hub::SubscriberScope;
use subscribers::EmissionSinks;

/// Outcome of a successful execution
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowResult<S> {
    pub state: S,
    pub session_id: SessionId,
    /// Every event of this execution in log order
    pub events: Vec<SerializedEvent>,
    pub completed: bool,
    /// Phase that ended the machine through `Transition::Exit`; `None` when a
    /// terminal phase (or a simple workflow) finished normally
    pub exit_phase: Option<String>,
}

/// Per-execution options
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    session_id: Option<SessionId>,
    mode: Option<ExecutionMode>,
    resume: Option<ResumePoint>,
    fork_parent: Option<SessionId>,
    observer: Option<Arc<dyn WorkflowObserver>>,
    on_event: Option<EventCallback>,
    human_input: Option<Arc<dyn HumanInputHandler>>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a known session id instead of a fresh one
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Override the configured execution mode
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Skip `start` and enter the machine at the checkpoint's phase with the
    /// checkpoint's state
    pub fn resume_from(mut self, point: ResumePoint) -> Self {
        self.resume = Some(point);
        self
    }

    /// Resume from `point` in a new session and record the lineage with a
    /// `SessionForked` event
    pub fn fork_from(mut self, parent: SessionId, point: ResumePoint) -> Self {
        self.fork_parent = Some(parent);
        self.resume = Some(point);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Real-time callback invoked with every serialized event
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SerializedEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    /// Answer human gates through `handler` instead of the input queue
    pub fn human_input(mut self, handler: Arc<dyn HumanInputHandler>) -> Self {
        self.human_input = Some(handler);
        self
    }
}

struct StartPlan {
    resumed: bool,
    resume_phase: Option<String>,
    fork_parent: Option<SessionId>,
}

/// Starts executions against a fixed set of collaborators
#[derive(Clone, Default)]
pub struct WorkflowRuntime {
    config: RuntimeConfig,
    store: Option<Arc<dyn EventStore>>,
    bus: Option<Arc<dyn EventBus>>,
    recorder: Option<Arc<dyn Recorder>>,
}

impl WorkflowRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Start an execution; await the handle for its result
    pub fn execute<S, I>(
        &self,
        workflow: &WorkflowDef<S, I>,
        input: I,
        options: ExecuteOptions,
    ) -> Result<ExecutionHandle<S>>
    where
        S: WorkflowState,
        I: Serialize + Send + Sync + 'static,
    {
        self.launch(workflow, input, options, false).map(|(handle, _)| handle)
    }

    /// Start an execution with a live event stream
    pub fn stream<S, I>(
        &self,
        workflow: &WorkflowDef<S, I>,
        input: I,
        options: ExecuteOptions,
    ) -> Result<StreamingExecution<S>>
    where
        S: WorkflowState,
        I: Serialize + Send + Sync + 'static,
    {
        let (result, events) = self.launch(workflow, input, options, true)?;
        let events = events.ok_or_else(|| WorkflowError::Internal("event stream was not attached".into()))?;
        Ok(StreamingExecution {
            control: result.control().clone(),
            events,
            result,
        })
    }

    /// Run an execution to completion
    pub async fn run<S, I>(&self, workflow: &WorkflowDef<S, I>, input: I, options: ExecuteOptions) -> Result<WorkflowResult<S>>
    where
        S: WorkflowState,
        I: Serialize + Send + Sync + 'static,
    {
        self.execute(workflow, input, options)?.await
    }

    /// Persisted log of a session; requires an event store
    pub async fn session_events(&self, session_id: &SessionId) -> Result<Vec<SerializedEvent>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| WorkflowError::Configuration("no event store configured".into()))?;
        Ok(store.read(session_id).await?)
    }

    /// Latest checkpoint of a persisted session
    pub async fn resume_point(&self, session_id: &SessionId) -> Result<Option<ResumePoint>> {
        let events = self.session_events(session_id).await?;
        ResumePoint::latest(&events)
    }

    fn launch<S, I>(
        &self,
        workflow: &WorkflowDef<S, I>,
        input: I,
        options: ExecuteOptions,
        with_stream: bool,
    ) -> Result<(ExecutionHandle<S>, Option<EventStream>)>
    where
        S: WorkflowState,
        I: Serialize + Send + Sync + 'static,
    {
        let mode = options.mode.unwrap_or(self.config.mode);
        if mode == ExecutionMode::Playback && self.recorder.is_none() {
            return Err(WorkflowError::Configuration(
                "playback mode requires a recorder".into(),
            ));
        }

        let session_id = options.session_id.unwrap_or_default();
        let (initial_state, resume_phase) = match &options.resume {
            Some(point) => (point.state_as::<S>()?, point.phase.clone()),
            None => (workflow.initial_state().clone(), None),
        };

        let (control, ends) = ExecutionControl::new(
            session_id,
            options.human_input.is_some(),
            options.observer.clone(),
        );
        let mut scope = SubscriberScope::new();
        let ctx = Arc::new(RuntimeContext::new(ContextParts {
            session_id,
            mode,
            agent_timeout: self.config.agent_timeout,
            input_timeout: self.config.input_timeout,
            recorder: self.recorder.clone(),
            human_handler: options.human_input.clone(),
            initial_state,
            initial_phase: resume_phase.clone(),
            hub: scope.hub(),
            sinks: EmissionSinks {
                store: self.store.clone(),
                bus: self.bus.clone(),
            },
            control: control.clone(),
            ends,
        }));

        let cell = ctx.state_cell().clone();
        scope.spawn("projection", move |rx| projection::project_into(rx, cell));
        if let Some(observer) = options.observer.clone() {
            scope.spawn("observer", move |rx| subscribers::observe(rx, observer));
        }
        if let Some(callback) = options.on_event.clone() {
            scope.spawn("on_event", move |rx| subscribers::forward(rx, callback));
        }
        let events = with_stream.then(|| EventStream::new(scope.hub().subscribe(), control.clone()));

        let plan = StartPlan {
            resumed: options.resume.is_some(),
            resume_phase,
            fork_parent: options.fork_parent,
        };
        let state_rx = ctx.watch_state();
        let span = tracing::info_span!(
            "workflow",
            session_id = %session_id,
            workflow = %workflow.name(),
            mode = %mode
        );
        let task = tokio::spawn(run_execution(ctx, scope, workflow.clone(), input, plan).instrument(span));

        Ok((ExecutionHandle::new(control, state_rx, task), events))
    }
}

async fn run_execution<S, I>(
    ctx: Arc<RuntimeContext<S>>,
    scope: SubscriberScope,
    workflow: WorkflowDef<S, I>,
    input: I,
    plan: StartPlan,
) -> Result<WorkflowResult<S>>
where
    S: WorkflowState,
    I: Serialize + Send + Sync + 'static,
{
    info!(resumed = plan.resumed, phased = workflow.is_phased(), "Workflow started");

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel_token().cancelled() => Err(ctx.control().abort_error()),
        outcome = drive(&ctx, &workflow, &input, &plan) => outcome,
    };

    // Every emitted event reaches every subscriber before the result settles
    scope.drain().await;

    match outcome {
        Ok(exit_phase) => {
            ctx.control().mark_finished();
            info!(exit_phase = ?exit_phase, events = ctx.events().len(), "Workflow completed");
            Ok(WorkflowResult {
                state: ctx.state(),
                session_id: ctx.session_id(),
                events: ctx.events(),
                completed: true,
                exit_phase,
            })
        }
        Err(err) => {
            if err.is_aborted() {
                warn!(error = %err, "Workflow aborted");
            } else {
                error!(error = %err, "Workflow failed");
            }
            ctx.control().report_error(&err);
            Err(err)
        }
    }
}

async fn drive<S, I>(
    ctx: &RuntimeContext<S>,
    workflow: &WorkflowDef<S, I>,
    input: &I,
    plan: &StartPlan,
) -> Result<Option<String>>
where
    S: WorkflowState,
    I: Serialize + Send + Sync + 'static,
{
    let session_id = ctx.session_id();
    ctx.emit(WorkflowEvent::WorkflowStarted {
        session_id,
        workflow: workflow.name().to_string(),
        input: serde_json::to_value(input)?,
        resumed: plan.resumed,
    })
    .await?;

    if !plan.resumed {
        ctx.update_state(|draft| workflow.apply_start(input, draft)).await?;
    }

    if let Some(parent) = plan.fork_parent {
        ctx.emit(WorkflowEvent::SessionForked {
            parent_session_id: parent,
            state: ctx.state_json()?,
        })
        .await?;
    }

    let exit_phase = match &workflow.kind {
        WorkflowKind::Simple { agent, until } => {
            scheduler::run_simple(ctx, agent.as_ref(), until.as_ref()).await?;
            None
        }
        WorkflowKind::Phased(graph) => scheduler::run_phases(ctx, graph, plan.resume_phase.as_deref()).await?,
    };

    ctx.emit(WorkflowEvent::WorkflowCompleted {
        session_id,
        final_state: ctx.state_json()?,
        exit_phase: exit_phase.clone(),
    })
    .await?;
    Ok(exit_phase)
}
