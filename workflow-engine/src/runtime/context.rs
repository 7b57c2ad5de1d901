//! Per-execution runtime context
//!
//! Owns the event log mirror, the state cell and the execution-side ends of
//! the control channels. All emission takes one turn at a time, so log
//! position order equals emission order and `caused_by` always points at the
//! previous event. A turn ends only after the event reached the store and the
//! bus.

use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};
use workflow_engine_sdk::{
    diff, EventId, HumanInputHandler, Recorder, Result, SerializedEvent, SessionId, WorkflowError,
    WorkflowEvent,
};

use super::control::{ControlEnds, ExecutionControl};
use super::hub::{EventHub, HubMessage};
use super::state_cell::{StateCell, StateSnapshot};
use super::subscribers::EmissionSinks;
use crate::config::ExecutionMode;

#[derive(Default)]
struct EventLog {
    events: Vec<Arc<SerializedEvent>>,
    last_id: Option<EventId>,
}

pub(crate) struct ContextParts<S> {
    pub session_id: SessionId,
    pub mode: ExecutionMode,
    pub agent_timeout: Option<Duration>,
    pub input_timeout: Option<Duration>,
    pub recorder: Option<Arc<dyn Recorder>>,
    pub human_handler: Option<Arc<dyn HumanInputHandler>>,
    pub initial_state: S,
    pub initial_phase: Option<String>,
    pub hub: Arc<EventHub>,
    pub sinks: EmissionSinks,
    pub control: ExecutionControl,
    pub ends: ControlEnds,
}

pub struct RuntimeContext<S> {
    session_id: SessionId,
    mode: ExecutionMode,
    agent_timeout: Option<Duration>,
    input_timeout: Option<Duration>,
    recorder: Option<Arc<dyn Recorder>>,
    human_handler: Option<Arc<dyn HumanInputHandler>>,
    state: StateCell<S>,
    log: Mutex<EventLog>,
    hub: Arc<EventHub>,
    sinks: EmissionSinks,
    current_phase: Mutex<Option<String>>,
    control: ExecutionControl,
    cancel: CancellationToken,
    input_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    paused: watch::Receiver<bool>,
}

impl<S> RuntimeContext<S>
where
    S: Clone + serde::Serialize + Send + Sync,
{
    pub(crate) fn new(parts: ContextParts<S>) -> Self {
        let cancel = parts.control.cancel_token();
        Self {
            session_id: parts.session_id,
            mode: parts.mode,
            agent_timeout: parts.agent_timeout,
            input_timeout: parts.input_timeout,
            recorder: parts.recorder,
            human_handler: parts.human_handler,
            state: StateCell::new(parts.initial_state),
            log: Mutex::new(EventLog::default()),
            hub: parts.hub,
            sinks: parts.sinks,
            current_phase: Mutex::new(parts.initial_phase),
            control: parts.control,
            cancel,
            input_rx: tokio::sync::Mutex::new(parts.ends.input_rx),
            paused: parts.ends.paused,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub(crate) fn recorder(&self) -> Option<&Arc<dyn Recorder>> {
        self.recorder.as_ref()
    }

    pub(crate) fn human_handler(&self) -> Option<&Arc<dyn HumanInputHandler>> {
        self.human_handler.as_ref()
    }

    pub(crate) fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout
    }

    pub(crate) fn input_timeout(&self) -> Option<Duration> {
        self.input_timeout
    }

    pub(crate) fn control(&self) -> &ExecutionControl {
        &self.control
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Snapshot of the current state
    pub fn state(&self) -> S {
        self.state.get()
    }

    pub fn state_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.state.get())?)
    }

    pub(crate) fn state_cell(&self) -> &StateCell<S> {
        &self.state
    }

    pub fn watch_state(&self) -> watch::Receiver<StateSnapshot<S>> {
        self.state.subscribe()
    }

    /// Events emitted so far, in log order
    pub fn events(&self) -> Vec<SerializedEvent> {
        match self.log.lock() {
            Ok(log) => log.events.iter().map(|e| (**e).clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn current_phase(&self) -> Option<String> {
        self.current_phase.lock().ok().and_then(|p| p.clone())
    }

    pub(crate) fn set_current_phase(&self, phase: &str) {
        if let Ok(mut current) = self.current_phase.lock() {
            *current = Some(phase.to_string());
        }
    }

    /// Fail with the abort error once the execution was cancelled
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(self.control.abort_error())
        } else {
            Ok(())
        }
    }

    /// Append an event to the log, persist and broadcast it, then fan it
    /// out to subscribers
    pub async fn emit(&self, event: WorkflowEvent) -> Result<Arc<SerializedEvent>> {
        let turn = self.control.emission_turn().await;
        let (position, wire) = self.append(move |_| event)?;
        self.deliver(turn, position, wire.clone()).await?;
        Ok(wire)
    }

    /// Emit a `StateCheckpoint` of the current state. `phase` is where a
    /// resumed execution should enter.
    pub async fn checkpoint(&self, phase: Option<&str>) -> Result<u64> {
        let turn = self.control.emission_turn().await;
        let state = serde_json::to_value(self.state.get())?;
        let phase = phase.map(str::to_string);
        let (position, wire) = self.append(move |position| WorkflowEvent::StateCheckpoint {
            state,
            position,
            phase,
        })?;
        self.deliver(turn, position, wire).await?;
        Ok(position)
    }

    /// Apply `mutate` to a draft of the current state, emit the resulting
    /// `StateIntent` with forward and inverse patches, then publish the new
    /// state to the cell before returning.
    pub async fn update_state<F>(&self, mutate: F) -> Result<S>
    where
        F: FnOnce(&mut S) + Send,
    {
        let turn = self.control.emission_turn().await;
        self.ensure_active()?;
        let before = self.state.get();
        let mut draft = before.clone();
        mutate(&mut draft);

        let before_json = serde_json::to_value(&before)?;
        let after_json = serde_json::to_value(&draft)?;
        let (patches, inverse_patches) = diff(&before_json, &after_json);

        let (position, wire) = self.append(move |_| WorkflowEvent::StateIntent {
            state: after_json,
            patches,
            inverse_patches,
        })?;
        self.state.publish(position, draft.clone());
        self.deliver(turn, position, wire).await?;
        Ok(draft)
    }

    /// Block while paused, checkpointing once on the way in
    pub async fn wait_if_paused(&self, phase: Option<&str>) -> Result<()> {
        let mut paused = self.paused.clone();
        if !*paused.borrow_and_update() {
            return Ok(());
        }

        info!(session_id = %self.session_id, phase, "Execution paused");
        self.checkpoint(phase).await?;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.control.abort_error()),
                changed = paused.changed() => {
                    if changed.is_err() || !*paused.borrow_and_update() {
                        break;
                    }
                }
            }
        }

        info!(session_id = %self.session_id, phase, "Execution resumed");
        Ok(())
    }

    /// Take the next value from the input queue
    pub(crate) async fn next_input(&self) -> Result<Value> {
        let timeout = self.input_timeout;
        self.guard("human input", timeout, async {
            let mut rx = self.input_rx.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| WorkflowError::Internal("input queue closed".into()))
        })
        .await
    }

    /// Run `work` until it finishes, the execution is cancelled, or
    /// `timeout` elapses
    pub(crate) async fn guard<T, F>(&self, operation: &str, timeout: Option<Duration>, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match timeout {
                Some(after) => tokio::time::timeout(after, work).await.map_err(|_| WorkflowError::Timeout {
                    operation: operation.to_string(),
                    after,
                })?,
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.control.abort_error()),
            result = bounded => result,
        }
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, EventLog>> {
        self.log
            .lock()
            .map_err(|_| WorkflowError::Internal("event log lock poisoned".into()))
    }

    /// Push onto the log mirror and publish to the hub. Callers hold the
    /// emission turn.
    fn append<F>(&self, build: F) -> Result<(u64, Arc<SerializedEvent>)>
    where
        F: FnOnce(u64) -> WorkflowEvent,
    {
        // Nothing is emitted once the execution is aborted
        self.ensure_active()?;

        let mut log = self.lock_log()?;
        let position = log.events.len() as u64;
        let event = build(position);
        if matches!(event, WorkflowEvent::WorkflowCompleted { .. }) && !self.control.complete() {
            return Err(self.control.abort_error());
        }
        let wire = Arc::new(event.to_serialized(log.last_id)?);
        log.last_id = Some(wire.id);
        log.events.push(wire.clone());
        drop(log);

        trace!(session_id = %self.session_id, position, event = %wire.name, "Event emitted");
        self.hub.publish(HubMessage {
            position,
            event: Arc::new(event),
            wire: wire.clone(),
        });
        Ok((position, wire))
    }

    /// Hand the event to the store and the bus, then end the turn. Delivery
    /// runs on its own task so it completes even if the emitter is dropped.
    async fn deliver(&self, turn: OwnedMutexGuard<()>, position: u64, wire: Arc<SerializedEvent>) -> Result<()> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let sinks = self.sinks.clone();
        let session_id = self.session_id;
        tokio::spawn(async move {
            sinks.deliver(session_id, position, &wire).await;
            drop(turn);
        })
        .await
        .map_err(|e| WorkflowError::Internal(format!("event delivery failed: {}", e)))
    }
}
