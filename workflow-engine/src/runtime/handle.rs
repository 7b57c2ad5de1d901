//! Caller-facing execution handles

use futures::future::BoxFuture;
use futures::Stream;
use serde_json::Value;
use std::future::IntoFuture;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;
use workflow_engine_sdk::{Result, SerializedEvent, SessionId, WorkflowError, WorkflowEvent};

use super::control::ExecutionControl;
use super::hub::HubReceiver;
use super::state_cell::StateSnapshot;
use super::WorkflowResult;

pub(crate) const STREAM_DETACHED: &str = "event stream detached";

/// Result side of a running execution; await it for the [`WorkflowResult`]
pub struct ExecutionHandle<S> {
    control: ExecutionControl,
    state: watch::Receiver<StateSnapshot<S>>,
    task: JoinHandle<Result<WorkflowResult<S>>>,
}

impl<S> ExecutionHandle<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        control: ExecutionControl,
        state: watch::Receiver<StateSnapshot<S>>,
        task: JoinHandle<Result<WorkflowResult<S>>>,
    ) -> Self {
        Self { control, state, task }
    }

    pub fn control(&self) -> &ExecutionControl {
        &self.control
    }

    pub fn session_id(&self) -> SessionId {
        self.control.session_id()
    }

    pub fn respond(&self, value: impl Into<Value>) {
        self.control.respond(value)
    }

    pub fn pause(&self) {
        self.control.pause()
    }

    pub fn resume(&self) {
        self.control.resume()
    }

    pub fn abort(&self) {
        self.control.abort()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Current state snapshot
    pub fn state(&self) -> S {
        self.state.borrow().state.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<StateSnapshot<S>> {
        self.state.clone()
    }

    /// Wait for the execution to settle.
    ///
    /// Resolves with the aborted error as soon as the execution is aborted
    /// and any in-flight emission has reached the store, without waiting for
    /// the task to unwind. An abort cannot land after `WorkflowCompleted`, so
    /// a completed run always resolves with its result.
    pub async fn result(self) -> Result<WorkflowResult<S>> {
        let cancel = self.control.cancel_token();
        let mut task = self.task;

        tokio::select! {
            biased;
            joined = &mut task => settle(joined),
            _ = cancel.cancelled() => {
                self.control.emission_settled().await;
                if task.is_finished() {
                    return settle(task.await);
                }
                debug!(session_id = %self.control.session_id(), "Resolving aborted execution ahead of teardown");
                Err(self.control.abort_error())
            }
        }
    }
}

impl<S> IntoFuture for ExecutionHandle<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Output = Result<WorkflowResult<S>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.result())
    }
}

fn settle<S>(joined: std::result::Result<Result<WorkflowResult<S>>, JoinError>) -> Result<WorkflowResult<S>> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(WorkflowError::aborted(workflow_engine_sdk::ABORTED_BY_USER)),
        Err(e) => Err(WorkflowError::Internal(format!("execution task panicked: {}", e))),
    }
}

/// Live serialized events of one execution, in log order. Ends after the
/// last event of the execution.
///
/// Dropping the stream before `WorkflowCompleted` aborts the execution.
pub struct EventStream {
    rx: HubReceiver,
    control: ExecutionControl,
    ended: bool,
}

impl EventStream {
    pub(crate) fn new(rx: HubReceiver, control: ExecutionControl) -> Self {
        Self {
            rx,
            control,
            ended: false,
        }
    }
}

impl Stream for EventStream {
    type Item = SerializedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => {
                if matches!(*message.event, WorkflowEvent::WorkflowCompleted { .. }) {
                    self.ended = true;
                }
                Poll::Ready(Some((*message.wire).clone()))
            }
            Poll::Ready(None) => {
                self.ended = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if !self.ended && !self.control.is_completed() && !self.control.is_finished() {
            self.control.abort_with(STREAM_DETACHED);
        }
    }
}

/// Streaming shape of an execution: control, live events and the result
pub struct StreamingExecution<S> {
    pub control: ExecutionControl,
    pub events: EventStream,
    pub result: ExecutionHandle<S>,
}
