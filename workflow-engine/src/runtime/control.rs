//! Control surface shared by execution handles and event streams

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use workflow_engine_sdk::{SessionId, WorkflowError, WorkflowObserver, ABORTED_BY_USER};

/// Settles once: either the completion event is emitted or an abort lands
#[derive(Debug, Clone, PartialEq)]
enum Lifecycle {
    Running,
    Completed,
    Aborted(String),
}

struct ControlInner {
    session_id: SessionId,
    input_tx: mpsc::UnboundedSender<Value>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    finished: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    emission: Arc<AsyncMutex<()>>,
    handler_wired: bool,
    observer: Option<Arc<dyn WorkflowObserver>>,
}

/// Cloneable control over one running execution
#[derive(Clone)]
pub struct ExecutionControl {
    inner: Arc<ControlInner>,
}

/// The execution-side ends of the control channels
pub(crate) struct ControlEnds {
    pub input_rx: mpsc::UnboundedReceiver<Value>,
    pub paused: watch::Receiver<bool>,
}

impl ExecutionControl {
    pub(crate) fn new(
        session_id: SessionId,
        handler_wired: bool,
        observer: Option<Arc<dyn WorkflowObserver>>,
    ) -> (Self, ControlEnds) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (paused_tx, paused_rx) = watch::channel(false);
        let control = Self {
            inner: Arc::new(ControlInner {
                session_id,
                input_tx,
                paused: paused_tx,
                cancel: CancellationToken::new(),
                finished: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::Running),
                emission: Arc::new(AsyncMutex::new(())),
                handler_wired,
                observer,
            }),
        };
        let ends = ControlEnds {
            input_rx,
            paused: paused_rx,
        };
        (control, ends)
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    /// Answer the pending (or next) human-input request.
    ///
    /// Ignored when a human-input handler is wired, since the handler answers
    /// instead.
    pub fn respond(&self, value: impl Into<Value>) {
        if self.inner.handler_wired {
            debug!(session_id = %self.inner.session_id, "Ignoring respond(): a human input handler is wired");
            return;
        }
        // The receiver is gone once the execution ended
        let _ = self.inner.input_tx.send(value.into());
    }

    /// Block the scheduler at the top of its next loop iteration
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Cancel the execution. Idempotent: only the first call has an effect,
    /// and none once `WorkflowCompleted` was emitted.
    pub fn abort(&self) {
        self.abort_with(ABORTED_BY_USER);
    }

    pub(crate) fn abort_with(&self, reason: &str) {
        {
            let Ok(mut lifecycle) = self.inner.lifecycle.lock() else {
                return;
            };
            if *lifecycle != Lifecycle::Running {
                return;
            }
            *lifecycle = Lifecycle::Aborted(reason.to_string());
        }
        info!(session_id = %self.inner.session_id, reason, "Aborting execution");
        self.inner.cancel.cancel();
        self.report_error(&self.abort_error());
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// True once `WorkflowCompleted` was emitted
    pub fn is_completed(&self) -> bool {
        matches!(self.inner.lifecycle.lock().as_deref(), Ok(Lifecycle::Completed))
    }

    /// Claim completion ahead of emitting `WorkflowCompleted`. False when an
    /// abort got there first.
    pub(crate) fn complete(&self) -> bool {
        let Ok(mut lifecycle) = self.inner.lifecycle.lock() else {
            return false;
        };
        if *lifecycle != Lifecycle::Running {
            return false;
        }
        *lifecycle = Lifecycle::Completed;
        true
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// The error an aborted execution resolves with
    pub(crate) fn abort_error(&self) -> WorkflowError {
        let reason = match self.inner.lifecycle.lock().as_deref() {
            Ok(Lifecycle::Aborted(reason)) => reason.clone(),
            _ => ABORTED_BY_USER.to_string(),
        };
        WorkflowError::aborted(reason)
    }

    /// Take the emission turn. Held until the event reached the store and
    /// the bus.
    pub(crate) async fn emission_turn(&self) -> OwnedMutexGuard<()> {
        self.inner.emission.clone().lock_owned().await
    }

    /// Wait for an in-flight emission to finish its side effects
    pub(crate) async fn emission_settled(&self) {
        drop(self.emission_turn().await);
    }

    /// Flip to finished; true for the first caller only
    pub(crate) fn mark_finished(&self) -> bool {
        self.inner
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Report a terminal error to the observer unless the execution already
    /// finished or reported
    pub(crate) fn report_error(&self, error: &WorkflowError) {
        if self.mark_finished() {
            if let Some(observer) = &self.inner.observer {
                observer.on_error(error);
            }
        }
    }
}

impl std::fmt::Debug for ExecutionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionControl")
            .field("session_id", &self.inner.session_id)
            .field("paused", &self.is_paused())
            .field("aborted", &self.is_aborted())
            .field("completed", &self.is_completed())
            .field("finished", &self.is_finished())
            .finish()
    }
}
