//! Per-execution event hub and the scope that owns its subscriber tasks
//!
//! Each subscriber gets its own unbounded FIFO channel, so every subscriber
//! sees events in log order. The tasks live in a `JoinSet` owned by the
//! scope: draining closes the hub and waits for them to finish, dropping the
//! scope aborts them.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{warn, Instrument};
use workflow_engine_sdk::{SerializedEvent, WorkflowEvent};

/// One emitted event as delivered to subscribers
#[derive(Debug, Clone)]
pub(crate) struct HubMessage {
    pub position: u64,
    pub event: Arc<WorkflowEvent>,
    pub wire: Arc<SerializedEvent>,
}

pub(crate) type HubReceiver = mpsc::UnboundedReceiver<HubMessage>;

#[derive(Default)]
pub(crate) struct EventHub {
    senders: Mutex<Vec<mpsc::UnboundedSender<HubMessage>>>,
}

impl EventHub {
    pub fn subscribe(&self) -> HubReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    pub fn publish(&self, message: HubMessage) {
        if let Ok(mut senders) = self.senders.lock() {
            // Receivers that went away (a dropped event stream) are pruned
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }

    /// Drop every sender so subscriber loops see end of stream
    pub fn close(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear();
        }
    }
}

pub(crate) struct SubscriberScope {
    hub: Arc<EventHub>,
    tasks: JoinSet<()>,
}

impl SubscriberScope {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(EventHub::default()),
            tasks: JoinSet::new(),
        }
    }

    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    /// Fork a subscriber task fed from its own channel
    pub fn spawn<F, Fut>(&mut self, name: &'static str, subscriber: F)
    where
        F: FnOnce(HubReceiver) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.hub.subscribe();
        let span = tracing::debug_span!("subscriber", subscriber = name);
        self.tasks.spawn(subscriber(rx).instrument(span));
    }

    /// Close the hub and wait until every subscriber has handled every event
    pub async fn drain(mut self) {
        self.hub.close();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(error = %e, "Event subscriber panicked");
                }
            }
        }
    }
}
