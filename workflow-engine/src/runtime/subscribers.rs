//! Side effects of emission
//!
//! Persistence and broadcast run inline with each emission, in log order.
//! Observer and callback delivery run as subscriber tasks forked for each
//! execution. Failures on either path are logged and never reach the
//! execution result.

use std::sync::Arc;
use tracing::warn;
use workflow_engine_sdk::{dispatch, EventBus, EventStore, SerializedEvent, SessionId, WorkflowObserver};

use super::hub::HubReceiver;

pub type EventCallback = Arc<dyn Fn(&SerializedEvent) + Send + Sync>;

/// Store and bus an execution delivers to as part of each emission
#[derive(Clone, Default)]
pub(crate) struct EmissionSinks {
    pub store: Option<Arc<dyn EventStore>>,
    pub bus: Option<Arc<dyn EventBus>>,
}

impl EmissionSinks {
    pub fn is_empty(&self) -> bool {
        self.store.is_none() && self.bus.is_none()
    }

    /// Append to the store, then publish to the bus
    pub async fn deliver(&self, session_id: SessionId, position: u64, event: &SerializedEvent) {
        if let Some(store) = &self.store {
            if let Err(e) = store.append(&session_id, event).await {
                warn!(
                    session_id = %session_id,
                    position,
                    event = %event.name,
                    error = %e,
                    "Failed to persist event"
                );
            }
        }
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(&session_id, event).await {
                warn!(
                    session_id = %session_id,
                    event = %event.name,
                    error = %e,
                    "Failed to publish event"
                );
            }
        }
    }
}

pub(crate) async fn observe(mut rx: HubReceiver, observer: Arc<dyn WorkflowObserver>) {
    while let Some(message) = rx.recv().await {
        dispatch(observer.as_ref(), &message.event, &message.wire);
    }
}

pub(crate) async fn forward(mut rx: HubReceiver, callback: EventCallback) {
    while let Some(message) = rx.recv().await {
        callback(&message.wire);
    }
}
