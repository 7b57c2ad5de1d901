//! Observable state cell
//!
//! Two writers feed the cell: `update_state` publishes eagerly from the
//! workflow task, and the projection worker republishes the state carried by
//! each state event. Every value is tagged with the log position it belongs
//! to and older positions never overwrite newer ones, so both writers converge
//! on the same value for a given position.

use std::sync::Arc;
use tokio::sync::watch;

/// A state value and the log position that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot<S> {
    pub position: u64,
    pub state: S,
}

pub(crate) struct StateCell<S> {
    tx: Arc<watch::Sender<StateSnapshot<S>>>,
}

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<S: Clone> StateCell<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(StateSnapshot {
            position: 0,
            state: initial,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> S {
        self.tx.borrow().state.clone()
    }

    pub fn position(&self) -> u64 {
        self.tx.borrow().position
    }

    /// Store `state` for `position`. A write for an older position is
    /// dropped. Rewriting the current position replaces the value without
    /// waking watchers. Returns whether watchers were notified.
    pub fn publish(&self, position: u64, state: S) -> bool {
        self.tx.send_if_modified(|current| {
            if position < current.position {
                return false;
            }
            let advanced = position > current.position;
            *current = StateSnapshot { position, state };
            advanced
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot<S>> {
        self.tx.subscribe()
    }
}
