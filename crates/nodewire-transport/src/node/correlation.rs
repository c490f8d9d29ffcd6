//! Correlation table matching sub-channel requests to their accepts.
//!
//! Each pending request owns a oneshot sender keyed by a random id in
//! `1..=255`. The accept layer resolves the id with the new node; the waiting
//! caller holds the receiver. Entries are removed on resolve, abandon, or
//! clear, so keys are unique per table at any instant.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::oneshot;

use crate::error::NodeError;

/// Number of usable correlation ids (0 is never issued).
pub const CORRELATION_SPACE: usize = u8::MAX as usize;

pub(crate) struct CorrelationTable<T> {
    slots: Mutex<HashMap<u8, oneshot::Sender<T>>>,
}

impl<T> CorrelationTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<u8, oneshot::Sender<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh random id, retrying on collision.
    pub(crate) fn reserve(&self) -> Result<(u8, oneshot::Receiver<T>), NodeError> {
        let mut slots = self.slots();
        if slots.len() >= CORRELATION_SPACE {
            return Err(NodeError::CorrelationExhausted);
        }

        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate: u8 = rng.gen_range(1..=u8::MAX);
            if !slots.contains_key(&candidate) {
                break candidate;
            }
        };

        let (tx, rx) = oneshot::channel();
        slots.insert(id, tx);
        Ok((id, rx))
    }

    /// Hand `value` to the waiter registered under `id`.
    ///
    /// Gives the value back when no waiter is registered or the waiter has
    /// already gone away.
    pub(crate) fn resolve(&self, id: u8, value: T) -> Result<(), T> {
        let sender = self.slots().remove(&id);
        match sender {
            Some(tx) => tx.send(value),
            None => Err(value),
        }
    }

    pub(crate) fn abandon(&self, id: u8) -> bool {
        self.slots().remove(&id).is_some()
    }

    /// Drop every pending entry; waiters observe a closed channel.
    pub(crate) fn clear(&self) {
        self.slots().clear();
    }

    pub(crate) fn contains(&self, id: u8) -> bool {
        self.slots().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }

    pub(crate) fn ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.slots().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
