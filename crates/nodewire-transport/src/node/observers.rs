//! Disconnect notification for nodes.
//!
//! Firing order is fixed: the owner callback first, then temporary listeners
//! in registration order. Every callback runs at most once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Node;

/// Callback invoked with the node that disconnected.
pub type DisconnectCallback = Box<dyn FnOnce(&Node) + Send + 'static>;

/// Handle for removing a temporary disconnect listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct DisconnectObservers {
    owner: Mutex<Option<DisconnectCallback>>,
    temporary: Mutex<Vec<(ListenerId, DisconnectCallback)>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DisconnectObservers {
    pub(crate) fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            temporary: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replaces any previous owner callback.
    pub(crate) fn set_owner(&self, callback: DisconnectCallback) {
        *lock(&self.owner) = Some(callback);
    }

    pub(crate) fn add_temporary(&self, callback: DisconnectCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.temporary).push((id, callback));
        id
    }

    pub(crate) fn remove_temporary(&self, id: ListenerId) -> bool {
        let mut temporary = lock(&self.temporary);
        let before = temporary.len();
        temporary.retain(|(listener, _)| *listener != id);
        temporary.len() != before
    }

    /// Run and drop every registered callback. Locks are released before
    /// any callback runs.
    pub(crate) fn fire(&self, node: &Node) {
        let owner = lock(&self.owner).take();
        if let Some(callback) = owner {
            callback(node);
        }

        let temporary = std::mem::take(&mut *lock(&self.temporary));
        for (_, callback) in temporary {
            callback(node);
        }
    }
}
