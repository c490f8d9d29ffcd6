//! Stop signalling shared by framers and the hub accept loop.
//!
//! A [`ShutdownToken`] bundles a `watch` channel that wakes blocked reads and
//! accept loops, an online flag, and the join handles of background tasks.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

pub struct ShutdownToken {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    online: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            stop_rx,
            online: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A receiver to poll in `tokio::select!` next to the I/O it guards.
    ///
    /// ```ignore
    /// tokio::select! {
    ///     n = reader.read(&mut buf) => { /* ... */ }
    ///     _ = stop_rx.changed() => return Err(FramerError::Closed),
    /// }
    /// ```
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Idempotent.
    pub fn signal_stop(&self) {
        self.online.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }

    pub fn set_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub async fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    /// Await every registered task. Join errors are ignored.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}
