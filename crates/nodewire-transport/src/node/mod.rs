//! Logical channels multiplexed over physical connections.
//!
//! A [`Node`] owns one [`Framer`] and adds identity, kind, the parent/child
//! relationship between a primary node and its sub-channels, the
//! authentication handshake ([`auth`]) and the sub-channel negotiation
//! ([`subchannel`]).
//!
//! Lifecycle:
//!
//! ```text
//!   connected ──authenticate──▶ authenticated ──disconnect──▶ disposed
//!       │                                                        ▲
//!       └──────────────── handshake failure ─────────────────────┘
//! ```
//!
//! Disposal is one-way. Once disposed, every send and receive fails with
//! [`NodeError::Disposed`] without touching the socket.

pub mod auth;
pub mod correlation;
pub mod kind;
pub mod observers;
pub mod subchannel;

pub use kind::NodeKind;
pub use observers::{DisconnectCallback, ListenerId};
pub use subchannel::CreateRequest;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info, trace};

use crate::envelope::FrameCodec;
use crate::error::NodeError;
use crate::framer::{Framer, FramerOptions};

use correlation::CorrelationTable;
use observers::DisconnectObservers;

pub struct Node {
    framer: Framer,
    id: OnceLock<u32>,
    kind: OnceLock<NodeKind>,
    parent: OnceLock<Weak<Node>>,
    children: Mutex<Vec<Arc<Node>>>,
    pending: CorrelationTable<Arc<Node>>,
    disposed: AtomicBool,
    /// One permit: at most one receive in flight.
    in_flight: Semaphore,
    observers: DisconnectObservers,
    peer_addr: Option<SocketAddr>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Node {
    pub fn new(framer: Framer) -> Arc<Self> {
        Self::build(framer, None)
    }

    /// Wrap any byte stream (an in-memory duplex in tests, TLS, ...).
    pub fn from_stream<S>(stream: S, codec: FrameCodec, options: FramerOptions) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::new(Framer::new(stream, codec, options))
    }

    pub fn from_tcp(stream: TcpStream, codec: FrameCodec, options: FramerOptions) -> Arc<Self> {
        let _ = stream.set_nodelay(true);
        let peer_addr = stream.peer_addr().ok();
        Self::build(Framer::new(stream, codec, options), peer_addr)
    }

    fn build(framer: Framer, peer_addr: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            framer,
            id: OnceLock::new(),
            kind: OnceLock::new(),
            parent: OnceLock::new(),
            children: Mutex::new(Vec::new()),
            pending: CorrelationTable::new(),
            disposed: AtomicBool::new(false),
            in_flight: Semaphore::new(1),
            observers: DisconnectObservers::new(),
            peer_addr,
        })
    }

    // -- Identity --

    /// Logical id, known once authentication succeeded.
    pub fn id(&self) -> Option<u32> {
        self.id.get().copied()
    }

    pub fn kind(&self) -> Option<NodeKind> {
        self.kind.get().copied()
    }

    pub fn is_authenticated(&self) -> bool {
        self.kind.get().is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    pub(crate) fn adopt_identity(&self, id: u32, kind: NodeKind) -> Result<(), NodeError> {
        self.id
            .set(id)
            .map_err(|_| NodeError::AuthenticationFailed("node already has an id".into()))?;
        self.kind
            .set(kind)
            .map_err(|_| NodeError::AuthenticationFailed("node already has a kind".into()))?;
        Ok(())
    }

    // -- Family --

    /// The primary node this sub-channel belongs to, if it is still alive.
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<Node>> {
        lock(&self.children).clone()
    }

    /// Correlation ids of sub-channel requests still waiting for an accept.
    pub fn pending_correlations(&self) -> Vec<u8> {
        self.pending.ids()
    }

    pub(crate) fn attach_child(self: &Arc<Self>, child: &Arc<Node>) {
        let _ = child.parent.set(Arc::downgrade(self));
        lock(&self.children).push(Arc::clone(child));
    }

    pub(crate) fn detach_child(&self, child: &Node) -> bool {
        let mut children = lock(&self.children);
        let before = children.len();
        children.retain(|c| !std::ptr::eq(Arc::as_ptr(c), child));
        children.len() != before
    }

    // -- I/O --

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.framer.receive_timeout()
    }

    pub fn set_receive_timeout(&self, timeout: Option<Duration>) {
        self.framer.set_receive_timeout(timeout);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), NodeError> {
        if self.is_disposed() {
            return Err(NodeError::Disposed);
        }

        if let Err(e) = self.framer.send(payload).await {
            debug!(node_id = ?self.id(), error = %e, "send failed, disconnecting");
            self.disconnect().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Receive one payload. Concurrent callers are served one at a time in
    /// arrival order.
    pub async fn receive(&self) -> Result<Vec<u8>, NodeError> {
        if self.is_disposed() {
            return Err(NodeError::Disposed);
        }

        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| NodeError::Disposed)?;

        match self.framer.receive().await {
            Ok(data) => Ok(data),
            Err(e) => {
                debug!(node_id = ?self.id(), error = %e, "receive failed, disconnecting");
                self.disconnect().await;
                Err(e.into())
            }
        }
    }

    // -- Teardown --

    /// Close this node. A primary node also closes its auxiliary children;
    /// liveness children are left to their monitor. Idempotent.
    pub async fn disconnect(&self) {
        if !self.mark_disposed() {
            return;
        }
        self.release_transport().await;

        if self.kind() == Some(NodeKind::Primary) {
            let children = std::mem::take(&mut *lock(&self.children));
            for child in children {
                match child.kind() {
                    Some(NodeKind::Liveness) => {
                        trace!(node_id = ?self.id(), "leaving liveness child to its monitor");
                    }
                    Some(NodeKind::Primary | NodeKind::Auxiliary) | None => {
                        child.close_as_child().await;
                    }
                }
            }
        }

        self.notify_disconnected();
    }

    async fn close_as_child(&self) {
        if !self.mark_disposed() {
            return;
        }
        self.release_transport().await;
        self.notify_disconnected();
    }

    fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    async fn release_transport(&self) {
        self.in_flight.close();
        self.pending.clear();
        self.framer.shutdown().await;
    }

    fn notify_disconnected(&self) {
        info!(node_id = ?self.id(), kind = ?self.kind(), "node disconnected");
        self.observers.fire(self);
        if let Some(parent) = self.parent() {
            parent.detach_child(self);
        }
    }

    /// Set the owner callback, replacing any previous one. It runs before
    /// temporary listeners.
    pub fn set_on_disconnect(&self, callback: impl FnOnce(&Node) + Send + 'static) {
        self.observers.set_owner(Box::new(callback));
    }

    /// Register a one-shot listener. Listeners fire in registration order.
    pub fn add_temp_on_disconnect(
        &self,
        callback: impl FnOnce(&Node) + Send + 'static,
    ) -> ListenerId {
        self.observers.add_temporary(Box::new(callback))
    }

    pub fn remove_temp_on_disconnect(&self, id: ListenerId) -> bool {
        self.observers.remove_temporary(id)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("peer_addr", &self.peer_addr)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
