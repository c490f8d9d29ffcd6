//! TCP listener that authenticates connections and dispatches them by kind.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use super::{HubConfig, HubEvent, NodeRegistry};
use crate::envelope::FrameCodec;
use crate::error::NodeError;
use crate::framer::FramerOptions;
use crate::liveness::{LivenessConfig, LivenessMonitor};
use crate::node::{Node, NodeKind};
use crate::shutdown::ShutdownToken;

/// A running hub. Dropping it does not stop the accept loop; call
/// [`Hub::stop`].
pub struct Hub {
    local_addr: SocketAddr,
    registry: Arc<NodeRegistry>,
    events: Mutex<Option<mpsc::Receiver<HubEvent>>>,
    shutdown: ShutdownToken,
}

/// Everything a connection task needs, shared by the accept loop.
struct AcceptContext {
    codec: FrameCodec,
    framer: FramerOptions,
    registry: Arc<NodeRegistry>,
    events: mpsc::Sender<HubEvent>,
    liveness: Option<LivenessConfig>,
}

impl AcceptContext {
    fn emit(&self, event: HubEvent) {
        emit(&self.events, event);
    }
}

fn emit(events: &mpsc::Sender<HubEvent>, event: HubEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(?event, "hub event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!("hub event receiver gone");
        }
    }
}

impl Hub {
    /// Bind the listener and start accepting.
    pub async fn start(config: HubConfig) -> Result<Self, NodeError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "hub listening");

        let registry = Arc::new(NodeRegistry::new(config.first_node_id));
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let context = Arc::new(AcceptContext {
            codec: FrameCodec::with_key(config.key),
            framer: config.framer,
            registry: Arc::clone(&registry),
            events: tx,
            liveness: config.liveness,
        });

        let shutdown = ShutdownToken::new();
        let stop_rx = shutdown.subscribe();
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, context, stop_rx).await;
        });
        shutdown.add_task(handle).await;
        shutdown.set_online();

        Ok(Self {
            local_addr,
            registry,
            events: Mutex::new(Some(rx)),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// The event stream. Only the first call returns it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<HubEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_online()
    }

    /// Stop accepting, abort in-progress connections and disconnect every
    /// registered node.
    pub async fn stop(&self) {
        self.shutdown.signal_stop();
        self.shutdown.join_all().await;
        self.registry.disconnect_all().await;
        info!(local_addr = %self.local_addr, "hub stopped");
    }

    async fn accept_loop(
        listener: TcpListener,
        context: Arc<AcceptContext>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut connections = JoinSet::new();
        loop {
            let (stream, peer) = tokio::select! {
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
                _ = stop_rx.changed() => {
                    debug!(in_progress = connections.len(), "accept loop stopping");
                    break;
                }
            };

            debug!(%peer, "accepted connection");
            let context = Arc::clone(&context);
            connections.spawn(async move {
                Self::handle_connection(stream, context).await;
            });
        }
        connections.shutdown().await;
    }

    async fn handle_connection(stream: TcpStream, context: Arc<AcceptContext>) {
        let node = Node::from_tcp(stream, context.codec.clone(), context.framer.clone());
        let assigned_id = context.registry.next_id();

        if let Err(e) = node.authenticate(assigned_id).await {
            context.emit(HubEvent::AuthenticationFailed {
                peer: node.peer_addr(),
                reason: e.to_string(),
            });
            return;
        }

        match node.kind() {
            Some(NodeKind::Primary) => Self::admit_primary(node, &context).await,
            Some(NodeKind::Liveness | NodeKind::Auxiliary) => {
                // Failures are logged and the candidate is closed by the registry.
                let _ = context.registry.accept_sub_channel(node).await;
            }
            None => node.disconnect().await,
        }
    }

    async fn admit_primary(node: Arc<Node>, context: &AcceptContext) {
        let Some(id) = node.id() else {
            node.disconnect().await;
            return;
        };

        let registry = Arc::downgrade(&context.registry);
        let events = context.events.clone();
        node.set_on_disconnect(move |node| {
            if let Some(registry) = registry.upgrade()
                && let Some(registered) = registry.get(id)
                && std::ptr::eq(Arc::as_ptr(&registered), node)
            {
                registry.remove(id);
            }
            emit(&events, HubEvent::NodeDisconnected { id });
        });

        if let Err(e) = context.registry.register(Arc::clone(&node)) {
            warn!(node_id = id, error = %e, "could not register node");
            node.disconnect().await;
            return;
        }
        // Lost a race with a disconnect that ran before the callback could
        // find the node in the registry.
        if node.is_disposed() {
            context.registry.remove(id);
            return;
        }

        info!(node_id = id, peer = ?node.peer_addr(), "primary node connected");
        context.emit(HubEvent::NodeConnected {
            id,
            peer: node.peer_addr(),
        });

        let Some(liveness) = context.liveness.clone() else {
            return;
        };
        match node.create_sub_channel(NodeKind::Liveness).await {
            Ok(channel) => {
                let reason = LivenessMonitor::new(channel, node, liveness).run().await;
                debug!(node_id = id, ?reason, "liveness monitor finished");
            }
            Err(e) => {
                warn!(node_id = id, error = %e, "could not open liveness channel");
                node.disconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{loopback_hub_config, wait_for};

    #[tokio::test]
    async fn start_binds_ephemeral_port_and_stops() {
        let hub = Hub::start(loopback_hub_config()).await.unwrap();
        assert_ne!(hub.local_addr().port(), 0);
        assert!(hub.is_running());
        assert!(hub.take_events().is_some());
        assert!(hub.take_events().is_none());

        hub.stop().await;
        assert!(!hub.is_running());
        assert!(TcpStream::connect(hub.local_addr()).await.is_err());
    }

    #[tokio::test]
    async fn garbage_connection_fails_authentication() {
        use tokio::io::AsyncWriteExt;

        let hub = Hub::start(loopback_hub_config()).await.unwrap();
        let mut events = hub.take_events().unwrap();

        let mut raw = TcpStream::connect(hub.local_addr()).await.unwrap();
        // A well-formed length prefix followed by an undecodable body.
        raw.write_all(&[0, 0, 0, 3, 0x07, 0x07, 0x07]).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, HubEvent::AuthenticationFailed { .. }));
        assert!(wait_for(Duration::from_secs(1), || hub.registry().is_empty()).await);

        hub.stop().await;
    }

    #[tokio::test]
    async fn stop_aborts_pending_handshakes() {
        use tokio::io::AsyncReadExt;

        let hub = Hub::start(loopback_hub_config()).await.unwrap();
        let mut raw = TcpStream::connect(hub.local_addr()).await.unwrap();

        // The challenge frame arrives; never answer it.
        let mut prefix = [0u8; 4];
        raw.read_exact(&mut prefix).await.unwrap();
        let mut challenge = vec![0u8; u32::from_be_bytes(prefix) as usize];
        raw.read_exact(&mut challenge).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), hub.stop())
            .await
            .expect("stop waited on the handshake");

        // The connection task is gone, so the socket closes well before the
        // handshake bound.
        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(3), raw.read_to_end(&mut rest)).await;
        assert!(read.is_ok(), "connection outlived the stopped hub");
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let config = crate::hub::HubConfig::new("not-an-address", crate::testing::test_key());
        assert!(matches!(Hub::start(config).await, Err(NodeError::Io(_))));
    }
}
