//! Agent connections and the control loop on the primary node.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AgentConfig;
use crate::constants::{CREATE_ACK, CREATE_NACK};
use crate::envelope::FrameCodec;
use crate::error::NodeError;
use crate::liveness::{ErrorReporter, LivenessResponder};
use crate::node::{CreateRequest, Node, NodeKind};

/// Opens authenticated connections to a hub.
#[derive(Debug, Clone)]
pub struct AgentConnector {
    config: Arc<AgentConfig>,
    codec: FrameCodec,
}

impl AgentConnector {
    pub fn new(config: AgentConfig) -> Self {
        let codec = FrameCodec::with_key(config.key.clone());
        Self {
            config: Arc::new(config),
            codec,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Open a raw, unauthenticated node to the hub.
    pub async fn dial(&self) -> Result<Arc<Node>, NodeError> {
        let target = &self.config.hub_addr;
        let stream =
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(target))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(%target, error = %e, "connection failed");
                    return Err(NodeError::Io(e));
                }
                Err(_) => {
                    debug!(%target, "connection timed out");
                    return Err(NodeError::Timeout);
                }
            };
        Ok(Node::from_tcp(
            stream,
            self.codec.clone(),
            self.config.framer.clone(),
        ))
    }

    /// Connect and authenticate as a primary node.
    pub async fn connect_primary(&self) -> Result<AgentSession, NodeError> {
        let node = self.dial().await?;
        let id = node.respond_authentication(NodeKind::Primary, None).await?;
        info!(node_id = id, hub = %self.config.hub_addr, "connected to hub");
        Ok(AgentSession::new(self.clone(), node, id))
    }

    /// Connect a sub-channel for the request `correlation` made on the
    /// primary node `primary_id`.
    pub async fn open_sub_channel(
        &self,
        kind: NodeKind,
        primary_id: u32,
        correlation: u8,
    ) -> Result<Arc<Node>, NodeError> {
        let node = self.dial().await?;
        node.respond_authentication(kind, Some(primary_id)).await?;
        node.send(&[correlation]).await?;
        debug!(node_id = primary_id, %kind, correlation, "sub-channel opened");
        Ok(node)
    }
}

/// State shared with sub-channel tasks.
#[derive(Default)]
struct LivenessSlot {
    channel: Option<Arc<Node>>,
    reporter: Option<ErrorReporter>,
}

/// An authenticated primary connection.
pub struct AgentSession {
    connector: AgentConnector,
    primary: Arc<Node>,
    id: u32,
    sub_tx: mpsc::Sender<Arc<Node>>,
    sub_rx: Mutex<Option<mpsc::Receiver<Arc<Node>>>>,
    liveness: Arc<Mutex<LivenessSlot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AgentSession {
    fn new(connector: AgentConnector, primary: Arc<Node>, id: u32) -> Self {
        let (sub_tx, sub_rx) = mpsc::channel(connector.config.sub_channel_queue.max(1));
        Self {
            connector,
            primary,
            id,
            sub_tx,
            sub_rx: Mutex::new(Some(sub_rx)),
            liveness: Arc::new(Mutex::new(LivenessSlot::default())),
        }
    }

    pub fn primary(&self) -> &Arc<Node> {
        &self.primary
    }

    /// Id assigned by the hub.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Auxiliary sub-channels opened at the hub's request. Only the first
    /// call returns the receiver.
    pub fn sub_channels(&self) -> Option<mpsc::Receiver<Arc<Node>>> {
        lock(&self.sub_rx).take()
    }

    /// Report an application error to the hub over the liveness channel.
    /// Returns `false` when no liveness channel is running.
    pub fn report_error(&self, message: impl Into<String>) -> bool {
        lock(&self.liveness)
            .reporter
            .as_ref()
            .is_some_and(|reporter| reporter.report(message))
    }

    pub fn has_liveness(&self) -> bool {
        lock(&self.liveness)
            .channel
            .as_ref()
            .is_some_and(|channel| !channel.is_disposed())
    }

    /// Handle create requests on the primary node until it closes.
    pub async fn serve(&self) -> Result<(), NodeError> {
        loop {
            let payload = self.primary.receive().await?;
            match CreateRequest::parse(&payload) {
                Ok(request) => {
                    self.primary.send(&[CREATE_ACK]).await?;
                    self.spawn_sub_channel(request);
                }
                Err(e) => {
                    warn!(node_id = self.id, error = %e, "refusing control message");
                    self.primary.send(&[CREATE_NACK]).await?;
                }
            }
        }
    }

    fn spawn_sub_channel(&self, request: CreateRequest) {
        let connector = self.connector.clone();
        let primary = Arc::clone(&self.primary);
        let primary_id = self.id;
        let sub_tx = self.sub_tx.clone();
        let slot = Arc::clone(&self.liveness);

        tokio::spawn(async move {
            let node = match connector
                .open_sub_channel(request.kind, primary_id, request.correlation)
                .await
            {
                Ok(node) => node,
                Err(e) => {
                    warn!(
                        node_id = primary_id,
                        kind = %request.kind,
                        error = %e,
                        "could not open sub-channel"
                    );
                    return;
                }
            };

            match request.kind {
                NodeKind::Liveness => {
                    let (responder, reporter) = LivenessResponder::new(Arc::clone(&node));
                    {
                        let mut slot = lock(&slot);
                        slot.channel = Some(node);
                        slot.reporter = Some(reporter);
                    }
                    if let Err(e) = responder.run().await {
                        debug!(node_id = primary_id, error = %e, "liveness responder stopped");
                    }
                }
                NodeKind::Auxiliary => {
                    primary.attach_child(&node);
                    if let Err(mpsc::error::SendError(node)) = sub_tx.send(node).await {
                        debug!(node_id = primary_id, "no consumer for sub-channel");
                        node.disconnect().await;
                    }
                }
                NodeKind::Primary => node.disconnect().await,
            }
        });
    }

    /// Close the primary node, its auxiliary sub-channels and the liveness
    /// channel.
    pub async fn disconnect(&self) {
        self.primary.disconnect().await;
        let channel = lock(&self.liveness).channel.take();
        if let Some(channel) = channel {
            channel.disconnect().await;
        }
    }
}
