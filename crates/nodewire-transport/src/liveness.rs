//! Heartbeat over a dedicated liveness node.
//!
//! The hub runs a [`LivenessMonitor`] that pings every second and expects a
//! pong within the receive deadline. The agent runs a [`LivenessResponder`]
//! that answers pings, or answers with a remote error once the application
//! has reported one through an [`ErrorReporter`]. When the monitor terminates
//! it tears down the liveness node and the primary, which takes every
//! auxiliary sub-channel with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::constants::{
    LIVENESS_PING_INTERVAL, LIVENESS_RECEIVE_TIMEOUT, PING, PONG, REMOTE_ERROR,
};
use crate::error::NodeError;
use crate::node::Node;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Deadline for each pong.
    pub receive_timeout: Duration,
    /// Pause after a pong before the next ping.
    pub ping_interval: Duration,
    /// Log remote error messages at `warn` instead of `debug`.
    pub report_remote_errors: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            receive_timeout: LIVENESS_RECEIVE_TIMEOUT,
            ping_interval: LIVENESS_PING_INTERVAL,
            report_remote_errors: true,
        }
    }
}

/// A decoded reply to a ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessReply {
    Pong,
    RemoteError(String),
    Unexpected(Vec<u8>),
}

pub fn classify(payload: &[u8]) -> LivenessReply {
    match payload {
        [PONG, ..] => LivenessReply::Pong,
        [REMOTE_ERROR, message @ ..] => {
            LivenessReply::RemoteError(String::from_utf8_lossy(message).into_owned())
        }
        other => LivenessReply::Unexpected(other.to_vec()),
    }
}

/// Why a monitor stopped.
#[derive(Debug)]
pub enum TerminationReason {
    RemoteError(String),
    UnexpectedReply(Vec<u8>),
    Transport(NodeError),
    PrimaryDisposed,
}

pub struct LivenessMonitor {
    channel: Arc<Node>,
    primary: Arc<Node>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(channel: Arc<Node>, primary: Arc<Node>, config: LivenessConfig) -> Self {
        channel.set_receive_timeout(Some(config.receive_timeout));
        Self {
            channel,
            primary,
            config,
        }
    }

    /// One ping/pong exchange.
    pub async fn ping(&self) -> Result<(), TerminationReason> {
        self.channel
            .send(&[PING])
            .await
            .map_err(TerminationReason::Transport)?;
        let reply = self
            .channel
            .receive()
            .await
            .map_err(TerminationReason::Transport)?;

        match classify(&reply) {
            LivenessReply::Pong => {
                trace!(node_id = ?self.channel.id(), "pong");
                Ok(())
            }
            LivenessReply::RemoteError(message) => Err(TerminationReason::RemoteError(message)),
            LivenessReply::Unexpected(bytes) => Err(TerminationReason::UnexpectedReply(bytes)),
        }
    }

    /// Ping until something goes wrong, then tear the connection down.
    pub async fn run(self) -> TerminationReason {
        let node_id = self.primary.id();
        debug!(node_id = ?node_id, "liveness monitor started");

        let reason = loop {
            if self.primary.is_disposed() {
                break TerminationReason::PrimaryDisposed;
            }
            if let Err(reason) = self.ping().await {
                break reason;
            }
            tokio::time::sleep(self.config.ping_interval).await;
        };

        match &reason {
            TerminationReason::RemoteError(message) if self.config.report_remote_errors => {
                warn!(node_id = ?node_id, %message, "remote error reported over liveness channel");
            }
            TerminationReason::RemoteError(message) => {
                debug!(node_id = ?node_id, %message, "remote error reported over liveness channel");
            }
            TerminationReason::UnexpectedReply(bytes) => {
                warn!(node_id = ?node_id, len = bytes.len(), "unexpected liveness reply");
            }
            TerminationReason::Transport(e) => {
                info!(node_id = ?node_id, error = %e, "liveness lost");
            }
            TerminationReason::PrimaryDisposed => {
                debug!(node_id = ?node_id, "primary gone, stopping liveness monitor");
            }
        }

        self.channel.disconnect().await;
        self.primary.disconnect().await;
        reason
    }
}

/// Cloneable handle for reporting an application error to the hub.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<String>,
}

impl ErrorReporter {
    /// Queue `message` for the next ping. Returns `false` once the responder
    /// has stopped.
    pub fn report(&self, message: impl Into<String>) -> bool {
        self.tx.send(message.into()).is_ok()
    }
}

pub struct LivenessResponder {
    channel: Arc<Node>,
    errors: mpsc::UnboundedReceiver<String>,
}

impl LivenessResponder {
    pub fn new(channel: Arc<Node>) -> (Self, ErrorReporter) {
        let (tx, errors) = mpsc::unbounded_channel();
        (Self { channel, errors }, ErrorReporter { tx })
    }

    /// Answer pings until the channel closes or an error has been reported.
    pub async fn run(mut self) -> Result<(), NodeError> {
        loop {
            let ping = self.channel.receive().await?;
            if ping != [PING] {
                self.channel.disconnect().await;
                return Err(NodeError::InvalidRequest(format!(
                    "expected ping, got {} bytes",
                    ping.len()
                )));
            }

            if let Ok(message) = self.errors.try_recv() {
                let mut reply = Vec::with_capacity(1 + message.len());
                reply.push(REMOTE_ERROR);
                reply.extend_from_slice(message.as_bytes());
                self.channel.send(&reply).await?;
                debug!(node_id = ?self.channel.id(), %message, "reported error to hub");
                self.channel.disconnect().await;
                return Ok(());
            }

            self.channel.send(&[PONG]).await?;
        }
    }
}
