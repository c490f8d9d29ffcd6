//! The accepting side: a TCP listener that authenticates every connection,
//! keeps primary nodes in a [`NodeRegistry`] and routes sub-channel
//! connections to the primary that requested them.

pub mod registry;
pub mod server;

pub use registry::NodeRegistry;
pub use server::Hub;

use std::net::SocketAddr;

use nodewire_crypto::SecretKey;

use crate::envelope::Envelope;
use crate::framer::FramerOptions;
use crate::liveness::LivenessConfig;

/// Default capacity of the [`HubEvent`] channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for a [`Hub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address or `host:port` to listen on.
    pub bind_addr: String,
    /// Shared key for every connection.
    pub key: SecretKey,
    /// Framing options applied to accepted connections.
    pub framer: FramerOptions,
    /// Id handed to the first authenticated connection.
    pub first_node_id: u32,
    /// Run a liveness monitor for every primary node (`None` disables it).
    pub liveness: Option<LivenessConfig>,
    pub event_capacity: usize,
}

impl HubConfig {
    pub fn new(bind_addr: impl Into<String>, key: SecretKey) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            key,
            framer: FramerOptions::default(),
            first_node_id: 1,
            liveness: Some(LivenessConfig::default()),
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_first_node_id(mut self, id: u32) -> Self {
        self.first_node_id = id;
        self
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.framer.envelope = envelope;
        self
    }

    pub fn with_liveness(mut self, liveness: Option<LivenessConfig>) -> Self {
        self.liveness = liveness;
        self
    }
}

/// Lifecycle notifications from a running [`Hub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    NodeConnected {
        id: u32,
        peer: Option<SocketAddr>,
    },
    NodeDisconnected {
        id: u32,
    },
    AuthenticationFailed {
        peer: Option<SocketAddr>,
        reason: String,
    },
}
