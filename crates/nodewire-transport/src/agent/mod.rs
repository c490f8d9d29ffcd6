//! The connecting side: dials the hub, answers the handshake and serves
//! sub-channel requests arriving on the primary node.

pub mod session;

pub use session::{AgentConnector, AgentSession};

use std::time::Duration;

use nodewire_crypto::SecretKey;

use crate::constants::DEFAULT_CONNECT_TIMEOUT;
use crate::framer::FramerOptions;

/// Default buffer of the auxiliary sub-channel queue handed to the
/// application.
pub const SUB_CHANNEL_QUEUE: usize = 16;

/// Configuration for an [`AgentConnector`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hub address as `host:port`.
    pub hub_addr: String,
    pub key: SecretKey,
    pub framer: FramerOptions,
    /// Timeout for each TCP connection attempt.
    pub connect_timeout: Duration,
    pub sub_channel_queue: usize,
}

impl AgentConfig {
    pub fn new(hub_addr: impl Into<String>, key: SecretKey) -> Self {
        Self {
            hub_addr: hub_addr.into(),
            key,
            framer: FramerOptions::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            sub_channel_queue: SUB_CHANNEL_QUEUE,
        }
    }

    pub fn with_framer(mut self, framer: FramerOptions) -> Self {
        self.framer = framer;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
