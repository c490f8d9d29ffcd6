//! Multiplexed node channels for the nodewire stack.
//!
//! A physical TCP connection between a hub and an agent carries one
//! authenticated [`Node`]. Nodes exchange length-prefixed, encrypted and
//! optionally compressed frames through a [`Framer`], and a primary node can
//! ask its peer to open further sub-channel nodes that are matched back to the
//! request by a correlation id.

pub mod agent;
pub mod compression;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod hub;
pub mod liveness;
pub mod node;
pub mod shutdown;
pub mod testing;

pub use agent::{AgentConfig, AgentConnector, AgentSession};
pub use compression::{Bzip2Compressor, Compressor};
pub use envelope::{CompressionHeader, DecodedFrame, Envelope, FrameCodec};
pub use error::{FrameError, FramerError, NodeError};
pub use framer::{Framer, FramerOptions};
pub use hub::{Hub, HubConfig, HubEvent, NodeRegistry};
pub use liveness::{ErrorReporter, LivenessConfig, LivenessMonitor, LivenessResponder};
pub use node::{CreateRequest, ListenerId, Node, NodeKind};
pub use shutdown::ShutdownToken;

pub use nodewire_crypto::SecretKey;
