//! Error types for the transport layer.

use nodewire_crypto::CryptoError;

/// Malformed or undecodable frame contents.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("invalid envelope marker: {0:#04x}")]
    InvalidMarker(u8),
    #[error("truncated compression header")]
    TruncatedHeader,
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("decompressed length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Failures while moving frames over the socket.
#[derive(Debug, thiserror::Error)]
pub enum FramerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection")]
    Disconnected,
    #[error("receive deadline elapsed")]
    Timeout,
    #[error("framer closed")]
    Closed,
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),
}

/// Errors surfaced by node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node is disposed")]
    Disposed,
    #[error("transport error: {0}")]
    Framer(#[from] FramerError),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid node kind: {0}")]
    InvalidKind(i32),
    #[error("node is not authenticated")]
    NotAuthenticated,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("sub-channel request rejected by peer")]
    SubChannelRejected,
    #[error("no free correlation id")]
    CorrelationExhausted,
    #[error("no pending sub-channel for correlation id {0}")]
    UnknownCorrelation(u8),
    #[error("no primary node with id {0}")]
    ParentNotFound(u32),
    #[error("operation timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
