//! Error types for the hub binary.

use nodewire_crypto::CryptoError;
use nodewire_transport::NodeError;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid key: {0}")]
    Key(#[from] CryptoError),
    #[error("transport error: {0}")]
    Transport(#[from] NodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hub not started")]
    NotStarted,
    #[error("hub already running")]
    AlreadyRunning,
}
