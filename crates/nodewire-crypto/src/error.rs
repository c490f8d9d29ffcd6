//! Error types for the crypto layer.

/// Errors produced while handling keys or running the cipher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("invalid PKCS7 padding")]
    InvalidPadding,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
}
