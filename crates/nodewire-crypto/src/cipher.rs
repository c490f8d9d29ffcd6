//! The cipher collaborator used by the frame codec.
//!
//! On the wire the transport uses AES-256-CBC with PKCS7 padding and a fixed
//! all-zero IV. The fixed IV makes equal plaintexts produce equal
//! ciphertexts; it is kept because both ends must agree on it, and changing it
//! breaks compatibility with deployed peers.

use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::key::SecretKey;
use crate::{CryptoError, pkcs7};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// IV shared by every frame on every connection.
pub const FIXED_IV: [u8; 16] = [0u8; 16];

/// A symmetric encrypt/decrypt pair keyed at construction.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-CBC with PKCS7 padding and [`FIXED_IV`].
#[derive(Debug, Clone)]
pub struct Aes256CbcCipher {
    key: SecretKey,
}

impl Aes256CbcCipher {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }
}

impl Cipher for Aes256CbcCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let padded = pkcs7::pad(plaintext);
        let mut out = vec![0u8; padded.len()];
        Aes256CbcEnc::new(self.key.as_bytes().into(), (&FIXED_IV).into())
            .encrypt_padded_b2b_mut::<NoPadding>(&padded, &mut out)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(out)
    }

    /// Fails with [`CryptoError::DecryptionFailed`] on empty or unaligned
    /// input and [`CryptoError::InvalidPadding`] when the key is wrong or the
    /// data was corrupted.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(pkcs7::BLOCK_SIZE) {
            return Err(CryptoError::DecryptionFailed);
        }

        let mut buf = ciphertext.to_vec();
        let decrypted = Aes256CbcDec::new(self.key.as_bytes().into(), (&FIXED_IV).into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(pkcs7::unpad(decrypted)?.to_vec())
    }
}
