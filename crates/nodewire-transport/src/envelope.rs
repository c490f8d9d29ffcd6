//! Pure encoding and decoding of frame bodies.
//!
//! ```text
//! [len:4 BE] body
//!
//! keep-alive  body = [0xFF]
//! legacy      body = [flag:1][orig_len:4 if flag=1][encrypt(payload), maybe compressed]
//! upgraded    body = [0x02] encrypt([flag:1][orig_len:4 if flag=1][payload, maybe compressed])
//! ```
//!
//! The legacy ordering encrypts first and compresses the ciphertext; the
//! upgraded ordering compresses the plaintext and encrypts the flagged block.
//! I/O lives in [`crate::framer`].

use std::sync::Arc;

use nodewire_crypto::{Aes256CbcCipher, Cipher, SecretKey};

use crate::compression::{Bzip2Compressor, Compressor};
use crate::constants::{
    FLAG_COMPRESSED, FLAG_UNCOMPRESSED, KEEPALIVE_MARKER, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE,
    ORIGINAL_SIZE_FIELD, UPGRADED_MARKER,
};
use crate::error::FrameError;

/// Ordering of encryption and compression inside a frame body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Envelope {
    /// Encrypt, then compress the ciphertext.
    #[default]
    Legacy,
    /// Compress, then encrypt, behind [`UPGRADED_MARKER`].
    Upgraded,
}

/// The compression sub-header, decoded once at the frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionHeader {
    Uncompressed,
    Compressed { original_size: u32 },
}

impl CompressionHeader {
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Uncompressed => 1,
            Self::Compressed { .. } => 1 + ORIGINAL_SIZE_FIELD,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Uncompressed => out.push(FLAG_UNCOMPRESSED),
            Self::Compressed { original_size } => {
                out.push(FLAG_COMPRESSED);
                out.extend_from_slice(&original_size.to_be_bytes());
            }
        }
    }

    /// Split a flagged block into its header and the data that follows.
    pub fn decode(block: &[u8]) -> Result<(Self, &[u8]), FrameError> {
        let (&flag, rest) = block.split_first().ok_or(FrameError::TruncatedHeader)?;
        match flag {
            FLAG_UNCOMPRESSED => Ok((Self::Uncompressed, rest)),
            FLAG_COMPRESSED => {
                if rest.len() < ORIGINAL_SIZE_FIELD {
                    return Err(FrameError::TruncatedHeader);
                }
                let (size, data) = rest.split_at(ORIGINAL_SIZE_FIELD);
                let original_size = u32::from_be_bytes([size[0], size[1], size[2], size[3]]);
                Ok((Self::Compressed { original_size }, data))
            }
            other => Err(FrameError::InvalidMarker(other)),
        }
    }
}

/// Result of decoding one frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    KeepAlive,
    Payload { data: Vec<u8>, envelope: Envelope },
}

/// Cipher and compressor pair applied to every frame on a connection.
#[derive(Clone)]
pub struct FrameCodec {
    cipher: Arc<dyn Cipher>,
    compressor: Arc<dyn Compressor>,
}

impl FrameCodec {
    pub fn new(cipher: impl Cipher + 'static, compressor: impl Compressor + 'static) -> Self {
        Self {
            cipher: Arc::new(cipher),
            compressor: Arc::new(compressor),
        }
    }

    /// AES-256-CBC and bzip2, the pair used on the wire.
    pub fn with_key(key: SecretKey) -> Self {
        Self::new(Aes256CbcCipher::new(key), Bzip2Compressor::default())
    }

    /// Encode `payload` into a complete frame, length prefix included.
    pub fn encode(&self, payload: &[u8], envelope: Envelope) -> Result<Vec<u8>, FrameError> {
        // Receivers refuse to inflate past the frame limit, however well the
        // payload compresses.
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let body = match envelope {
            Envelope::Legacy => {
                let ciphertext = self.cipher.encrypt(payload)?;
                self.flag_and_compress(&ciphertext)
            }
            Envelope::Upgraded => {
                let block = self.flag_and_compress(payload);
                let ciphertext = self.cipher.encrypt(&block)?;
                let mut body = Vec::with_capacity(1 + ciphertext.len());
                body.push(UPGRADED_MARKER);
                body.extend_from_slice(&ciphertext);
                body
            }
        };

        if body.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: body.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        tracing::trace!(
            payload_len = payload.len(),
            body_len = body.len(),
            ?envelope,
            marker = body[0],
            "encoded frame"
        );

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a frame body (the bytes after the length prefix).
    pub fn decode_body(&self, body: &[u8]) -> Result<DecodedFrame, FrameError> {
        let (&marker, rest) = body.split_first().ok_or(FrameError::Empty)?;
        match marker {
            KEEPALIVE_MARKER => Ok(DecodedFrame::KeepAlive),
            UPGRADED_MARKER => {
                let block = self.cipher.decrypt(rest)?;
                let data = self.unflag_and_decompress(&block)?;
                Ok(DecodedFrame::Payload {
                    data,
                    envelope: Envelope::Upgraded,
                })
            }
            FLAG_UNCOMPRESSED | FLAG_COMPRESSED => {
                let ciphertext = self.unflag_and_decompress(body)?;
                let data = self.cipher.decrypt(&ciphertext)?;
                Ok(DecodedFrame::Payload {
                    data,
                    envelope: Envelope::Legacy,
                })
            }
            other => Err(FrameError::InvalidMarker(other)),
        }
    }

    fn flag_and_compress(&self, data: &[u8]) -> Vec<u8> {
        let (header, content) = match self.compressor.compress(data) {
            Some(compressed) => (
                CompressionHeader::Compressed {
                    original_size: data.len() as u32,
                },
                compressed,
            ),
            None => (CompressionHeader::Uncompressed, data.to_vec()),
        };

        let mut block = Vec::with_capacity(header.encoded_len() + content.len());
        header.encode_into(&mut block);
        block.extend_from_slice(&content);
        block
    }

    fn unflag_and_decompress(&self, block: &[u8]) -> Result<Vec<u8>, FrameError> {
        match CompressionHeader::decode(block)? {
            (CompressionHeader::Uncompressed, data) => Ok(data.to_vec()),
            (CompressionHeader::Compressed { original_size }, data) => {
                let original_size = original_size as usize;
                if original_size > MAX_FRAME_SIZE {
                    return Err(FrameError::TooLarge {
                        size: original_size,
                        max: MAX_FRAME_SIZE,
                    });
                }
                self.compressor.decompress(data, original_size)
            }
        }
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec").finish_non_exhaustive()
    }
}

/// The complete keep-alive frame: a one-byte body holding [`KEEPALIVE_MARKER`].
pub const KEEPALIVE_FRAME: [u8; LENGTH_PREFIX_SIZE + 1] = [0, 0, 0, 1, KEEPALIVE_MARKER];

/// Validate a length prefix and return the body size it announces.
pub fn parse_length_prefix(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(FrameError::Empty);
    }
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

#[cfg(test)]
pub(crate) mod test_support {
    use nodewire_crypto::{Cipher, CryptoError};

    /// Reversible XOR "cipher" that preserves compressibility, so the legacy
    /// compress-the-ciphertext branch can be exercised.
    pub struct XorCipher(pub u8);

    impl Cipher for XorCipher {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            self.encrypt(ciphertext)
        }
    }

    pub fn incompressible(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }
}
