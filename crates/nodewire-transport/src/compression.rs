//! The compressor collaborator used by the frame codec.
//!
//! Compression is opportunistic: [`Compressor::compress`] only returns output
//! when it is strictly smaller than the input, and the codec keeps the
//! original bytes otherwise.

use std::io::Read;

use bzip2::Compression;
use bzip2::read::{BzDecoder, BzEncoder};

use crate::error::FrameError;

/// A byte-array compressor with a known expansion/contraction contract.
pub trait Compressor: Send + Sync {
    /// Compressed bytes, or `None` when compression would not shrink `data`.
    fn compress(&self, data: &[u8]) -> Option<Vec<u8>>;

    /// Inflate `data`, which must expand to exactly `original_size` bytes.
    fn decompress(&self, data: &[u8], original_size: usize) -> Result<Vec<u8>, FrameError>;
}

/// bzip2 at a configurable block level (default: `Compression::default()`).
#[derive(Debug, Clone, Copy)]
pub struct Bzip2Compressor {
    level: Compression,
}

impl Bzip2Compressor {
    pub fn new(level: Compression) -> Self {
        Self { level }
    }
}

impl Default for Bzip2Compressor {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl Compressor for Bzip2Compressor {
    fn compress(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.is_empty() {
            return None;
        }

        let mut encoder = BzEncoder::new(data, self.level);
        let mut compressed = Vec::new();
        if let Err(e) = encoder.read_to_end(&mut compressed) {
            tracing::debug!(error = %e, "bzip2 compression failed, sending uncompressed");
            return None;
        }

        tracing::trace!(
            original = data.len(),
            compressed = compressed.len(),
            "bzip2 compression attempt"
        );

        (compressed.len() < data.len()).then_some(compressed)
    }

    fn decompress(&self, data: &[u8], original_size: usize) -> Result<Vec<u8>, FrameError> {
        // One byte of slack so an over-long stream is detected rather than truncated.
        let mut decoder = BzDecoder::new(data).take(original_size as u64 + 1);
        let mut out = Vec::with_capacity(original_size);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| FrameError::Decompression(e.to_string()))?;

        if out.len() != original_size {
            return Err(FrameError::LengthMismatch {
                expected: original_size,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}
