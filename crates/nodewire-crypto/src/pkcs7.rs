//! PKCS7 padding for the 16-byte AES block.

use crate::CryptoError;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Pad `data` up to the next multiple of [`BLOCK_SIZE`].
///
/// Input that is already block-aligned gains a full block of padding, so the
/// result is always strictly longer than the input.
#[must_use]
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);

    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.resize(data.len() + pad_len, pad_len as u8);
    out
}

/// Strip PKCS7 padding, returning the content slice.
///
/// Fails with [`CryptoError::InvalidPadding`] when the input is empty, the pad
/// byte is zero or larger than a block, or any pad byte disagrees.
pub fn unpad(data: &[u8]) -> Result<&[u8], CryptoError> {
    let Some(&pad_byte) = data.last() else {
        return Err(CryptoError::InvalidPadding);
    };
    let pad_len = pad_byte as usize;

    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > data.len() {
        return Err(CryptoError::InvalidPadding);
    }

    let content_len = data.len() - pad_len;
    if data[content_len..].iter().any(|&b| b != pad_byte) {
        return Err(CryptoError::InvalidPadding);
    }

    Ok(&data[..content_len])
}
