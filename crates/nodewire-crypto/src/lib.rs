//! Symmetric cryptography for the nodewire transport.
//!
//! The transport treats encryption as a black box keyed by a fixed-length
//! secret. This crate provides that box: a [`Cipher`] trait, the AES-256-CBC
//! implementation used on the wire, PKCS7 padding, and [`SecretKey`] parsing.

pub mod cipher;
pub mod error;
pub mod key;
pub mod pkcs7;

pub use cipher::{Aes256CbcCipher, Cipher, FIXED_IV};
pub use error::CryptoError;
pub use key::{KEY_SIZE, SecretKey};
