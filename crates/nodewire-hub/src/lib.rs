//! Operator-side hub for nodewire agents.
//!
//! This crate loads the hub configuration, sets up logging and supervises a
//! [`nodewire_transport::Hub`] until shutdown.

pub mod config;
pub mod error;
pub mod logging;
pub mod supervisor;

pub use config::HubFileConfig;
pub use error::HubError;
pub use supervisor::{ShutdownHandle, Supervisor};
