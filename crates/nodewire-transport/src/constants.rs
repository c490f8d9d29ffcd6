//! Wire constants shared by both ends of a connection.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Size of the big-endian body length that prefixes every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest body a peer may announce before the frame is rejected.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Legacy body flag: data is not compressed.
pub const FLAG_UNCOMPRESSED: u8 = 0x00;

/// Legacy body flag: data is compressed and preceded by its original length.
pub const FLAG_COMPRESSED: u8 = 0x01;

/// First body byte of a compress-then-encrypt frame.
pub const UPGRADED_MARKER: u8 = 0x02;

/// First (and only) body byte of a keep-alive frame.
pub const KEEPALIVE_MARKER: u8 = 0xFF;

/// Size of the original-length field that follows [`FLAG_COMPRESSED`].
pub const ORIGINAL_SIZE_FIELD: usize = 4;

/// Cadence of keep-alive frames sent while a deadline-bound read is waiting.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Length of the random challenge the hub sends to a fresh connection.
pub const CHALLENGE_SIZE: usize = 100;

/// Acknowledgement sent by the hub after a correct challenge echo.
pub const AUTH_MAGIC: [u8; 7] = *b"NWIRE\x01\x00";

/// Receive deadline applied to every step of the handshake.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Sub-channels
// ---------------------------------------------------------------------------

/// First byte of a `[opcode, kind, correlation]` create request.
pub const CREATE_REQUEST_OPCODE: u8 = 0x00;

/// Acknowledgement byte for an accepted create request.
pub const CREATE_ACK: u8 = 0x01;

/// Acknowledgement byte for a refused create request.
pub const CREATE_NACK: u8 = 0x00;

/// Interval of the documented sub-channel wait contract.
pub const SUBCHANNEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of intervals a create request waits for its accept.
pub const SUBCHANNEL_WAIT_ATTEMPTS: u32 = 10;

/// Default timeout for outbound TCP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Hub → agent ping.
pub const PING: u8 = 0x00;

/// Agent → hub reply to [`PING`].
pub const PONG: u8 = 0x01;

/// Agent → hub reply carrying a UTF-8 error message instead of [`PONG`].
pub const REMOTE_ERROR: u8 = 0x03;

/// Receive deadline on a liveness node.
pub const LIVENESS_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between a pong and the next ping.
pub const LIVENESS_PING_INTERVAL: Duration = Duration::from_secs(1);
