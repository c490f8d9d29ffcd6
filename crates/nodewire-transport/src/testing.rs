//! Fixtures shared by unit and integration tests.
//!
//! Everything here runs over in-memory `tokio::io::duplex` pipes except
//! [`loopback_hub_config`], which binds a real listener on `127.0.0.1:0`.
//!
//! ```rust,ignore
//! use nodewire_transport::testing;
//!
//! let (hub, agent) = testing::node_pair();
//! hub.send(b"hello").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use nodewire_crypto::SecretKey;

use crate::envelope::FrameCodec;
use crate::framer::{Framer, FramerOptions};
use crate::hub::HubConfig;
use crate::node::Node;

/// Duplex buffer large enough for a 1 MiB frame plus keep-alives.
const PIPE_CAPACITY: usize = 4 * 1024 * 1024;

/// Fixed key shared by both ends of every fixture.
pub fn test_key() -> SecretKey {
    SecretKey::new([0x42; 32])
}

pub fn test_codec() -> FrameCodec {
    FrameCodec::with_key(test_key())
}

/// Two framers joined by an in-memory pipe.
pub fn framer_pair(options: FramerOptions) -> (Framer, Framer) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    (
        Framer::new(a, test_codec(), options.clone()),
        Framer::new(b, test_codec(), options),
    )
}

/// Two unauthenticated nodes joined by an in-memory pipe. The first is
/// conventionally the hub end.
pub fn node_pair() -> (Arc<Node>, Arc<Node>) {
    let (hub, agent) = framer_pair(FramerOptions::default());
    (Node::new(hub), Node::new(agent))
}

/// Hub settings for tests: ephemeral loopback port and the test key.
pub fn loopback_hub_config() -> HubConfig {
    HubConfig::new("127.0.0.1:0", test_key())
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Install a test-writer subscriber once per process. Filter via `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
