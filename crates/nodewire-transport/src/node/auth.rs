//! Challenge/response authentication run once per physical connection.
//!
//! ```text
//!   hub                                  agent
//!    │── challenge (100 random bytes) ──▶│
//!    │◀──────────── echo ────────────────│
//!    │── AUTH_MAGIC ────────────────────▶│
//!    │◀──────────── kind (i32) ──────────│
//!    │── id (u32) ──────────────────────▶│   kind == Primary
//!    │◀──────────── id (u32) ────────────│   otherwise (the primary's id)
//! ```
//!
//! Every step goes through the framer, so the exchange is encrypted with the
//! shared key: a peer holding the wrong key fails at the echo.

use rand::RngCore;
use tracing::{debug, info, warn};

use super::{Node, NodeKind};
use crate::constants::{AUTH_MAGIC, AUTH_TIMEOUT, CHALLENGE_SIZE};
use crate::error::NodeError;

fn auth_failure(reason: impl Into<String>) -> NodeError {
    NodeError::AuthenticationFailed(reason.into())
}

fn decode_i32(bytes: &[u8]) -> Result<i32, NodeError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| auth_failure(format!("expected 4-byte kind, got {} bytes", bytes.len())))?;
    Ok(i32::from_be_bytes(raw))
}

fn decode_u32(bytes: &[u8]) -> Result<u32, NodeError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| auth_failure(format!("expected 4-byte id, got {} bytes", bytes.len())))?;
    Ok(u32::from_be_bytes(raw))
}

impl Node {
    /// Hub side of the handshake.
    ///
    /// A primary peer is given `assigned_id`; any other kind reports the id
    /// of the primary it belongs to. The node is disconnected on failure.
    /// The whole exchange is bounded by [`AUTH_TIMEOUT`]; on success the
    /// node is left without a receive deadline.
    pub async fn authenticate(&self, assigned_id: u32) -> Result<(), NodeError> {
        self.set_receive_timeout(Some(AUTH_TIMEOUT));

        let outcome = tokio::time::timeout(AUTH_TIMEOUT, self.challenge_peer(assigned_id))
            .await
            .unwrap_or(Err(NodeError::Timeout));
        match outcome {
            Ok((id, kind)) => {
                self.set_receive_timeout(None);
                self.adopt_identity(id, kind)?;
                info!(node_id = id, %kind, peer = ?self.peer_addr(), "node authenticated");
                Ok(())
            }
            Err(e) => {
                warn!(peer = ?self.peer_addr(), error = %e, "authentication failed");
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn challenge_peer(&self, assigned_id: u32) -> Result<(u32, NodeKind), NodeError> {
        if self.is_authenticated() {
            return Err(auth_failure("node is already authenticated"));
        }

        let mut challenge = [0u8; CHALLENGE_SIZE];
        rand::thread_rng().fill_bytes(&mut challenge);
        self.send(&challenge).await?;

        let echo = self.receive().await?;
        if echo != challenge {
            return Err(auth_failure("challenge echo mismatch"));
        }
        debug!("challenge echoed");

        self.send(&AUTH_MAGIC).await?;

        let kind = NodeKind::try_from(decode_i32(&self.receive().await?)?)?;
        let id = match kind {
            NodeKind::Primary => {
                self.send(&assigned_id.to_be_bytes()).await?;
                assigned_id
            }
            NodeKind::Liveness | NodeKind::Auxiliary => decode_u32(&self.receive().await?)?,
        };
        Ok((id, kind))
    }

    /// Agent side of the handshake. Returns the id this node ends up with.
    ///
    /// `primary_id` is required for sub-channel kinds and ignored for
    /// [`NodeKind::Primary`], whose id is assigned by the hub.
    pub async fn respond_authentication(
        &self,
        kind: NodeKind,
        primary_id: Option<u32>,
    ) -> Result<u32, NodeError> {
        self.set_receive_timeout(Some(AUTH_TIMEOUT));

        let outcome = tokio::time::timeout(AUTH_TIMEOUT, self.answer_challenge(kind, primary_id))
            .await
            .unwrap_or(Err(NodeError::Timeout));
        match outcome {
            Ok(id) => {
                self.set_receive_timeout(None);
                self.adopt_identity(id, kind)?;
                debug!(node_id = id, %kind, "authenticated with hub");
                Ok(id)
            }
            Err(e) => {
                debug!(%kind, error = %e, "authentication with hub failed");
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn answer_challenge(
        &self,
        kind: NodeKind,
        primary_id: Option<u32>,
    ) -> Result<u32, NodeError> {
        let primary_id = match kind {
            NodeKind::Primary => None,
            NodeKind::Liveness | NodeKind::Auxiliary => Some(primary_id.ok_or_else(|| {
                NodeError::InvalidRequest(format!("{kind} node needs its primary's id"))
            })?),
        };

        let challenge = self.receive().await?;
        if challenge.len() != CHALLENGE_SIZE {
            return Err(auth_failure(format!(
                "expected {CHALLENGE_SIZE}-byte challenge, got {} bytes",
                challenge.len()
            )));
        }
        self.send(&challenge).await?;

        if self.receive().await? != AUTH_MAGIC {
            return Err(auth_failure("bad handshake magic"));
        }

        self.send(&kind.to_wire().to_be_bytes()).await?;

        match primary_id {
            None => decode_u32(&self.receive().await?),
            Some(id) => {
                self.send(&id.to_be_bytes()).await?;
                Ok(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use crate::envelope::KEEPALIVE_FRAME;
    use crate::error::FramerError;
    use crate::framer::{Framer, FramerOptions};
    use crate::testing::{node_pair, test_codec};

    #[tokio::test]
    async fn primary_adopts_assigned_id() {
        let (hub, agent) = node_pair();
        let (hub_result, agent_result) = tokio::join!(
            hub.authenticate(42),
            agent.respond_authentication(NodeKind::Primary, None)
        );
        hub_result.unwrap();
        assert_eq!(agent_result.unwrap(), 42);

        assert_eq!(hub.id(), Some(42));
        assert_eq!(hub.kind(), Some(NodeKind::Primary));
        assert_eq!(agent.id(), Some(42));
        assert_eq!(hub.receive_timeout(), None);
        assert_eq!(agent.receive_timeout(), None);
    }

    #[tokio::test]
    async fn sub_channel_kinds_adopt_peer_id() {
        for kind in [NodeKind::Liveness, NodeKind::Auxiliary] {
            let (hub, agent) = node_pair();
            let (hub_result, agent_result) = tokio::join!(
                hub.authenticate(99),
                agent.respond_authentication(kind, Some(7))
            );
            hub_result.unwrap();
            assert_eq!(agent_result.unwrap(), 7);
            assert_eq!(hub.id(), Some(7));
            assert_eq!(hub.kind(), Some(kind));
        }
    }

    #[tokio::test]
    async fn mismatched_echo_fails_and_disconnects() {
        let (hub, agent) = node_pair();
        let impostor = async {
            let challenge = agent.receive().await.unwrap();
            let mut wrong = challenge.clone();
            wrong[0] ^= 0xFF;
            agent.send(&wrong).await.unwrap();
        };

        let (result, ()) = tokio::join!(hub.authenticate(1), impostor);
        assert!(matches!(result, Err(NodeError::AuthenticationFailed(_))));
        assert!(hub.is_disposed());
        assert_eq!(hub.id(), None);
    }

    #[tokio::test]
    async fn unknown_kind_fails() {
        let (hub, agent) = node_pair();
        let peer = async {
            let challenge = agent.receive().await.unwrap();
            agent.send(&challenge).await.unwrap();
            assert_eq!(agent.receive().await.unwrap(), AUTH_MAGIC);
            agent.send(&5i32.to_be_bytes()).await.unwrap();
        };

        let (result, ()) = tokio::join!(hub.authenticate(1), peer);
        assert!(matches!(result, Err(NodeError::InvalidKind(5))));
        assert!(hub.is_disposed());
    }

    #[tokio::test]
    async fn agent_rejects_bad_magic() {
        let (hub, agent) = node_pair();
        let fake_hub = async {
            hub.send(&[0xAB; CHALLENGE_SIZE]).await.unwrap();
            assert_eq!(hub.receive().await.unwrap(), vec![0xAB; CHALLENGE_SIZE]);
            hub.send(b"NOTNWIR").await.unwrap();
        };

        let (result, ()) = tokio::join!(
            agent.respond_authentication(NodeKind::Primary, None),
            fake_hub
        );
        assert!(matches!(result, Err(NodeError::AuthenticationFailed(_))));
        assert!(agent.is_disposed());
    }

    #[tokio::test]
    async fn sub_channel_without_primary_id_is_rejected_locally() {
        let (_hub, agent) = node_pair();
        let result = agent.respond_authentication(NodeKind::Auxiliary, None).await;
        assert!(matches!(result, Err(NodeError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (hub, _agent) = node_pair();
        let started = tokio::time::Instant::now();
        let result = hub.authenticate(1).await;
        assert!(matches!(
            result,
            Err(NodeError::Timeout | NodeError::Framer(FramerError::Timeout))
        ));
        assert!(started.elapsed() >= AUTH_TIMEOUT);
        assert!(started.elapsed() < AUTH_TIMEOUT + Duration::from_secs(1));
        assert!(hub.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalives_do_not_stretch_handshake() {
        let (stream, mut raw) = tokio::io::duplex(1 << 16);
        let hub = Node::from_stream(stream, test_codec(), FramerOptions::default());

        let chatter = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(9)).await;
                if raw.write_all(&KEEPALIVE_FRAME).await.is_err() {
                    break;
                }
            }
        });

        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(90), hub.authenticate(1)).await;
        assert!(result.is_ok_and(|r| r.is_err()), "handshake outlived its bound");
        assert!(started.elapsed() < AUTH_TIMEOUT + Duration::from_secs(1));
        assert!(hub.is_disposed());
        chatter.abort();
    }

    #[tokio::test]
    async fn success_clears_configured_deadline() {
        let options = FramerOptions {
            receive_timeout: Some(Duration::from_secs(30)),
            ..FramerOptions::default()
        };
        let (a, b) = tokio::io::duplex(1 << 16);
        let hub = Node::new(Framer::new(a, test_codec(), options.clone()));
        let agent = Node::new(Framer::new(b, test_codec(), options));

        let (hub_result, agent_result) = tokio::join!(
            hub.authenticate(5),
            agent.respond_authentication(NodeKind::Primary, None)
        );
        hub_result.unwrap();
        agent_result.unwrap();
        assert_eq!(hub.receive_timeout(), None);
        assert_eq!(agent.receive_timeout(), None);
    }

    #[tokio::test]
    async fn second_authentication_is_refused() {
        let (hub, agent) = node_pair();
        let (first, _) = tokio::join!(
            hub.authenticate(3),
            agent.respond_authentication(NodeKind::Primary, None)
        );
        first.unwrap();

        let again = hub.authenticate(4).await;
        assert!(matches!(again, Err(NodeError::AuthenticationFailed(_))));
        assert_eq!(hub.id(), Some(3));
    }
}
