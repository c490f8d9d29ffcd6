//! Sub-channel negotiation over a primary node's control stream.
//!
//! The requester sends a [`CreateRequest`] and reads a one-byte
//! acknowledgement. The peer then dials a fresh connection, authenticates it
//! with the primary's id and sends the correlation byte as its first payload;
//! the accept layer matches that byte back to the waiting request through
//! [`Node::adopt_sub_channel`].

use std::sync::Arc;

use tracing::{debug, warn};

use super::{Node, NodeKind};
use crate::constants::{
    CREATE_ACK, CREATE_REQUEST_OPCODE, SUBCHANNEL_POLL_INTERVAL, SUBCHANNEL_WAIT_ATTEMPTS,
};
use crate::error::NodeError;

/// `[0x00, kind, correlation]` sent on a primary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateRequest {
    pub kind: NodeKind,
    pub correlation: u8,
}

impl CreateRequest {
    pub const LEN: usize = 3;

    pub fn encode(&self) -> [u8; Self::LEN] {
        // Kinds are 0..=2, so the low byte carries the whole value.
        [
            CREATE_REQUEST_OPCODE,
            self.kind.to_wire() as u8,
            self.correlation,
        ]
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, NodeError> {
        let [opcode, kind, correlation] = bytes else {
            return Err(NodeError::InvalidRequest(format!(
                "expected {}-byte create request, got {} bytes",
                Self::LEN,
                bytes.len()
            )));
        };
        if *opcode != CREATE_REQUEST_OPCODE {
            return Err(NodeError::InvalidRequest(format!(
                "unknown opcode {opcode:#04x}"
            )));
        }

        let kind = NodeKind::try_from(i32::from(*kind))?;
        if kind == NodeKind::Primary {
            return Err(NodeError::InvalidRequest(
                "a primary node cannot be requested as a sub-channel".into(),
            ));
        }
        if *correlation == 0 {
            return Err(NodeError::InvalidRequest("correlation id 0 is reserved".into()));
        }

        Ok(Self {
            kind,
            correlation: *correlation,
        })
    }
}

impl Node {
    /// Ask the peer to open a sub-channel of `kind` and wait for it to be
    /// accepted. Only valid on an authenticated primary node.
    pub async fn create_sub_channel(&self, kind: NodeKind) -> Result<Arc<Node>, NodeError> {
        if kind == NodeKind::Primary {
            return Err(NodeError::InvalidRequest(
                "sub-channels must be liveness or auxiliary".into(),
            ));
        }
        match self.kind() {
            Some(NodeKind::Primary) => {}
            Some(other) => {
                return Err(NodeError::InvalidRequest(format!(
                    "cannot create sub-channels on a {other} node"
                )));
            }
            None => return Err(NodeError::NotAuthenticated),
        }
        if self.is_disposed() {
            return Err(NodeError::Disposed);
        }

        let (correlation, accepted) = self.pending.reserve()?;
        debug!(node_id = ?self.id(), %kind, correlation, "requesting sub-channel");

        let outcome = self.negotiate(kind, correlation, accepted).await;
        if outcome.is_err() {
            self.pending.abandon(correlation);
        }
        outcome
    }

    async fn negotiate(
        &self,
        kind: NodeKind,
        correlation: u8,
        accepted: tokio::sync::oneshot::Receiver<Arc<Node>>,
    ) -> Result<Arc<Node>, NodeError> {
        self.send(&CreateRequest { kind, correlation }.encode())
            .await?;

        let ack = self.receive().await?;
        if ack != [CREATE_ACK] {
            debug!(node_id = ?self.id(), correlation, ?ack, "sub-channel request rejected");
            return Err(NodeError::SubChannelRejected);
        }

        let bound = SUBCHANNEL_POLL_INTERVAL * SUBCHANNEL_WAIT_ATTEMPTS;
        match tokio::time::timeout(bound, accepted).await {
            Ok(Ok(child)) => {
                debug!(node_id = ?self.id(), %kind, correlation, "sub-channel established");
                Ok(child)
            }
            // The table was cleared by disconnect.
            Ok(Err(_)) => Err(NodeError::Disposed),
            Err(_) => {
                warn!(node_id = ?self.id(), %kind, correlation, "sub-channel was never accepted");
                Err(NodeError::Timeout)
            }
        }
    }

    /// Link `child` under this node and hand it to the request waiting on
    /// `correlation`. The parent pointer is set before the waiter wakes.
    pub(crate) fn adopt_sub_channel(
        self: &Arc<Self>,
        correlation: u8,
        child: Arc<Node>,
    ) -> Result<(), NodeError> {
        if !self.pending.contains(correlation) {
            return Err(NodeError::UnknownCorrelation(correlation));
        }

        self.attach_child(&child);
        if let Err(child) = self.pending.resolve(correlation, child) {
            // The waiter gave up between the check and the resolve.
            self.detach_child(&child);
            return Err(NodeError::UnknownCorrelation(correlation));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CREATE_NACK;
    use crate::testing::{node_pair, wait_for};
    use std::time::Duration;

    fn authenticated_pair(id: u32, kind: NodeKind) -> (Arc<Node>, Arc<Node>) {
        let (hub, agent) = node_pair();
        hub.adopt_identity(id, kind).unwrap();
        agent.adopt_identity(id, kind).unwrap();
        (hub, agent)
    }

    /// Reads one create request on the agent side and answers it.
    async fn answer_request(agent: &Node, ack: u8) -> CreateRequest {
        let request = CreateRequest::parse(&agent.receive().await.unwrap()).unwrap();
        agent.send(&[ack]).await.unwrap();
        request
    }

    #[test]
    fn create_request_encoding() {
        let request = CreateRequest {
            kind: NodeKind::Auxiliary,
            correlation: 17,
        };
        assert_eq!(request.encode(), [0x00, 0x02, 17]);
        assert_eq!(CreateRequest::parse(&request.encode()).unwrap(), request);
    }

    #[test]
    fn create_request_rejects_malformed_input() {
        for bytes in [
            &[][..],
            &[0x00, 0x02][..],
            &[0x01, 0x02, 5][..],
            &[0x00, 0x00, 5][..],
            &[0x00, 0x07, 5][..],
            &[0x00, 0x01, 0][..],
            &[0x00, 0x01, 5, 9][..],
        ] {
            assert!(CreateRequest::parse(bytes).is_err(), "accepted {bytes:?}");
        }
    }

    #[tokio::test]
    async fn accepted_sub_channel_links_to_parent() {
        let (primary, agent) = authenticated_pair(42, NodeKind::Primary);
        let (child, _child_peer) = authenticated_pair(42, NodeKind::Auxiliary);

        let create = {
            let primary = Arc::clone(&primary);
            tokio::spawn(async move { primary.create_sub_channel(NodeKind::Auxiliary).await })
        };
        let request = answer_request(&agent, CREATE_ACK).await;
        assert_eq!(request.kind, NodeKind::Auxiliary);
        assert_eq!(primary.pending_correlations(), vec![request.correlation]);

        primary
            .adopt_sub_channel(request.correlation, Arc::clone(&child))
            .unwrap();

        let created = create.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&created, &child));
        assert!(Arc::ptr_eq(&created.parent().unwrap(), &primary));
        assert_eq!(primary.children().len(), 1);
        assert!(primary.pending_correlations().is_empty());
    }

    #[tokio::test]
    async fn concurrent_creates_resolve_independently() {
        let (primary, agent) = authenticated_pair(5, NodeKind::Primary);

        let creates: Vec<_> = (0..2)
            .map(|_| {
                let primary = Arc::clone(&primary);
                tokio::spawn(async move { primary.create_sub_channel(NodeKind::Auxiliary).await })
            })
            .collect();

        let first = answer_request(&agent, CREATE_ACK).await;
        let second = answer_request(&agent, CREATE_ACK).await;
        assert_ne!(first.correlation, second.correlation);

        // Accept in reverse order.
        let (second_child, _p2) = authenticated_pair(5, NodeKind::Auxiliary);
        let (first_child, _p1) = authenticated_pair(5, NodeKind::Auxiliary);
        primary
            .adopt_sub_channel(second.correlation, Arc::clone(&second_child))
            .unwrap();
        primary
            .adopt_sub_channel(first.correlation, Arc::clone(&first_child))
            .unwrap();

        let mut created = Vec::new();
        for create in creates {
            created.push(create.await.unwrap().unwrap());
        }
        assert!(!Arc::ptr_eq(&created[0], &created[1]));
        for child in [&first_child, &second_child] {
            assert!(created.iter().any(|c| Arc::ptr_eq(c, child)));
        }
        assert_eq!(primary.children().len(), 2);
    }

    #[tokio::test]
    async fn nack_aborts_and_unregisters() {
        let (primary, agent) = authenticated_pair(1, NodeKind::Primary);
        let (result, _) = tokio::join!(
            primary.create_sub_channel(NodeKind::Auxiliary),
            answer_request(&agent, CREATE_NACK)
        );
        assert!(matches!(result, Err(NodeError::SubChannelRejected)));
        assert!(primary.pending_correlations().is_empty());
        assert!(!primary.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_accept_times_out() {
        let (primary, agent) = authenticated_pair(1, NodeKind::Primary);
        let started = tokio::time::Instant::now();
        let (result, _) = tokio::join!(
            primary.create_sub_channel(NodeKind::Liveness),
            answer_request(&agent, CREATE_ACK)
        );
        assert!(matches!(result, Err(NodeError::Timeout)));
        assert!(started.elapsed() >= SUBCHANNEL_POLL_INTERVAL * SUBCHANNEL_WAIT_ATTEMPTS);
        assert!(primary.pending_correlations().is_empty());
    }

    #[tokio::test]
    async fn disconnect_aborts_waiting_create() {
        let (primary, agent) = authenticated_pair(1, NodeKind::Primary);
        let create = {
            let primary = Arc::clone(&primary);
            tokio::spawn(async move { primary.create_sub_channel(NodeKind::Auxiliary).await })
        };
        CreateRequest::parse(&agent.receive().await.unwrap()).unwrap();

        // Acknowledge only once the creator is parked on the ack, then wait
        // for it to consume the ack and move on to the accept wait.
        assert!(
            wait_for(Duration::from_secs(5), || primary.in_flight.available_permits() == 0).await
        );
        agent.send(&[CREATE_ACK]).await.unwrap();
        assert!(
            wait_for(Duration::from_secs(5), || primary.in_flight.available_permits() == 1).await
        );
        assert_eq!(primary.pending_correlations().len(), 1);

        primary.disconnect().await;
        assert!(matches!(create.await.unwrap(), Err(NodeError::Disposed)));
    }

    #[tokio::test]
    async fn adopting_unknown_correlation_fails() {
        let (primary, _agent) = authenticated_pair(1, NodeKind::Primary);
        let (child, _peer) = authenticated_pair(1, NodeKind::Auxiliary);
        assert!(matches!(
            primary.adopt_sub_channel(77, Arc::clone(&child)),
            Err(NodeError::UnknownCorrelation(77))
        ));
        assert!(primary.children().is_empty());
        assert!(child.parent().is_none());
    }

    #[tokio::test]
    async fn only_primary_nodes_create_sub_channels() {
        let (primary, _a) = authenticated_pair(1, NodeKind::Primary);
        assert!(matches!(
            primary.create_sub_channel(NodeKind::Primary).await,
            Err(NodeError::InvalidRequest(_))
        ));

        let (aux, _b) = authenticated_pair(1, NodeKind::Auxiliary);
        assert!(matches!(
            aux.create_sub_channel(NodeKind::Auxiliary).await,
            Err(NodeError::InvalidRequest(_))
        ));

        let (fresh, _c) = node_pair();
        assert!(matches!(
            fresh.create_sub_channel(NodeKind::Auxiliary).await,
            Err(NodeError::NotAuthenticated)
        ));
    }
}
