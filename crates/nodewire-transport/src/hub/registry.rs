//! Id → primary node table owned by a hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::constants::AUTH_TIMEOUT;
use crate::error::NodeError;
use crate::node::{Node, NodeKind};

pub struct NodeRegistry {
    nodes: Mutex<HashMap<u32, Arc<Node>>>,
    next_id: AtomicU32,
}

impl NodeRegistry {
    pub fn new(first_id: u32) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(first_id),
        }
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<u32, Arc<Node>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the id for the next incoming connection. Every handshake
    /// consumes one, including those that turn out to be sub-channels.
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Track an authenticated primary node under its id. Returns the node
    /// previously registered under that id, if any.
    pub fn register(&self, node: Arc<Node>) -> Result<Option<Arc<Node>>, NodeError> {
        let id = node.id().ok_or(NodeError::NotAuthenticated)?;
        if node.kind() != Some(NodeKind::Primary) {
            return Err(NodeError::InvalidRequest(
                "only primary nodes are registered".into(),
            ));
        }
        Ok(self.nodes().insert(id, node))
    }

    pub fn get(&self, id: u32) -> Option<Arc<Node>> {
        self.nodes().get(&id).cloned()
    }

    pub fn remove(&self, id: u32) -> Option<Arc<Node>> {
        self.nodes().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.nodes().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Disconnect every registered node, its auxiliary sub-channels through
    /// the cascade, and its liveness channel.
    pub async fn disconnect_all(&self) {
        let nodes: Vec<Arc<Node>> = self.nodes().drain().map(|(_, node)| node).collect();
        for node in nodes {
            // The cascade leaves liveness channels to their monitor, which
            // may already be gone.
            let liveness: Vec<Arc<Node>> = node
                .children()
                .into_iter()
                .filter(|child| child.kind() == Some(NodeKind::Liveness))
                .collect();
            node.disconnect().await;
            for channel in liveness {
                channel.disconnect().await;
            }
        }
    }

    /// Route an authenticated sub-channel connection to the primary that
    /// requested it. The candidate's first payload is the correlation byte.
    /// Unmatched candidates are disconnected.
    pub async fn accept_sub_channel(&self, candidate: Arc<Node>) -> Result<Arc<Node>, NodeError> {
        match self.match_sub_channel(&candidate).await {
            Ok(parent) => Ok(parent),
            Err(e) => {
                warn!(
                    node_id = ?candidate.id(),
                    kind = ?candidate.kind(),
                    error = %e,
                    "rejecting sub-channel connection"
                );
                candidate.disconnect().await;
                Err(e)
            }
        }
    }

    async fn match_sub_channel(&self, candidate: &Arc<Node>) -> Result<Arc<Node>, NodeError> {
        let id = candidate.id().ok_or(NodeError::NotAuthenticated)?;
        match candidate.kind() {
            Some(NodeKind::Liveness | NodeKind::Auxiliary) => {}
            Some(NodeKind::Primary) => {
                return Err(NodeError::InvalidRequest(
                    "primary node offered as sub-channel".into(),
                ));
            }
            None => return Err(NodeError::NotAuthenticated),
        }

        let previous = candidate.receive_timeout();
        candidate.set_receive_timeout(Some(AUTH_TIMEOUT));
        let first = candidate.receive().await?;
        candidate.set_receive_timeout(previous);

        let &[correlation] = first.as_slice() else {
            return Err(NodeError::InvalidRequest(format!(
                "expected 1-byte correlation id, got {} bytes",
                first.len()
            )));
        };

        let parent = self.get(id).ok_or(NodeError::ParentNotFound(id))?;
        parent.adopt_sub_channel(correlation, Arc::clone(candidate))?;
        debug!(node_id = id, kind = ?candidate.kind(), correlation, "sub-channel accepted");
        Ok(parent)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::node_pair;

    fn authenticated(id: u32, kind: NodeKind) -> (Arc<Node>, Arc<Node>) {
        let (hub, agent) = node_pair();
        hub.adopt_identity(id, kind).unwrap();
        agent.adopt_identity(id, kind).unwrap();
        (hub, agent)
    }

    #[test]
    fn ids_are_allocated_sequentially() {
        let registry = NodeRegistry::new(42);
        assert_eq!(registry.next_id(), 42);
        assert_eq!(registry.next_id(), 43);
    }

    #[tokio::test]
    async fn register_get_remove() {
        let registry = NodeRegistry::default();
        let (primary, _peer) = authenticated(3, NodeKind::Primary);

        assert!(registry.register(Arc::clone(&primary)).unwrap().is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec![3]);
        assert!(Arc::ptr_eq(&registry.get(3).unwrap(), &primary));

        assert!(registry.remove(3).is_some());
        assert!(registry.is_empty());
        assert!(registry.get(3).is_none());
    }

    #[tokio::test]
    async fn only_authenticated_primaries_register() {
        let registry = NodeRegistry::default();
        let (fresh, _a) = node_pair();
        assert!(matches!(
            registry.register(fresh),
            Err(NodeError::NotAuthenticated)
        ));
        let (aux, _b) = authenticated(1, NodeKind::Auxiliary);
        assert!(matches!(
            registry.register(aux),
            Err(NodeError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_all_empties_registry() {
        let registry = NodeRegistry::default();
        let mut nodes = Vec::new();
        for id in 1..=3 {
            let (primary, peer) = authenticated(id, NodeKind::Primary);
            registry.register(Arc::clone(&primary)).unwrap();
            nodes.push((primary, peer));
        }

        registry.disconnect_all().await;
        assert!(registry.is_empty());
        assert!(nodes.iter().all(|(primary, _)| primary.is_disposed()));
    }

    #[tokio::test]
    async fn disconnect_all_closes_liveness_channels() {
        let registry = NodeRegistry::default();
        let (primary, _peer) = authenticated(4, NodeKind::Primary);
        let (liveness, _liveness_peer) = authenticated(4, NodeKind::Liveness);
        let (aux, _aux_peer) = authenticated(4, NodeKind::Auxiliary);
        primary.attach_child(&liveness);
        primary.attach_child(&aux);
        registry.register(Arc::clone(&primary)).unwrap();

        registry.disconnect_all().await;
        assert!(primary.is_disposed());
        assert!(aux.is_disposed());
        assert!(liveness.is_disposed());
    }

    #[tokio::test]
    async fn sub_channel_without_parent_is_disconnected() {
        let registry = NodeRegistry::default();
        let (candidate, peer) = authenticated(9, NodeKind::Auxiliary);
        peer.send(&[17]).await.unwrap();

        let result = registry.accept_sub_channel(Arc::clone(&candidate)).await;
        assert!(matches!(result, Err(NodeError::ParentNotFound(9))));
        assert!(candidate.is_disposed());
    }

    #[tokio::test]
    async fn sub_channel_with_unknown_correlation_is_disconnected() {
        let registry = NodeRegistry::default();
        let (primary, _p) = authenticated(9, NodeKind::Primary);
        registry.register(Arc::clone(&primary)).unwrap();

        let (candidate, peer) = authenticated(9, NodeKind::Auxiliary);
        peer.send(&[17]).await.unwrap();

        let result = registry.accept_sub_channel(Arc::clone(&candidate)).await;
        assert!(matches!(result, Err(NodeError::UnknownCorrelation(17))));
        assert!(candidate.is_disposed());
        assert!(primary.children().is_empty());
    }

    #[tokio::test]
    async fn malformed_correlation_is_rejected() {
        let registry = NodeRegistry::default();
        let (candidate, peer) = authenticated(9, NodeKind::Liveness);
        peer.send(&[1, 2]).await.unwrap();

        let result = registry.accept_sub_channel(Arc::clone(&candidate)).await;
        assert!(matches!(result, Err(NodeError::InvalidRequest(_))));
        assert!(candidate.is_disposed());
    }

    #[tokio::test]
    async fn pending_request_is_resolved_by_matching_candidate() {
        let registry = NodeRegistry::default();
        let (primary, agent) = authenticated(5, NodeKind::Primary);
        registry.register(Arc::clone(&primary)).unwrap();

        let create = {
            let primary = Arc::clone(&primary);
            tokio::spawn(async move { primary.create_sub_channel(NodeKind::Auxiliary).await })
        };
        let request = crate::node::CreateRequest::parse(&agent.receive().await.unwrap()).unwrap();
        agent.send(&[crate::constants::CREATE_ACK]).await.unwrap();

        let (candidate, peer) = authenticated(5, NodeKind::Auxiliary);
        peer.send(&[request.correlation]).await.unwrap();
        let parent = registry.accept_sub_channel(Arc::clone(&candidate)).await.unwrap();
        assert!(Arc::ptr_eq(&parent, &primary));
        assert_eq!(candidate.receive_timeout(), None);

        let created = create.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&created, &candidate));
        assert!(Arc::ptr_eq(&created.parent().unwrap(), &primary));
    }
}
