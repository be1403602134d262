//! Attacker-controlled nodes and the registry that indexes them.

use crate::{AttackError, AttackResult, BlockHeight, NodeId, NodeIndex, ATTACKER_NODE_COUNT};
use async_trait::async_trait;
use std::sync::Arc;

/// Handle to one attacker-controlled node
#[async_trait]
pub trait AttackerNode: Send + Sync {
    /// Network identity of the node.
    fn identity(&self) -> NodeId;

    /// Human readable alias.
    fn alias(&self) -> &str;

    /// Current chain height as seen by this node.
    async fn block_height(&self) -> AttackResult<BlockHeight>;

    /// Identities of the peers this node is connected to.
    async fn connected_peers(&self) -> AttackResult<Vec<NodeId>>;
}

/// Fixed, read-only set of attacker nodes, constructed once per process
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: Vec<Arc<dyn AttackerNode>>,
}

impl NodeRegistry {
    /// Build the registry; the harness needs exactly [`ATTACKER_NODE_COUNT`] nodes.
    pub fn new(nodes: Vec<Arc<dyn AttackerNode>>) -> AttackResult<Self> {
        if nodes.len() != ATTACKER_NODE_COUNT {
            return Err(AttackError::InvalidConfig(format!(
                "expected {ATTACKER_NODE_COUNT} attacker nodes, got {}",
                nodes.len()
            )));
        }

        Ok(Self { nodes })
    }

    /// The node at `index`.
    pub fn get(&self, index: NodeIndex) -> AttackResult<&Arc<dyn AttackerNode>> {
        self.nodes.get(index).ok_or(AttackError::UnknownNode(index))
    }

    /// Identity of the node at `index`.
    pub fn identity(&self, index: NodeIndex) -> AttackResult<NodeId> {
        Ok(self.get(index)?.identity())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|n| (n.alias().to_string(), n.identity())))
            .finish()
    }
}
