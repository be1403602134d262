//! # Attacker Topology
//!
//! Channel management sits outside the attack engine. This module defines the
//! contract the engine needs from it, plus the two setup steps built on top:
//! locating the target's channel with its peer, and surrounding it with the
//! attacker's own channels.
//!
//! ```text
//!        node 0
//!          |
//!       target --- peer === node 2
//!          |
//!        node 1
//! ```
//!
//! `==` is two channels; node 2 jams general slots over one and protected slots
//! over the other.

use crate::{
    AttackError, AttackResult, NodeId, NodeIndex, PhaseExt, ShortChannelId, ATTACKER_NODE_COUNT,
    REPUTATION_NODE, SINK_NODE, SOURCE_NODE,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Funding outpoint of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelPoint {
    /// Funding transaction id, in display byte order
    pub txid: [u8; 32],
    /// Funding output index
    pub output_index: u32,
}

impl fmt::Display for ChannelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.output_index)
    }
}

/// A channel as announced in the network graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEdge {
    pub channel_id: ShortChannelId,
    pub channel_point: ChannelPoint,
    pub node1: NodeId,
    pub node2: NodeId,
    pub capacity_sat: u64,
}

impl ChannelEdge {
    /// Whether this channel joins `a` and `b`, in either direction.
    pub fn connects(&self, a: &NodeId, b: &NodeId) -> bool {
        (self.node1 == *a && self.node2 == *b) || (self.node1 == *b && self.node2 == *a)
    }
}

/// A node as seen in the network graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub pubkey: NodeId,
    pub alias: String,
    /// Public network addresses
    pub addresses: Vec<String>,
    /// Channels, when requested
    pub channels: Vec<ChannelEdge>,
}

/// Parameters for opening one channel from an attacker node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannelRequest {
    /// Funding attacker node
    pub source: NodeIndex,
    /// Remote node
    pub dest: NodeId,
    /// Address to connect to; looked up in the graph when absent
    pub host: Option<String>,
    pub capacity_sat: u64,
    /// Amount pushed to the remote side on open
    pub push_sat: u64,
    pub private: bool,
}

impl OpenChannelRequest {
    /// A public channel of `capacity_sat` with half pushed to the remote side.
    pub fn balanced(source: NodeIndex, dest: NodeId, capacity_sat: u64) -> Self {
        Self {
            source,
            dest,
            host: None,
            capacity_sat,
            push_sat: capacity_sat / 2,
            private: false,
        }
    }
}

/// Opens, closes and observes channels on behalf of the attacker nodes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopologyManager: Send + Sync {
    /// Open a channel and block until it is active.
    async fn open_channel(&self, request: OpenChannelRequest) -> AttackResult<ChannelPoint>;

    /// Wait until `channel`, owned by `channel_node`, is in `lookup_node`'s graph.
    async fn wait_for_channel(
        &self,
        lookup_node: NodeIndex,
        channel_node: NodeIndex,
        channel: ChannelPoint,
    ) -> AttackResult<()>;

    /// Short channel ids of every channel the node has.
    async fn list_channel_ids(&self, node: NodeIndex) -> AttackResult<Vec<ShortChannelId>>;

    /// Find a node in the graph by alias.
    async fn lookup_by_alias(&self, alias: &str) -> AttackResult<NodeInfo>;

    /// Look up a node from the point of view of attacker node `source`.
    async fn lookup_node(
        &self,
        source: NodeIndex,
        node: NodeId,
        include_channels: bool,
    ) -> AttackResult<NodeInfo>;

    /// Close every channel of the node, returning how many were closed.
    async fn close_all_channels(&self, node: NodeIndex, force: bool) -> AttackResult<usize>;
}

/// The node under attack, its peer, and the channel between them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsInfo {
    pub target: NodeId,
    pub peer: NodeId,
    pub channel: ChannelEdge,
}

/// Locate the target's peer by alias and the channel the two share.
pub async fn resolve_targets(
    topology: &dyn TopologyManager,
    peer_alias: &str,
    target: NodeId,
) -> AttackResult<TargetsInfo> {
    let peer = topology
        .lookup_by_alias(peer_alias)
        .await
        .in_phase(format!("look up peer {peer_alias}"))?;

    let target_info = topology
        .lookup_node(SOURCE_NODE, target, true)
        .await
        .in_phase("look up target")?;

    let channel = target_info
        .channels
        .into_iter()
        .find(|edge| edge.connects(&target, &peer.pubkey))
        .ok_or_else(|| {
            AttackError::Topology(format!(
                "could not find channel between: {target} and {}({peer_alias})",
                peer.pubkey
            ))
        })?;

    Ok(TargetsInfo {
        target,
        peer: peer.pubkey,
        channel,
    })
}

/// Open the attacker's channels around the target and wait for every other
/// attacker node to see them.
pub async fn open_attack_channels(
    topology: &dyn TopologyManager,
    info: &TargetsInfo,
    capacity_sat: u64,
) -> AttackResult<Vec<ChannelPoint>> {
    let plan = [
        (SOURCE_NODE, info.target, "node 0 -> target"),
        (REPUTATION_NODE, info.target, "node 1 -> target"),
        (SINK_NODE, info.peer, "node 2 -> target peer"),
        (SINK_NODE, info.peer, "node 2 -> target peer"),
    ];

    let mut opened = Vec::with_capacity(plan.len());
    for (source, dest, label) in plan {
        let point = topology
            .open_channel(OpenChannelRequest::balanced(source, dest, capacity_sat))
            .await
            .in_phase(label)?;

        info!("Opened channel {label}: {point}");
        opened.push((source, point));
    }

    info!("Waiting for channels to reflect in graphs");
    for (owner, point) in &opened {
        for lookup in (0..ATTACKER_NODE_COUNT).filter(|node| node != owner) {
            topology
                .wait_for_channel(lookup, *owner, *point)
                .await
                .in_phase(format!("channel {point} in node {lookup} graph"))?;
        }
    }

    Ok(opened.into_iter().map(|(_, point)| point).collect())
}

/// Close every channel of every attacker node.
pub async fn close_attack_channels(
    topology: &dyn TopologyManager,
    force: bool,
) -> AttackResult<usize> {
    let mut closed = 0;
    for node in 0..ATTACKER_NODE_COUNT {
        closed += topology
            .close_all_channels(node, force)
            .await
            .in_phase(format!("close channels of node {node}"))?;
    }

    info!("Closed {closed} attacker channels (force: {force})");
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::node_id;
    use mockall::predicate::eq;

    fn edge(scid: u64, node1: NodeId, node2: NodeId) -> ChannelEdge {
        ChannelEdge {
            channel_id: ShortChannelId(scid),
            channel_point: ChannelPoint {
                txid: [scid as u8; 32],
                output_index: 0,
            },
            node1,
            node2,
            capacity_sat: 1_000_000,
        }
    }

    fn node_info(id: NodeId, alias: &str, channels: Vec<ChannelEdge>) -> NodeInfo {
        NodeInfo {
            pubkey: id,
            alias: alias.to_string(),
            addresses: vec![],
            channels,
        }
    }

    #[tokio::test]
    async fn test_resolve_targets_either_direction() {
        let target = node_id(10);
        let peer = node_id(11);

        let mut topology = MockTopologyManager::new();
        topology
            .expect_lookup_by_alias()
            .withf(|alias| alias == "bob")
            .returning(move |_| Ok(node_info(peer, "bob", vec![])));
        topology
            .expect_lookup_node()
            .with(eq(SOURCE_NODE), eq(target), eq(true))
            .returning(move |_, _, _| {
                Ok(node_info(
                    target,
                    "alice",
                    vec![edge(1, target, node_id(12)), edge(2, peer, target)],
                ))
            });

        let info = resolve_targets(&topology, "bob", target).await.unwrap();
        assert_eq!(info.peer, peer);
        assert_eq!(info.channel.channel_id, ShortChannelId(2));
    }

    #[tokio::test]
    async fn test_resolve_targets_without_channel() {
        let target = node_id(10);
        let peer = node_id(11);

        let mut topology = MockTopologyManager::new();
        topology
            .expect_lookup_by_alias()
            .returning(move |_| Ok(node_info(peer, "bob", vec![])));
        topology
            .expect_lookup_node()
            .returning(move |_, _, _| Ok(node_info(target, "alice", vec![])));

        let err = resolve_targets(&topology, "bob", target).await.unwrap_err();
        assert!(matches!(err, AttackError::Topology(_)));
    }

    #[tokio::test]
    async fn test_open_attack_channels() {
        let target = node_id(10);
        let peer = node_id(11);
        let info = TargetsInfo {
            target,
            peer,
            channel: edge(1, target, peer),
        };

        let mut topology = MockTopologyManager::new();
        let mut next = 0u32;
        topology
            .expect_open_channel()
            .times(4)
            .withf(|req| req.push_sat == req.capacity_sat / 2 && !req.private)
            .returning(move |_| {
                next += 1;
                Ok(ChannelPoint {
                    txid: [0; 32],
                    output_index: next,
                })
            });
        // Each channel must show up in the two other attacker graphs.
        topology
            .expect_wait_for_channel()
            .times(8)
            .withf(|lookup, owner, _| lookup != owner)
            .returning(|_, _, _| Ok(()));

        let opened = open_attack_channels(&topology, &info, 16_777_215)
            .await
            .unwrap();
        assert_eq!(opened.len(), 4);
    }

    #[tokio::test]
    async fn test_open_failure_names_channel() {
        let target = node_id(10);
        let peer = node_id(11);
        let info = TargetsInfo {
            target,
            peer,
            channel: edge(1, target, peer),
        };

        let mut topology = MockTopologyManager::new();
        topology
            .expect_open_channel()
            .returning(|_| Err(AttackError::Topology("not connected".to_string())));

        let err = open_attack_channels(&topology, &info, 1_000)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("node 0 -> target"));
    }

    #[tokio::test]
    async fn test_close_attack_channels() {
        let mut topology = MockTopologyManager::new();
        topology
            .expect_close_all_channels()
            .times(3)
            .withf(|_, force| *force)
            .returning(|node, _| Ok(node + 1));

        assert_eq!(close_attack_channels(&topology, true).await.unwrap(), 6);
    }
}
