//! # Routes and Route Discovery
//!
//! Routes are produced by an external route finder and are only ever touched in
//! two ways by the attack: the final hop is redirected onto a specific channel with
//! the target's peer, and the target's hop fee is inflated to prepay reputation.

use crate::{AttackError, AttackResult, BlockHeight, Msat, NodeIndex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fee limit that lets the route finder pick any route
pub const UNLIMITED_FEE_MSAT: Msat = u64::MAX;

/// Length of a compressed secp256k1 public key
const NODE_ID_LEN: usize = 33;

/// Network identity of a node (compressed public key)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Parse a hex encoded public key.
    pub fn from_hex(s: &str) -> AttackResult<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| AttackError::InvalidConfig(format!("node id {s}: {e}")))?;
        let bytes: [u8; NODE_ID_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            AttackError::InvalidConfig(format!(
                "node id {s}: expected {NODE_ID_LEN} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for NodeId {
    type Err = AttackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Short channel id: funding block, transaction index and output index packed in a u64
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShortChannelId(pub u64);

impl ShortChannelId {
    /// Pack a channel's funding location.
    pub fn new(block: BlockHeight, tx_index: u32, output: u16) -> Self {
        Self((u64::from(block) << 40) | (u64::from(tx_index & 0xff_ffff) << 16) | u64::from(output))
    }

    /// Funding block height.
    pub fn block_height(&self) -> BlockHeight {
        (self.0 >> 40) as BlockHeight
    }

    /// Funding transaction index within its block.
    pub fn tx_index(&self) -> u32 {
        ((self.0 >> 16) & 0xff_ffff) as u32
    }

    /// Funding output index.
    pub fn output_index(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.block_height(), self.tx_index(), self.output_index())
    }
}

/// One hop of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    /// Node receiving the HTLC at this hop
    pub pubkey: NodeId,
    /// Channel the HTLC arrives over
    pub channel_id: ShortChannelId,
    /// Fee this node charges to forward
    pub fee_msat: Msat,
    /// Absolute CLTV expiry of the HTLC at this hop
    pub expiry: BlockHeight,
    /// Amount this hop forwards (or receives, for the final hop)
    pub amount_to_forward_msat: Msat,
}

/// Ordered sequence of hops from a sender to a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Hops in path order, the destination last
    pub hops: Vec<Hop>,
    /// Amount the sender pays, fees included
    pub total_amt_msat: Msat,
    /// Sum of every hop's fee
    pub total_fees_msat: Msat,
    /// CLTV expiry of the first HTLC
    pub total_time_lock: BlockHeight,
}

impl Route {
    /// Amount that arrives at the destination.
    pub fn delivered_amount_msat(&self) -> Msat {
        self.total_amt_msat.saturating_sub(self.total_fees_msat)
    }

    /// The destination hop.
    pub fn final_hop(&self) -> AttackResult<&Hop> {
        self.hops
            .last()
            .ok_or_else(|| AttackError::Route("route has no hops".to_string()))
    }

    /// Force the final hop over the given channel with the destination.
    pub fn redirect_final_hop(&mut self, channel: ShortChannelId) -> AttackResult<()> {
        let hop = self
            .hops
            .last_mut()
            .ok_or_else(|| AttackError::Route("route has no hops".to_string()))?;
        hop.channel_id = channel;
        Ok(())
    }

    /// Add `extra_msat` to the fee of every hop belonging to `node`, keeping the
    /// route totals consistent. Returns how many hops were inflated.
    pub fn inflate_fee(&mut self, node: &NodeId, extra_msat: Msat) -> usize {
        let mut inflated = 0;
        for hop in self.hops.iter_mut().filter(|hop| hop.pubkey == *node) {
            hop.fee_msat = hop.fee_msat.saturating_add(extra_msat);
            inflated += 1;
        }

        let total = extra_msat.saturating_mul(inflated as Msat);
        self.total_fees_msat = self.total_fees_msat.saturating_add(total);
        self.total_amt_msat = self.total_amt_msat.saturating_add(total);
        inflated
    }

    /// The hop carrying an HTLC into `node` and the hop carrying it onward.
    pub fn hops_around(&self, node: &NodeId) -> AttackResult<(&Hop, &Hop)> {
        let position = self
            .hops
            .iter()
            .position(|hop| hop.pubkey == *node)
            .ok_or_else(|| {
                AttackError::Route(format!("could not find incoming hop for {node} in route"))
            })?;

        let outgoing = self.hops.get(position + 1).ok_or_else(|| {
            AttackError::Route(format!("could not find outgoing hop for {node} in route"))
        })?;

        Ok((&self.hops[position], outgoing))
    }
}

/// Finds routes from an attacker node to any node in the graph
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteFinder: Send + Sync {
    /// Query a route from the attacker node at `from` to `to` for `amount_msat`.
    async fn query_route(
        &self,
        from: NodeIndex,
        to: NodeId,
        amount_msat: Msat,
        fee_limit_msat: Msat,
    ) -> AttackResult<Route>;
}
