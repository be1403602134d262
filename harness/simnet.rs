//! # Simulated Network
//!
//! A deterministic, in-process stand-in for the five nodes the attack runs
//! against: three attacker nodes, the target and the target's peer. It
//! implements every collaborator trait of the engine so that a full attack can
//! run end to end, in virtual time under test.
//!
//! ## Model
//!
//! - **Channels**: the target starts with one channel to its peer; attacker
//!   opens allocate short channel ids at the current height
//! - **Target link**: the target's channel toward its peer splits its slots
//!   into a general and a protected pool and has finite outgoing liquidity
//! - **Reputation**: the fees the target earned from a sender's settled
//!   payments. Past the endorsement threshold the sender's endorsed HTLCs are
//!   forwarded endorsed, and every further [`SimParams::protected_htlc_cost_msat`]
//!   earned buys one concurrent protected slot
//! - **Peer channels**: every channel out of the peer accepts at most
//!   [`MAX_ACCEPTED_HTLCS`] in-flight HTLCs
//! - **Holds**: the final node holds unsettled payments until their settle
//!   wait elapses or they are released early, then fails them back
//!
//! Failure attribution follows route positions with the sender at 0.

use async_trait::async_trait;
use jamming_attack::payment::ResultSender;
use jamming_attack::{
    AttackError, AttackResult, AttackerNode, BlockHeight, ChannelEdge, ChannelPoint,
    FailureReason, Hop, HtlcAttempt, Msat, NodeId, NodeIndex, NodeInfo, NodeRegistry,
    OpenChannelRequest, PaymentExecutor, PaymentRequest, PaymentResult, PendingPayment, Route,
    RouteFinder, ShortChannelId, SlotBudget, TopologyManager, ATTACKER_NODE_COUNT,
    MAX_ACCEPTED_HTLCS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Parameters of the simulated network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Chain height every node reports
    pub chain_height: BlockHeight,
    /// Alias of the target node
    pub target_alias: String,
    /// Alias of the target's peer
    pub peer_alias: String,
    /// Base fee charged by every forwarding node
    pub base_fee_msat: Msat,
    /// Proportional fee charged by every forwarding node (parts per million)
    pub fee_rate_ppm: u64,
    /// CLTV delta of every forwarding node
    pub cltv_delta: u32,
    /// CLTV delta required by the final node
    pub final_cltv_delta: u32,
    /// Capacity of the target's channel with its peer
    pub target_channel_capacity_sat: u64,
    /// Target's outgoing balance on that channel
    pub target_liquidity_msat: Msat,
    /// Fees a sender must pay the target before its HTLCs are forwarded endorsed
    pub endorsement_threshold_msat: Msat,
    /// Fees beyond the threshold that buy one concurrent protected slot
    pub protected_htlc_cost_msat: Msat,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            chain_height: 800_000,
            target_alias: "target".to_string(),
            peer_alias: "target-peer".to_string(),
            base_fee_msat: 1_000,
            fee_rate_ppm: 1,
            cltv_delta: 40,
            final_cltv_delta: 80,
            target_channel_capacity_sat: 2_000_000,
            target_liquidity_msat: 1_000_000_000,
            endorsement_threshold_msat: 30_000,
            // One base fee over the assumed 300s block interval and 90s window.
            protected_htlc_cost_msat: 3_333,
        }
    }
}

impl SimParams {
    pub fn with_liquidity(mut self, liquidity_msat: Msat) -> Self {
        self.target_liquidity_msat = liquidity_msat;
        self
    }

    pub fn with_reputation(mut self, threshold_msat: Msat, protected_htlc_cost_msat: Msat) -> Self {
        self.endorsement_threshold_msat = threshold_msat;
        self.protected_htlc_cost_msat = protected_htlc_cost_msat;
        self
    }

    pub fn validate(&self) -> AttackResult<()> {
        if self.protected_htlc_cost_msat == 0 {
            return Err(AttackError::InvalidConfig(
                "protected_htlc_cost_msat must be positive".to_string(),
            ));
        }
        if self.final_cltv_delta == 0 {
            return Err(AttackError::InvalidConfig(
                "final_cltv_delta must be positive".to_string(),
            ));
        }
        if self.target_liquidity_msat > self.target_channel_capacity_sat.saturating_mul(1_000) {
            return Err(AttackError::InvalidConfig(format!(
                "target liquidity {} msat exceeds channel capacity {} sat",
                self.target_liquidity_msat, self.target_channel_capacity_sat
            )));
        }
        if self.target_alias == self.peer_alias {
            return Err(AttackError::InvalidConfig(
                "target and peer aliases must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Fee a forwarding node charges to forward `amount_msat`.
    pub fn forwarding_fee(&self, amount_msat: Msat) -> Msat {
        let proportional = u128::from(amount_msat) * u128::from(self.fee_rate_ppm) / 1_000_000;
        self.base_fee_msat
            .saturating_add(Msat::try_from(proportional).unwrap_or(Msat::MAX))
    }
}

/// Slot and liquidity usage of the target's channel toward its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkUsage {
    pub general: u16,
    pub protected: u16,
    pub liquidity_msat: Msat,
}

fn sim_node_id(tag: u8) -> NodeId {
    let mut bytes = [tag; 33];
    bytes[0] = 0x02;
    NodeId::from_bytes(bytes)
}

const ATTACKER_TAGS: [u8; ATTACKER_NODE_COUNT] = [0xa0, 0xa1, 0xa2];
const TARGET_TAG: u8 = 0x7a;
const PEER_TAG: u8 = 0x7b;

#[derive(Debug, Clone)]
struct SimChannel {
    scid: ShortChannelId,
    point: ChannelPoint,
    node1: NodeId,
    node2: NodeId,
    capacity_sat: u64,
    htlcs: u16,
}

impl SimChannel {
    fn connects(&self, a: &NodeId, b: &NodeId) -> bool {
        (self.node1 == *a && self.node2 == *b) || (self.node1 == *b && self.node2 == *a)
    }

    fn involves(&self, node: &NodeId) -> bool {
        self.node1 == *node || self.node2 == *node
    }

    fn counterparty(&self, node: &NodeId) -> NodeId {
        if self.node1 == *node {
            self.node2
        } else {
            self.node1
        }
    }

    fn edge(&self) -> ChannelEdge {
        ChannelEdge {
            channel_id: self.scid,
            channel_point: self.point,
            node1: self.node1,
            node2: self.node2,
            capacity_sat: self.capacity_sat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    General,
    Protected,
}

#[derive(Debug, Default)]
struct SenderState {
    fees_earned_msat: Msat,
    protected_in_use: u64,
}

/// Resources one in-flight HTLC occupies
#[derive(Debug)]
struct Reservation {
    sender: NodeId,
    slot: Option<Slot>,
    liquidity_msat: Msat,
    peer_channel: Option<ShortChannelId>,
}

impl Reservation {
    fn new(sender: NodeId) -> Self {
        Self {
            sender,
            slot: None,
            liquidity_msat: 0,
            peer_channel: None,
        }
    }
}

enum Admission {
    Failed {
        index: u32,
        endorsed: bool,
    },
    Delivered {
        reservation: Reservation,
        endorsed: bool,
        target_fee_msat: Msat,
    },
}

#[derive(Debug)]
struct State {
    channels: Vec<SimChannel>,
    next_tx_index: u32,
    link: LinkUsage,
    senders: HashMap<NodeId, SenderState>,
    held: usize,
}

impl State {
    fn channel(&self, scid: ShortChannelId) -> Option<&SimChannel> {
        self.channels.iter().find(|channel| channel.scid == scid)
    }

    fn channel_between(&self, a: &NodeId, b: &NodeId) -> Option<&SimChannel> {
        self.channels.iter().find(|channel| channel.connects(a, b))
    }

    fn reputation(&self, sender: &NodeId) -> Msat {
        self.senders
            .get(sender)
            .map(|s| s.fees_earned_msat)
            .unwrap_or(0)
    }

    fn commit(&mut self, reservation: &Reservation) {
        match reservation.slot {
            Some(Slot::General) => self.link.general += 1,
            Some(Slot::Protected) => {
                self.link.protected += 1;
                self.senders
                    .entry(reservation.sender)
                    .or_default()
                    .protected_in_use += 1;
            }
            None => {}
        }
        self.link.liquidity_msat -= reservation.liquidity_msat;
        if let Some(scid) = reservation.peer_channel {
            if let Some(channel) = self.channels.iter_mut().find(|c| c.scid == scid) {
                channel.htlcs += 1;
            }
        }
        self.held += 1;
    }

    fn release(&mut self, reservation: &Reservation) {
        match reservation.slot {
            Some(Slot::General) => self.link.general = self.link.general.saturating_sub(1),
            Some(Slot::Protected) => {
                self.link.protected = self.link.protected.saturating_sub(1);
                if let Some(sender) = self.senders.get_mut(&reservation.sender) {
                    sender.protected_in_use = sender.protected_in_use.saturating_sub(1);
                }
            }
            None => {}
        }
        self.link.liquidity_msat += reservation.liquidity_msat;
        if let Some(scid) = reservation.peer_channel {
            if let Some(channel) = self.channels.iter_mut().find(|c| c.scid == scid) {
                channel.htlcs = channel.htlcs.saturating_sub(1);
            }
        }
        self.held = self.held.saturating_sub(1);
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resources of a held HTLC, returned to the network when dropped
struct Lease {
    state: Arc<Mutex<State>>,
    reservation: Reservation,
}

impl Drop for Lease {
    fn drop(&mut self) {
        lock(&self.state).release(&self.reservation);
    }
}

fn failed(index: u32, endorsed: bool, reason: FailureReason) -> PaymentResult {
    PaymentResult {
        error: None,
        failure_reason: reason,
        failure_indices: vec![index],
        htlcs: vec![HtlcAttempt {
            incoming_endorsed: endorsed,
        }],
    }
}

/// The simulated network; one instance serves every collaborator trait
pub struct SimNetwork {
    params: SimParams,
    budget: SlotBudget,
    attackers: [NodeId; ATTACKER_NODE_COUNT],
    target: NodeId,
    peer: NodeId,
    state: Arc<Mutex<State>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl SimNetwork {
    /// Build the network. Cancelling `shutdown` abandons every held payment.
    pub fn new(params: SimParams, shutdown: CancellationToken) -> AttackResult<Arc<Self>> {
        params.validate()?;

        let target = sim_node_id(TARGET_TAG);
        let peer = sim_node_id(PEER_TAG);
        let scid = ShortChannelId::new(params.chain_height.saturating_sub(1_000), 1, 0);
        let target_channel = SimChannel {
            scid,
            point: channel_point(scid),
            node1: target,
            node2: peer,
            capacity_sat: params.target_channel_capacity_sat,
            htlcs: 0,
        };

        let state = State {
            channels: vec![target_channel],
            next_tx_index: 1,
            link: LinkUsage {
                general: 0,
                protected: 0,
                liquidity_msat: params.target_liquidity_msat,
            },
            senders: HashMap::new(),
            held: 0,
        };

        Ok(Arc::new(Self {
            params,
            budget: SlotBudget::protocol(),
            attackers: ATTACKER_TAGS.map(sim_node_id),
            target,
            peer,
            state: Arc::new(Mutex::new(state)),
            tracker: TaskTracker::new(),
            shutdown,
        }))
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn target_id(&self) -> NodeId {
        self.target
    }

    pub fn peer_id(&self) -> NodeId {
        self.peer
    }

    /// Identity of attacker node `index`.
    pub fn attacker_id(&self, index: NodeIndex) -> AttackResult<NodeId> {
        self.attackers
            .get(index)
            .copied()
            .ok_or(AttackError::UnknownNode(index))
    }

    /// Registry of the three attacker nodes.
    pub fn node_registry(self: &Arc<Self>) -> AttackResult<NodeRegistry> {
        let nodes = (0..ATTACKER_NODE_COUNT)
            .map(|index| {
                Arc::new(SimNode {
                    index,
                    alias: attacker_alias(index),
                    network: self.clone(),
                }) as Arc<dyn AttackerNode>
            })
            .collect();
        NodeRegistry::new(nodes)
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Abandon every held payment and wait for the hold tasks to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for every hold task to exit.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn link_usage(&self) -> LinkUsage {
        lock(&self.state).link
    }

    /// Fees the target has earned from `sender`.
    pub fn reputation(&self, sender: &NodeId) -> Msat {
        lock(&self.state).reputation(sender)
    }

    /// HTLCs currently held somewhere in the network.
    pub fn held_htlcs(&self) -> usize {
        lock(&self.state).held
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.state).channels.len()
    }

    fn alias_of(&self, node: &NodeId) -> Option<String> {
        if *node == self.target {
            return Some(self.params.target_alias.clone());
        }
        if *node == self.peer {
            return Some(self.params.peer_alias.clone());
        }
        self.attackers
            .iter()
            .position(|id| id == node)
            .map(attacker_alias)
    }

    fn known_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.attackers
            .iter()
            .copied()
            .chain([self.target, self.peer])
    }

    fn node_info(&self, node: NodeId, include_channels: bool) -> AttackResult<NodeInfo> {
        let alias = self
            .alias_of(&node)
            .ok_or_else(|| AttackError::Topology(format!("unknown node {node}")))?;

        let channels = if include_channels {
            lock(&self.state)
                .channels
                .iter()
                .filter(|channel| channel.involves(&node))
                .map(SimChannel::edge)
                .collect()
        } else {
            Vec::new()
        };

        Ok(NodeInfo {
            pubkey: node,
            alias,
            addresses: Vec::new(),
            channels,
        })
    }

    /// Hops for `path`, where each entry is a node and the channel used to reach it.
    fn build_route(&self, path: &[(NodeId, ShortChannelId)], amount_msat: Msat) -> Route {
        let mut hops: Vec<Hop> = Vec::with_capacity(path.len());
        let mut forward = amount_msat;
        let mut expiry = self.params.chain_height + self.params.final_cltv_delta;
        let mut fee = 0;

        for (pubkey, channel_id) in path.iter().rev() {
            hops.push(Hop {
                pubkey: *pubkey,
                channel_id: *channel_id,
                fee_msat: fee,
                expiry,
                amount_to_forward_msat: forward,
            });

            // The node before this one forwards what this one receives.
            forward += fee;
            fee = self.params.forwarding_fee(forward);
            expiry += self.params.cltv_delta;
        }
        hops.reverse();

        let total_fees_msat = hops.iter().map(|hop| hop.fee_msat).sum::<Msat>();
        Route {
            total_amt_msat: amount_msat + total_fees_msat,
            total_fees_msat,
            total_time_lock: hops
                .first()
                .map(|hop| hop.expiry + self.params.cltv_delta)
                .unwrap_or(expiry),
            hops,
        }
    }

    /// Walk `route` from `sender` and decide where the HTLC stops.
    fn admit(&self, state: &State, sender: NodeId, request: &PaymentRequest, route: &Route) -> Admission {
        let mut endorsed = request.endorse_outgoing;
        let mut reservation = Reservation::new(sender);
        let mut target_fee_msat = 0;
        let mut previous = sender;

        for (position, hop) in route.hops.iter().enumerate() {
            let index = position as u32;

            let channel = match state.channel(hop.channel_id) {
                Some(channel) if channel.connects(&previous, &hop.pubkey) => channel,
                _ => {
                    debug!("No channel {} from {previous} to {}", hop.channel_id, hop.pubkey);
                    return Admission::Failed { index, endorsed };
                }
            };

            if previous == self.target {
                let reputation = state.reputation(&sender);
                endorsed = endorsed && reputation >= self.params.endorsement_threshold_msat;
                target_fee_msat = route.hops[position - 1].fee_msat;

                if hop.pubkey == self.peer {
                    let amount = received_amount(route, position);
                    match self.target_slot(state, &sender, endorsed, amount) {
                        Some(slot) => {
                            reservation.slot = Some(slot);
                            reservation.liquidity_msat = amount;
                        }
                        None => return Admission::Failed { index, endorsed },
                    }
                }
            } else if previous == self.peer {
                if channel.htlcs >= MAX_ACCEPTED_HTLCS {
                    debug!("Peer channel {} has no free slots", channel.scid);
                    return Admission::Failed { index, endorsed };
                }
                reservation.peer_channel = Some(channel.scid);
            }

            previous = hop.pubkey;
        }

        Admission::Delivered {
            reservation,
            endorsed,
            target_fee_msat,
        }
    }

    /// Slot the target gives an HTLC toward its peer, if any.
    fn target_slot(&self, state: &State, sender: &NodeId, endorsed: bool, amount: Msat) -> Option<Slot> {
        if state.link.liquidity_msat < amount {
            debug!(
                "Target liquidity {} msat below {amount} msat",
                state.link.liquidity_msat
            );
            return None;
        }

        if endorsed && state.link.protected < self.budget.protected {
            let surplus = state
                .reputation(sender)
                .saturating_sub(self.params.endorsement_threshold_msat);
            let allowance = surplus / self.params.protected_htlc_cost_msat;
            let in_use = state
                .senders
                .get(sender)
                .map(|s| s.protected_in_use)
                .unwrap_or(0);

            if in_use < allowance {
                return Some(Slot::Protected);
            }
        }

        (state.link.general < self.budget.general).then_some(Slot::General)
    }

    fn spawn_hold(
        &self,
        lease: Lease,
        request: &PaymentRequest,
        result_tx: ResultSender,
        result: PaymentResult,
    ) {
        let shutdown = self.shutdown.clone();
        let release = request
            .early_cancel
            .clone()
            .unwrap_or_else(CancellationToken::new);
        let settle_wait = request.settle_wait;

        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    // Result sender is dropped with the task.
                    drop(lease);
                    return;
                }
                _ = release.cancelled() => {}
                _ = tokio::time::sleep(settle_wait) => {}
            }

            drop(lease);
            let _ = result_tx.send(result);
        });
    }
}

/// Amount the node at `position` receives.
fn received_amount(route: &Route, position: usize) -> Msat {
    match position {
        0 => route.total_amt_msat,
        _ => route.hops[position - 1].amount_to_forward_msat,
    }
}

fn channel_point(scid: ShortChannelId) -> ChannelPoint {
    let mut txid = [0u8; 32];
    txid[..8].copy_from_slice(&scid.0.to_be_bytes());
    ChannelPoint {
        txid,
        output_index: u32::from(scid.output_index()),
    }
}

fn attacker_alias(index: NodeIndex) -> String {
    format!("attacker-{index}")
}

#[async_trait]
impl PaymentExecutor for SimNetwork {
    async fn dispatch(&self, request: PaymentRequest, route: &Route) -> AttackResult<PendingPayment> {
        if self.shutdown.is_cancelled() {
            return Err(AttackError::Dispatch("network shut down".to_string()));
        }

        let sender = self.attacker_id(request.source)?;
        let dest = self.attacker_id(request.dest)?;
        let final_hop = route
            .final_hop()
            .map_err(|e| AttackError::Dispatch(e.to_string()))?;
        if final_hop.pubkey != dest {
            return Err(AttackError::Dispatch(format!(
                "route ends at {} instead of node {}",
                final_hop.pubkey, request.dest
            )));
        }

        let mut state = lock(&self.state);
        let (reservation, endorsed, target_fee_msat) = match self.admit(&state, sender, &request, route) {
            Admission::Failed { index, endorsed } => {
                debug!("Payment from node {} failed at position {index}", request.source);
                return Ok(PendingPayment::ready(failed(index, endorsed, FailureReason::NoRoute)));
            }
            Admission::Delivered {
                reservation,
                endorsed,
                target_fee_msat,
            } => (reservation, endorsed, target_fee_msat),
        };

        if request.settle {
            state.senders.entry(sender).or_default().fees_earned_msat += target_fee_msat;
            return Ok(PendingPayment::ready(PaymentResult::settled(vec![HtlcAttempt {
                incoming_endorsed: endorsed,
            }])));
        }

        state.commit(&reservation);
        drop(state);

        let lease = Lease {
            state: self.state.clone(),
            reservation,
        };
        let (result_tx, pending) = PendingPayment::channel();
        let result = failed(
            route.hops.len() as u32,
            endorsed,
            FailureReason::IncorrectPaymentDetails,
        );
        self.spawn_hold(lease, &request, result_tx, result);

        Ok(pending)
    }
}

#[async_trait]
impl RouteFinder for SimNetwork {
    async fn query_route(
        &self,
        from: NodeIndex,
        to: NodeId,
        amount_msat: Msat,
        fee_limit_msat: Msat,
    ) -> AttackResult<Route> {
        let source = self.attacker_id(from)?;
        let state = lock(&self.state);

        let no_path = || AttackError::Route(format!("no path from node {from} to {to}"));
        let first = state.channel_between(&source, &self.target).ok_or_else(no_path)?;

        let mut path = vec![(self.target, first.scid)];
        if to == self.attackers[2] {
            let target_channel = state.channel_between(&self.target, &self.peer).ok_or_else(no_path)?;
            let last = state.channel_between(&self.peer, &to).ok_or_else(no_path)?;
            path.push((self.peer, target_channel.scid));
            path.push((to, last.scid));
        } else if to != source && self.attackers.contains(&to) {
            let last = state.channel_between(&self.target, &to).ok_or_else(no_path)?;
            path.push((to, last.scid));
        } else {
            return Err(no_path());
        }
        drop(state);

        let route = self.build_route(&path, amount_msat);
        if route.total_fees_msat > fee_limit_msat {
            return Err(AttackError::Route(format!(
                "route fee {} msat over limit {fee_limit_msat} msat",
                route.total_fees_msat
            )));
        }

        Ok(route)
    }
}

#[async_trait]
impl TopologyManager for SimNetwork {
    async fn open_channel(&self, request: OpenChannelRequest) -> AttackResult<ChannelPoint> {
        let source = self.attacker_id(request.source)?;
        if !self.known_nodes().any(|node| node == request.dest) || request.dest == source {
            return Err(AttackError::Topology(format!(
                "cannot open channel to {}",
                request.dest
            )));
        }
        if request.capacity_sat == 0 || request.push_sat > request.capacity_sat {
            return Err(AttackError::Topology(format!(
                "invalid channel amounts: capacity {} push {}",
                request.capacity_sat, request.push_sat
            )));
        }

        let mut state = lock(&self.state);
        let scid = ShortChannelId::new(self.params.chain_height, state.next_tx_index, 0);
        state.next_tx_index += 1;

        let point = channel_point(scid);
        state.channels.push(SimChannel {
            scid,
            point,
            node1: source,
            node2: request.dest,
            capacity_sat: request.capacity_sat,
            htlcs: 0,
        });

        info!(
            "Opened {scid} from node {} to {} ({} sat)",
            request.source, request.dest, request.capacity_sat
        );
        Ok(point)
    }

    async fn wait_for_channel(
        &self,
        lookup_node: NodeIndex,
        channel_node: NodeIndex,
        channel: ChannelPoint,
    ) -> AttackResult<()> {
        self.attacker_id(lookup_node)?;
        let owner = self.attacker_id(channel_node)?;

        let state = lock(&self.state);
        match state
            .channels
            .iter()
            .find(|c| c.point == channel && c.involves(&owner))
        {
            Some(_) => Ok(()),
            None => Err(AttackError::Topology(format!(
                "channel {channel} of node {channel_node} not in graph"
            ))),
        }
    }

    async fn list_channel_ids(&self, node: NodeIndex) -> AttackResult<Vec<ShortChannelId>> {
        let id = self.attacker_id(node)?;
        let state = lock(&self.state);

        let mut scids: Vec<ShortChannelId> = state
            .channels
            .iter()
            .filter(|channel| channel.involves(&id))
            .map(|channel| channel.scid)
            .collect();
        scids.sort();
        Ok(scids)
    }

    async fn lookup_by_alias(&self, alias: &str) -> AttackResult<NodeInfo> {
        let node = self
            .known_nodes()
            .find(|node| self.alias_of(node).as_deref() == Some(alias))
            .ok_or_else(|| AttackError::Topology(format!("no node with alias {alias}")))?;

        self.node_info(node, false)
    }

    async fn lookup_node(
        &self,
        source: NodeIndex,
        node: NodeId,
        include_channels: bool,
    ) -> AttackResult<NodeInfo> {
        self.attacker_id(source)?;
        self.node_info(node, include_channels)
    }

    async fn close_all_channels(&self, node: NodeIndex, force: bool) -> AttackResult<usize> {
        let id = self.attacker_id(node)?;
        let mut state = lock(&self.state);

        if !force {
            if let Some(busy) = state
                .channels
                .iter()
                .find(|channel| channel.involves(&id) && channel.htlcs > 0)
            {
                return Err(AttackError::Topology(format!(
                    "channel {} has {} pending htlcs, force close required",
                    busy.scid, busy.htlcs
                )));
            }
        }

        let before = state.channels.len();
        state.channels.retain(|channel| !channel.involves(&id));
        let closed = before - state.channels.len();

        if force && closed > 0 {
            warn!("Force closed {closed} channels of node {node}");
        }
        Ok(closed)
    }
}

/// One attacker node of the simulated network
pub struct SimNode {
    index: NodeIndex,
    alias: String,
    network: Arc<SimNetwork>,
}

#[async_trait]
impl AttackerNode for SimNode {
    fn identity(&self) -> NodeId {
        self.network.attackers[self.index]
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    async fn block_height(&self) -> AttackResult<BlockHeight> {
        Ok(self.network.params.chain_height)
    }

    async fn connected_peers(&self) -> AttackResult<Vec<NodeId>> {
        let identity = self.identity();
        let state = lock(&self.network.state);

        let mut peers: Vec<NodeId> = state
            .channels
            .iter()
            .filter(|channel| channel.involves(&identity))
            .map(|channel| channel.counterparty(&identity))
            .collect();
        peers.sort();
        peers.dedup();
        Ok(peers)
    }
}
