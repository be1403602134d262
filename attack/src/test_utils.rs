//! Test fixtures: deterministic nodes, routes and a scripted payment executor.

use crate::payment::{HtlcAttempt, PaymentExecutor, PaymentRequest, PaymentResult, PendingPayment};
use crate::route::{Hop, RouteFinder};
use crate::topology::MockTopologyManager;
use crate::{
    AttackConfig, AttackContext, AttackError, AttackResult, AttackerNode, BlockHeight, Msat,
    NodeId, NodeIndex, NodeRegistry, Route, ShortChannelId, TopologyManager,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Chain height every test node reports.
pub(crate) const TEST_HEIGHT: BlockHeight = 800_000;

/// Final-hop CLTV delta of every test route.
pub(crate) const FINAL_CLTV: BlockHeight = 200;

/// Fee each forwarding hop of a test route charges.
pub(crate) const HOP_FEE_MSAT: Msat = 1_000;

/// Deterministic node identity.
pub(crate) fn node_id(i: u8) -> NodeId {
    let mut bytes = [0u8; 33];
    bytes[0] = 0x02;
    bytes[32] = i;
    NodeId::from_bytes(bytes)
}

pub(crate) fn target_id() -> NodeId {
    node_id(10)
}

pub(crate) fn peer_id() -> NodeId {
    node_id(11)
}

/// Attacker node with a fixed identity and height.
pub(crate) struct StaticNode {
    index: u8,
    alias: String,
    height: BlockHeight,
}

impl StaticNode {
    pub(crate) fn new(index: u8, height: BlockHeight) -> Self {
        Self {
            index,
            alias: format!("attacker-{index}"),
            height,
        }
    }
}

#[async_trait]
impl AttackerNode for StaticNode {
    fn identity(&self) -> NodeId {
        node_id(self.index)
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    async fn block_height(&self) -> AttackResult<BlockHeight> {
        Ok(self.height)
    }

    async fn connected_peers(&self) -> AttackResult<Vec<NodeId>> {
        Ok(vec![target_id()])
    }
}

fn hop(pubkey: NodeId, scid: u64, fee_msat: Msat, expiry: BlockHeight, forward: Msat) -> Hop {
    Hop {
        pubkey,
        channel_id: ShortChannelId(scid),
        fee_msat,
        expiry,
        amount_to_forward_msat: forward,
    }
}

/// sender -> target -> peer -> dest
pub(crate) fn three_hop_route(
    target: NodeId,
    peer: NodeId,
    dest: NodeId,
    amount_msat: Msat,
    fee_msat: Msat,
) -> Route {
    let final_expiry = TEST_HEIGHT + FINAL_CLTV;
    Route {
        hops: vec![
            hop(target, 1, fee_msat, final_expiry + 80, amount_msat + fee_msat),
            hop(peer, 2, fee_msat, final_expiry + 40, amount_msat),
            hop(dest, 3, 0, final_expiry, amount_msat),
        ],
        total_amt_msat: amount_msat + 2 * fee_msat,
        total_fees_msat: 2 * fee_msat,
        total_time_lock: final_expiry + 120,
    }
}

/// sender -> target -> dest
pub(crate) fn two_hop_route(target: NodeId, dest: NodeId, amount_msat: Msat, fee_msat: Msat) -> Route {
    let final_expiry = TEST_HEIGHT + FINAL_CLTV;
    Route {
        hops: vec![
            hop(target, 4, fee_msat, final_expiry + 80, amount_msat),
            hop(dest, 5, 0, final_expiry, amount_msat),
        ],
        total_amt_msat: amount_msat + fee_msat,
        total_fees_msat: fee_msat,
        total_time_lock: final_expiry + 80,
    }
}

/// Routes every attacker pair through the target; node 2 sits behind the peer.
pub(crate) struct FakeRoutes;

#[async_trait]
impl RouteFinder for FakeRoutes {
    async fn query_route(
        &self,
        _from: NodeIndex,
        to: NodeId,
        amount_msat: Msat,
        _fee_limit_msat: Msat,
    ) -> AttackResult<Route> {
        if to == node_id(2) {
            Ok(three_hop_route(target_id(), peer_id(), to, amount_msat, HOP_FEE_MSAT))
        } else {
            Ok(two_hop_route(target_id(), to, amount_msat, HOP_FEE_MSAT))
        }
    }
}

/// How the fake executor answers one dispatch
pub(crate) enum Reply {
    /// Deliver the result straight away
    Resolve(PaymentResult),
    /// Deliver the result once the settle wait elapses or the hold is released
    Hold(PaymentResult),
    /// Refuse to dispatch
    Reject(String),
}

type Responder = Box<dyn Fn(&PaymentRequest, usize) -> Reply + Send + Sync>;

/// Scripted executor that records every dispatch.
///
/// Held payments run as tracked tasks which abandon their result when the
/// executor's run token is cancelled, like a node connection shutting down.
pub(crate) struct FakeExecutor {
    responder: Responder,
    dispatched: Mutex<Vec<PaymentRequest>>,
    in_flight: Arc<AtomicUsize>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    dispatch_delay: Option<Duration>,
}

impl FakeExecutor {
    /// Answer each dispatch with `responder(request, dispatch_index)`.
    pub(crate) fn new(
        responder: impl Fn(&PaymentRequest, usize) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            dispatched: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            dispatch_delay: None,
        }
    }

    /// Make every dispatch take `delay` before it returns.
    pub(crate) fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = Some(delay);
        self
    }

    /// Settles settle-on-arrival payments and holds everything else until it
    /// fails back from the far attacker node.
    pub(crate) fn holding() -> Self {
        Self::new(|request, _| default_reply(request))
    }

    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn dispatched(&self) -> Vec<PaymentRequest> {
        self.dispatched.lock().unwrap().clone()
    }

    pub(crate) fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }

    /// Held payments whose result has not been delivered.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for every held payment task to finish.
    pub(crate) async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

pub(crate) fn default_reply(request: &PaymentRequest) -> Reply {
    if request.settle {
        Reply::Resolve(PaymentResult::settled(vec![HtlcAttempt::default()]))
    } else {
        Reply::Hold(PaymentResult::failed_at(3, false))
    }
}

#[async_trait]
impl PaymentExecutor for FakeExecutor {
    async fn dispatch(&self, request: PaymentRequest, _route: &Route) -> AttackResult<PendingPayment> {
        if let Some(delay) = self.dispatch_delay {
            tokio::time::sleep(delay).await;
        }

        let index = {
            let mut dispatched = self.dispatched.lock().unwrap();
            dispatched.push(request.clone());
            dispatched.len() - 1
        };

        match (self.responder)(&request, index) {
            Reply::Reject(msg) => Err(AttackError::Dispatch(msg)),
            Reply::Resolve(result) => Ok(PendingPayment::ready(result)),
            Reply::Hold(result) => {
                let (sender, pending) = PendingPayment::channel();
                let in_flight = self.in_flight.clone();
                let shutdown = self.shutdown.clone();
                let release = request
                    .early_cancel
                    .clone()
                    .unwrap_or_else(CancellationToken::new);

                in_flight.fetch_add(1, Ordering::SeqCst);
                self.tracker.spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }
                        _ = release.cancelled() => {}
                        _ = tokio::time::sleep(request.settle_wait) => {}
                    }
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = sender.send(result);
                });

                Ok(pending)
            }
        }
    }
}

/// An [`AttackContext`] wired to a fake executor.
pub(crate) struct Harness {
    pub(crate) ctx: AttackContext,
    pub(crate) executor: Arc<FakeExecutor>,
}

fn registry() -> NodeRegistry {
    let nodes: Vec<Arc<dyn AttackerNode>> = (0..3)
        .map(|i| Arc::new(StaticNode::new(i, TEST_HEIGHT)) as Arc<dyn AttackerNode>)
        .collect();
    NodeRegistry::new(nodes).unwrap()
}

impl Harness {
    pub(crate) fn new(executor: FakeExecutor) -> Self {
        Self::with_config(executor, AttackConfig::default())
    }

    pub(crate) fn with_config(executor: FakeExecutor, config: AttackConfig) -> Self {
        Self::try_with_config(executor, config).unwrap()
    }

    pub(crate) fn try_with_config(executor: FakeExecutor, config: AttackConfig) -> AttackResult<Self> {
        Self::build(
            executor,
            Arc::new(FakeRoutes),
            Arc::new(MockTopologyManager::new()),
            config,
        )
    }

    pub(crate) fn build(
        executor: FakeExecutor,
        routes: Arc<dyn RouteFinder>,
        topology: Arc<dyn TopologyManager>,
        config: AttackConfig,
    ) -> AttackResult<Self> {
        let executor = Arc::new(executor);
        let ctx = AttackContext::new(registry(), executor.clone(), routes, topology, config)?
            .with_shutdown(executor.shutdown().clone());

        Ok(Self { ctx, executor })
    }

    /// Route from node 0 to node 2 through the target and its peer.
    pub(crate) fn route_to_sink(&self) -> Route {
        three_hop_route(target_id(), peer_id(), node_id(2), 400_000, HOP_FEE_MSAT)
    }
}
