//! Shared capabilities handed to every attack phase.

use crate::payment::{PaymentExecutor, PaymentRequest, PaymentResult, PendingPayment};
use crate::route::{Route, RouteFinder, UNLIMITED_FEE_MSAT};
use crate::{
    AttackConfig, AttackError, AttackResult, BlockHeight, Msat, NodeIndex, NodeRegistry,
    SlotBudget, TopologyManager,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a phase needs to reach the network, built once per run.
///
/// Cloning is cheap; clones share the same collaborators and the same
/// run-scoped cancellation token.
#[derive(Clone)]
pub struct AttackContext {
    nodes: NodeRegistry,
    executor: Arc<dyn PaymentExecutor>,
    routes: Arc<dyn RouteFinder>,
    topology: Arc<dyn TopologyManager>,
    config: AttackConfig,
    slots: SlotBudget,
    shutdown: CancellationToken,
}

impl AttackContext {
    pub fn new(
        nodes: NodeRegistry,
        executor: Arc<dyn PaymentExecutor>,
        routes: Arc<dyn RouteFinder>,
        topology: Arc<dyn TopologyManager>,
        config: AttackConfig,
    ) -> AttackResult<Self> {
        config.validate()?;

        Ok(Self {
            nodes,
            executor,
            routes,
            topology,
            config,
            slots: SlotBudget::protocol(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Use an externally owned run-level cancellation token.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn topology(&self) -> &dyn TopologyManager {
        self.topology.as_ref()
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    pub fn slots(&self) -> SlotBudget {
        self.slots
    }

    /// Run-scoped cancellation; every wait in the engine selects on it.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Query a route between two attacker nodes with no fee limit.
    pub async fn query_route(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        amount_msat: Msat,
    ) -> AttackResult<Route> {
        let dest = self.nodes.identity(to)?;
        self.routes
            .query_route(from, dest, amount_msat, UNLIMITED_FEE_MSAT)
            .await
    }

    /// Chain height as seen by the attacker node at `index`.
    pub async fn block_height(&self, index: NodeIndex) -> AttackResult<BlockHeight> {
        self.nodes.get(index)?.block_height().await
    }

    pub async fn dispatch(
        &self,
        request: PaymentRequest,
        route: &Route,
    ) -> AttackResult<PendingPayment> {
        self.executor.dispatch(request, route).await
    }

    /// Wait for one payment, giving up as soon as the run is cancelled.
    pub async fn await_payment(&self, pending: PendingPayment) -> AttackResult<PaymentResult> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(AttackError::Cancelled),
            result = pending => result,
        }
    }
}

impl std::fmt::Debug for AttackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttackContext")
            .field("nodes", &self.nodes)
            .field("config", &self.config)
            .field("slots", &self.slots)
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}
