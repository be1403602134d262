//! # Reputation Builder
//!
//! Reputation with the target accrues with the fees paid to it over a rolling
//! window. The builder pays those fees with cheap, fast, settled round trips
//! between two attacker nodes routed through the target, and every few rounds
//! sends an endorsed probe through the target toward its peer. A probe that
//! arrives endorsed is the only externally visible sign that the threshold has
//! been crossed.
//!
//! A target whose own reputation with its peer is poor will never forward our
//! HTLCs endorsed, so the loop gives up after a fixed number of rounds and
//! reports that without an error.

use crate::payment::PaymentRequest;
use crate::{
    AttackContext, AttackResult, Msat, PhaseExt, Route, REPUTATION_NODE, SINK_NODE, SOURCE_NODE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What the reputation phase achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationOutcome {
    /// Whether a probe arrived at our far node endorsed
    pub endorsed: bool,
    /// Round-trip rounds completed
    pub rounds: u64,
    /// Endorsement probes sent
    pub probes: u64,
    /// Fees paid by the round trips that settled
    pub fees_paid_msat: Msat,
}

/// Resolved once up front; routing never changes during the phase.
struct ReputationRoutes {
    zero_to_one: Route,
    one_to_zero: Route,
    zero_to_two: Route,
}

impl ReputationRoutes {
    async fn resolve(ctx: &AttackContext) -> AttackResult<Self> {
        let config = ctx.config();
        let amount = config.reputation_amount_msat;

        Ok(Self {
            zero_to_one: ctx
                .query_route(SOURCE_NODE, REPUTATION_NODE, amount)
                .await
                .in_phase("0 -> 1")?,
            one_to_zero: ctx
                .query_route(REPUTATION_NODE, SOURCE_NODE, amount)
                .await
                .in_phase("1 -> 0")?,
            zero_to_two: ctx
                .query_route(SOURCE_NODE, SINK_NODE, config.endorsement_probe_amount_msat)
                .await
                .in_phase("0 -> 2")?,
        })
    }
}

/// Pay the target until our HTLCs are forwarded endorsed, or the round
/// ceiling is reached.
pub async fn build_reputation(ctx: &AttackContext) -> AttackResult<ReputationOutcome> {
    let config = ctx.config();
    let routes = ReputationRoutes::resolve(ctx).await?;
    let amount = config.reputation_amount_msat;

    let mut outcome = ReputationOutcome::default();

    for round in 1..=config.max_reputation_rounds {
        outcome.rounds = round;
        debug!(
            "Sending reputation payments: {round}, total fees: {}",
            outcome.fees_paid_msat
        );

        let out = ctx
            .dispatch(
                PaymentRequest::settled(amount, SOURCE_NODE, REPUTATION_NODE),
                &routes.zero_to_one,
            )
            .await
            .in_phase(format!("round {round}: 0 -> 1"))?;
        let back = ctx
            .dispatch(
                PaymentRequest::settled(amount, REPUTATION_NODE, SOURCE_NODE),
                &routes.one_to_zero,
            )
            .await
            .in_phase(format!("round {round}: 1 -> 0"))?;

        let (out, back) = tokio::try_join!(ctx.await_payment(out), ctx.await_payment(back))
            .in_phase(format!("round {round}"))?;

        for (result, route, label) in [
            (out, &routes.zero_to_one, "0 -> 1"),
            (back, &routes.one_to_zero, "1 -> 0"),
        ] {
            result.check_error().in_phase(format!("round {round}: {label}"))?;

            if result.failure_reason.is_success() {
                outcome.fees_paid_msat += route.total_fees_msat;
            } else {
                warn!("Round {round}: {label} failed: {}", result.failure_reason);
            }
        }

        if round % config.probe_interval_rounds != 0 {
            continue;
        }

        outcome.probes += 1;
        info!(
            "Sending endorsement probe {} after round {round} (fees paid: {} msat)",
            outcome.probes, outcome.fees_paid_msat
        );

        let probe = PaymentRequest::held(
            config.endorsement_probe_amount_msat,
            SOURCE_NODE,
            SINK_NODE,
            true,
            config.endorsement_probe_wait(),
        );
        let pending = ctx
            .dispatch(probe, &routes.zero_to_two)
            .await
            .in_phase(format!("round {round}: probe"))?;
        let result = ctx.await_payment(pending).await?;
        result.check_error().in_phase(format!("round {round}: probe"))?;

        debug!("Probe {} failure: {}", outcome.probes, result.failure_reason);

        if result.any_endorsed() {
            outcome.endorsed = true;
            info!(
                "Probe endorsed after {round} rounds, {} msat fees paid",
                outcome.fees_paid_msat
            );
            return Ok(outcome);
        }
    }

    warn!(
        "Reputation not built after {} rounds, giving up",
        outcome.rounds
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentResult;
    use crate::route::MockRouteFinder;
    use crate::test_utils::{default_reply, FakeExecutor, Harness, Reply, HOP_FEE_MSAT};
    use crate::topology::MockTopologyManager;
    use crate::{AttackConfig, AttackError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Executor whose endorsement probes come back endorsed from the `n`th on.
    fn endorsing_from(n: usize) -> FakeExecutor {
        let probes = AtomicUsize::new(0);
        FakeExecutor::new(move |request, _| {
            if !request.endorse_outgoing {
                return default_reply(request);
            }

            let seen = probes.fetch_add(1, Ordering::SeqCst) + 1;
            Reply::Resolve(PaymentResult::failed_at(3, seen >= n))
        })
    }

    #[tokio::test]
    async fn test_endorsed_on_seventh_probe() {
        let harness = Harness::new(endorsing_from(7));

        let outcome = build_reputation(&harness.ctx).await.unwrap();
        assert!(outcome.endorsed);
        assert_eq!(outcome.probes, 7);
        assert_eq!(outcome.rounds, 70);
        assert_eq!(outcome.fees_paid_msat, 140 * HOP_FEE_MSAT);

        let dispatched = harness.executor.dispatched();
        assert_eq!(dispatched.len(), 140 + 7);
        assert_eq!(dispatched.iter().filter(|r| r.endorse_outgoing).count(), 7);
        assert!(dispatched
            .iter()
            .filter(|r| !r.endorse_outgoing)
            .all(|r| r.settle));
    }

    #[tokio::test]
    async fn test_ceiling_is_not_an_error() {
        let config = AttackConfig::new().with_reputation_rounds(10, 25);
        let harness = Harness::with_config(endorsing_from(usize::MAX), config);

        let outcome = build_reputation(&harness.ctx).await.unwrap();
        assert!(!outcome.endorsed);
        assert_eq!(outcome.rounds, 25);
        assert_eq!(outcome.probes, 2);
    }

    #[tokio::test]
    async fn test_failed_round_trip_not_counted() {
        let executor = FakeExecutor::new(|request, _| {
            if request.settle && request.source == REPUTATION_NODE {
                Reply::Resolve(PaymentResult::failed_at(1, false))
            } else if request.settle {
                default_reply(request)
            } else {
                Reply::Resolve(PaymentResult::failed_at(3, request.endorse_outgoing))
            }
        });
        let harness = Harness::new(executor);

        let outcome = build_reputation(&harness.ctx).await.unwrap();
        assert!(outcome.endorsed);
        assert_eq!(outcome.rounds, 10);
        assert_eq!(outcome.fees_paid_msat, 10 * HOP_FEE_MSAT);
    }

    #[tokio::test]
    async fn test_hard_error_is_fatal() {
        let executor = FakeExecutor::new(|request, index| {
            if index == 5 {
                Reply::Resolve(PaymentResult::hard_error("connection reset"))
            } else {
                default_reply(request)
            }
        });
        let harness = Harness::new(executor);

        let err = build_reputation(&harness.ctx).await.unwrap_err();
        assert!(matches!(err.root(), AttackError::Payment(_)));
        assert!(err.to_string().starts_with("round 3"));
    }

    #[tokio::test]
    async fn test_route_failure_names_leg() {
        let mut routes = MockRouteFinder::new();
        routes
            .expect_query_route()
            .returning(|_, _, _, _| Err(AttackError::Route("no path".to_string())));

        let harness = Harness::build(
            FakeExecutor::holding(),
            Arc::new(routes),
            Arc::new(MockTopologyManager::new()),
            AttackConfig::default(),
        )
        .unwrap();

        let err = build_reputation(&harness.ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "0 -> 1: route lookup failed: no path");
        assert_eq!(harness.executor.dispatch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_probing() {
        // Probes are held for their full settle wait and never endorsed.
        let harness = Harness::new(FakeExecutor::holding());
        let shutdown = harness.ctx.shutdown().clone();

        let ctx = harness.ctx.clone();
        let run = tokio::spawn(async move { build_reputation(&ctx).await });

        tokio::time::sleep(std::time::Duration::from_secs(20)).await;
        shutdown.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
        harness.executor.join().await;
    }
}
