//! Hold durations bounded by the final hop's time lock.
//!
//! A receiving node releases a held HTLC early once it gets too close to its
//! expiry, and an HTLC still pending at expiry goes on chain. Jams are therefore
//! never held past `final_expiry - safety_margin`, converted to wall-clock time
//! with an assumed average block interval.

use crate::{AttackContext, AttackResult, BlockHeight, NodeIndex, Route};
use std::time::Duration;
use tracing::debug;

/// Shorter of `requested` and the time until the final hop's expiry, less a
/// safety margin, is reached. Zero when that point has already passed.
pub fn bounded_hold(
    final_expiry: BlockHeight,
    current_height: BlockHeight,
    safety_margin_blocks: u32,
    block_interval: Duration,
    requested: Duration,
) -> Duration {
    let remaining_blocks =
        i64::from(final_expiry) - i64::from(safety_margin_blocks) - i64::from(current_height);

    if remaining_blocks <= 0 {
        return Duration::ZERO;
    }

    let chain_bound = block_interval.saturating_mul(remaining_blocks.min(u32::MAX as i64) as u32);
    chain_bound.min(requested)
}

/// Hold duration for jams sent over `route` by attacker node `payer`.
pub async fn safe_hold_duration(
    ctx: &AttackContext,
    route: &Route,
    payer: NodeIndex,
    requested: Duration,
) -> AttackResult<Duration> {
    let final_expiry = route.final_hop()?.expiry;
    let height = ctx.block_height(payer).await?;
    let config = ctx.config();

    let hold = bounded_hold(
        final_expiry,
        height,
        config.safety_margin_blocks,
        config.block_interval(),
        requested,
    );

    debug!(
        "Hold for expiry {final_expiry} at height {height}: {:?} (requested {:?})",
        hold, requested
    );
    Ok(hold)
}
