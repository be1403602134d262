//! Collecting the results of a batch of jamming payments.
//!
//! Two orders are supported. [`wait_for_jams`] waits strictly in dispatch order,
//! which is the order held payments resolve in anyway; a slow early payment only
//! delays reporting. [`drain_jams`] takes results as they arrive and is used for
//! the background general-slot batch.
//!
//! Either wait returns as soon as the run is cancelled, carrying the report
//! accumulated so far in [`AttackError::Interrupted`].

use crate::payment::{JamPair, PaymentResult};
use crate::{AttackError, AttackResult, PaymentReport};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fold one payment outcome into the report.
fn record_outcome(
    report: &mut PaymentReport,
    shutdown: &CancellationToken,
    index: usize,
    outcome: AttackResult<PaymentResult>,
) -> AttackResult<()> {
    match outcome {
        Ok(result) => {
            result.check_error()?;
            report.record(index, &result)?;
            debug!("Jam {index} resolved: {:?}", result.failure_indices);
            Ok(())
        }
        // An executor tearing down because the run ended is not an anomaly.
        Err(AttackError::Abandoned) if shutdown.is_cancelled() => {
            Err(AttackError::Interrupted(*report))
        }
        Err(e) => Err(e),
    }
}

/// Wait for every jam in dispatch order.
pub async fn wait_for_jams(
    jams: Vec<JamPair>,
    shutdown: &CancellationToken,
) -> AttackResult<PaymentReport> {
    let mut report = PaymentReport::with_dispatched(jams.len());

    for (index, jam) in jams.into_iter().enumerate() {
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(AttackError::Interrupted(report)),
            outcome = jam.pending => outcome,
        };

        record_outcome(&mut report, shutdown, index, outcome)?;
    }

    Ok(report)
}

/// Wait for every jam, taking results in the order they arrive.
pub async fn drain_jams(
    jams: Vec<JamPair>,
    shutdown: &CancellationToken,
) -> AttackResult<PaymentReport> {
    let mut report = PaymentReport::with_dispatched(jams.len());

    let mut pending: FuturesUnordered<_> = jams
        .into_iter()
        .enumerate()
        .map(|(index, jam)| async move { (index, jam.pending.await) })
        .collect();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(AttackError::Interrupted(report)),
            next = pending.next() => next,
        };

        let Some((index, outcome)) = next else {
            break;
        };

        record_outcome(&mut report, shutdown, index, outcome)?;
    }

    Ok(report)
}
