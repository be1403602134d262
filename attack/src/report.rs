//! # Result Classification
//!
//! Every jamming payment is expected to come back failed. Where it failed tells
//! us which resource stopped it: the target (no slot or no reputation), the
//! target's peer, or our own far node (the payment got all the way through and
//! was held).
//!
//! Attribution indices are route positions with the sender at 0:
//!
//! | index | node                    | outcome                        |
//! |-------|-------------------------|--------------------------------|
//! | 0     | sender                  | fatal local/topology condition |
//! | 1     | target                  | target failed                  |
//! | 2     | target's peer           | peer failed                    |
//! | 3     | attacker's far node     | reached destination            |

use crate::payment::PaymentResult;
use crate::{AttackError, AttackResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node that failed a jamming HTLC back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailurePosition {
    Target,
    Peer,
    Destination,
}

impl FailurePosition {
    /// Classify one raw attribution index.
    pub fn from_index(index: u32) -> AttackResult<Self> {
        match index {
            0 => Err(AttackError::Attribution("failed at source".to_string())),
            1 => Ok(FailurePosition::Target),
            2 => Ok(FailurePosition::Peer),
            3 => Ok(FailurePosition::Destination),
            other => Err(AttackError::Attribution(format!(
                "unexpected failure index: {other}"
            ))),
        }
    }
}

/// Aggregate outcome of one batch of jamming payments.
///
/// Owned by the single task collecting results for its phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReport {
    /// Payments dispatched in the batch
    pub dispatched: usize,
    /// HTLCs failed back by the target
    pub target_failed: usize,
    /// HTLCs failed back by the target's peer
    pub peer_failed: usize,
    /// HTLCs that reached our far node
    pub reached_destination: usize,
}

impl PaymentReport {
    pub fn with_dispatched(dispatched: usize) -> Self {
        Self {
            dispatched,
            ..Default::default()
        }
    }

    /// Results classified so far.
    pub fn classified(&self) -> usize {
        self.target_failed + self.peer_failed + self.reached_destination
    }

    /// Count the attribution indices of one payment. The whole sequence is
    /// validated before any counter moves.
    pub fn classify(&mut self, payment: usize, indices: &[u32]) -> AttackResult<()> {
        if indices.is_empty() {
            return Err(AttackError::Attribution(format!(
                "payment {payment} has no failed htlcs"
            )));
        }

        let positions = indices
            .iter()
            .map(|index| FailurePosition::from_index(*index))
            .collect::<AttackResult<Vec<_>>>()
            .map_err(|e| e.in_phase(format!("payment {payment}")))?;

        for position in positions {
            match position {
                FailurePosition::Target => self.target_failed += 1,
                FailurePosition::Peer => self.peer_failed += 1,
                FailurePosition::Destination => self.reached_destination += 1,
            }
        }

        Ok(())
    }

    /// Record the result of jamming payment `payment`, which must have failed back.
    pub fn record(&mut self, payment: usize, result: &PaymentResult) -> AttackResult<()> {
        if result.failure_reason.is_success() {
            return Err(AttackError::Attribution(format!(
                "payment {payment} not failed back"
            )));
        }

        self.classify(payment, &result.failure_indices)
    }
}

impl fmt::Display for PaymentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, target failed: {} peer failed: {}, reached attacker: {}",
            self.dispatched, self.target_failed, self.peer_failed, self.reached_destination
        )
    }
}
