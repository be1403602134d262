//! # Slot Capacity Model
//!
//! A channel direction accepts at most [`MAX_ACCEPTED_HTLCS`] concurrent HTLCs.
//! The reputation scheme splits that budget into a protected pool, reserved for
//! senders with sufficient reputation, and a general pool open to everyone.

use serde::{Deserialize, Serialize};

/// Protocol maximum of concurrent HTLCs per channel direction
pub const MAX_ACCEPTED_HTLCS: u16 = 483;

/// Split of a channel's slot budget into protected and general pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotBudget {
    /// Total concurrent HTLCs
    pub total: u16,
    /// Reputation-gated slots (floor of half the total)
    pub protected: u16,
    /// Unprivileged slots (the remainder)
    pub general: u16,
}

impl SlotBudget {
    /// Split `total` slots; the protected pool gets the floor of half.
    pub const fn new(total: u16) -> Self {
        let protected = total / 2;
        Self {
            total,
            protected,
            general: total - protected,
        }
    }

    /// The budget every channel gets under the protocol limit.
    pub const fn protocol() -> Self {
        Self::new(MAX_ACCEPTED_HTLCS)
    }

    /// Protected pool size as a batch length.
    pub fn protected_count(&self) -> usize {
        usize::from(self.protected)
    }

    /// General pool size as a batch length.
    pub fn general_count(&self) -> usize {
        usize::from(self.general)
    }
}

impl Default for SlotBudget {
    fn default() -> Self {
        Self::protocol()
    }
}
