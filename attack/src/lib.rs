//! # Reputation Jamming Attack Engine
//!
//! This library orchestrates a resource-jamming attack against a channel that is
//! protected by a reputation-and-slot-allocation scheme. A small set of attacker
//! controlled nodes surrounds a target node and its peer; the engine saturates the
//! bounded number of in-flight HTLC slots on the target's channel and measures how
//! much of that capacity can be denied, and whether paying for reputation unlocks
//! the protected share of the slots.
//!
//! ## Architecture
//!
//! The attack runs in strictly ordered phases:
//!
//! - **Reputation**: cheap settled round trips between attacker nodes, with a
//!   periodic endorsement probe toward the target ([`reputation`])
//! - **General slots**: a background batch of long-held unendorsed payments that
//!   fills the unprivileged pool ([`general`])
//! - **Protected reputation**: incremental opportunity-cost prepayment with a
//!   protected-access probe after every increment ([`protected`])
//! - **Protected slots**: a slow (batch hold) or fast (steady-state refill) jam of
//!   the reputation-gated pool ([`jammer`])
//!
//! Every phase is driven by the [`orchestrator::Attack`] state machine, which owns
//! the run-scoped cancellation token and joins every task it spawns.
//!
//! The network itself is reached through the collaborator traits
//! [`PaymentExecutor`], [`RouteFinder`], [`AttackerNode`] and [`TopologyManager`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jamming_attack::{Attack, AttackConfig, AttackContext, AttackParams, JamStrategy};
//!
//! let ctx = AttackContext::new(nodes, executor, routes, topology, AttackConfig::default())?;
//! let attack = Attack::new(ctx, AttackParams::new(target, "peer-alias", JamStrategy::Fast));
//! let summary = attack.run().await?;
//! println!("{summary}");
//! ```

use thiserror::Error;

pub mod config;
pub mod context;
pub mod general;
pub mod hold;
pub mod jammer;
pub mod node;
pub mod orchestrator;
pub mod payment;
pub mod protected;
pub mod report;
pub mod reputation;
pub mod route;
pub mod slots;
pub mod topology;
pub mod wait;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export main components
pub use config::AttackConfig;
pub use context::AttackContext;
pub use jammer::{FastJammer, JamStrategy, ProtectedJam, ProtectedJammer, SlowJammer};
pub use node::{AttackerNode, NodeRegistry};
pub use orchestrator::{Attack, AttackParams, AttackSummary};
pub use payment::{
    FailureReason, HtlcAttempt, JamPair, PaymentExecutor, PaymentRequest, PaymentResult,
    PendingPayment,
};
pub use protected::{EscalationOutcome, EscalationStop};
pub use report::{FailurePosition, PaymentReport};
pub use reputation::ReputationOutcome;
pub use route::{Hop, NodeId, Route, RouteFinder, ShortChannelId};
pub use slots::{SlotBudget, MAX_ACCEPTED_HTLCS};
pub use topology::{
    ChannelEdge, ChannelPoint, NodeInfo, OpenChannelRequest, TargetsInfo, TopologyManager,
};

/// Amount in millisatoshis
pub type Msat = u64;

/// Position of an attacker-controlled node in the [`NodeRegistry`]
pub type NodeIndex = usize;

/// Absolute block height
pub type BlockHeight = u32;

/// Node that sends protected jams, endorsement probes and prepayments.
pub const SOURCE_NODE: NodeIndex = 0;

/// Round-trip partner of [`SOURCE_NODE`] and sender of the general jams.
pub const REPUTATION_NODE: NodeIndex = 1;

/// Node on the far side of the target's peer that receives (and holds) every jam.
pub const SINK_NODE: NodeIndex = 2;

/// Number of attacker-controlled nodes the harness expects.
pub const ATTACKER_NODE_COUNT: usize = 3;

/// Common error type for the attack engine
#[derive(Debug, Error)]
pub enum AttackError {
    /// The executor could not dispatch a payment
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// Route discovery failed
    #[error("route lookup failed: {0}")]
    Route(String),

    /// A node query (chain height, peers) failed
    #[error("node query failed: {0}")]
    Node(String),

    /// Channel or graph management failed
    #[error("topology error: {0}")]
    Topology(String),

    /// A payment reported a hard error instead of a result
    #[error("payment error: {0}")]
    Payment(String),

    /// A payment result that the modeled protocol should never produce
    #[error("unexpected failure attribution: {0}")]
    Attribution(String),

    /// The registry has no node at this index
    #[error("no attacker node at index {0}")]
    UnknownNode(NodeIndex),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The executor dropped a payment without delivering its result
    #[error("payment result abandoned by executor")]
    Abandoned,

    /// The run was cancelled
    #[error("attack run cancelled")]
    Cancelled,

    /// The run was cancelled while waiting on a batch of payments
    #[error("attack run cancelled with partial report: {0}")]
    Interrupted(report::PaymentReport),

    /// Error raised inside a named phase of the attack
    #[error("{phase}: {source}")]
    Phase {
        /// Phase that failed
        phase: String,
        /// Underlying failure
        #[source]
        source: Box<AttackError>,
    },
}

impl AttackError {
    /// Wrap this error with the name of the phase it was raised in.
    pub fn in_phase(self, phase: impl Into<String>) -> Self {
        AttackError::Phase {
            phase: phase.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a run cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            AttackError::Cancelled | AttackError::Interrupted(_) => true,
            AttackError::Phase { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// The innermost error, with every phase wrapper removed.
    pub fn root(&self) -> &AttackError {
        match self {
            AttackError::Phase { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for attack operations
pub type AttackResult<T> = Result<T, AttackError>;

/// Attach phase context to the error side of an [`AttackResult`].
pub trait PhaseExt<T> {
    /// Wrap an error with the phase it was raised in.
    fn in_phase(self, phase: impl Into<String>) -> AttackResult<T>;
}

impl<T> PhaseExt<T> for AttackResult<T> {
    fn in_phase(self, phase: impl Into<String>) -> AttackResult<T> {
        self.map_err(|e| e.in_phase(phase))
    }
}
