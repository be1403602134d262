//! # Payment Dispatch Contract
//!
//! The engine never issues payments itself. It hands a [`PaymentRequest`] and a
//! route to a [`PaymentExecutor`], which returns a [`PendingPayment`] that resolves
//! exactly once with a [`PaymentResult`]. The executor is responsible for holding
//! the payment at the destination, settling it, or failing it back.

use crate::{AttackError, AttackResult, Msat, NodeIndex, Route};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Instructions for a single payment; immutable once dispatched
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Amount delivered to the destination
    pub amount_msat: Msat,
    /// Sending attacker node
    pub source: NodeIndex,
    /// Receiving attacker node
    pub dest: NodeIndex,
    /// Whether the sender endorses the outgoing HTLC
    pub endorse_outgoing: bool,
    /// How long the destination holds the HTLC before failing it back
    pub settle_wait: Duration,
    /// Settle immediately on arrival instead of holding
    pub settle: bool,
    /// Signal that releases a held HTLC early
    pub early_cancel: Option<CancellationToken>,
}

impl PaymentRequest {
    /// An unendorsed payment that the destination settles as soon as it arrives.
    pub fn settled(amount_msat: Msat, source: NodeIndex, dest: NodeIndex) -> Self {
        Self {
            amount_msat,
            source,
            dest,
            endorse_outgoing: false,
            settle_wait: Duration::ZERO,
            settle: true,
            early_cancel: None,
        }
    }

    /// A payment the destination holds for `settle_wait` and then fails back.
    pub fn held(
        amount_msat: Msat,
        source: NodeIndex,
        dest: NodeIndex,
        endorse_outgoing: bool,
        settle_wait: Duration,
    ) -> Self {
        Self {
            amount_msat,
            source,
            dest,
            endorse_outgoing,
            settle_wait,
            settle: false,
            early_cancel: None,
        }
    }

    /// Release the hold early when `cancel` fires.
    pub fn with_early_cancel(mut self, cancel: CancellationToken) -> Self {
        self.early_cancel = Some(cancel);
        self
    }
}

/// Terminal outcome reported by the sender's node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// The payment succeeded
    None,
    /// The payment timed out before completing
    Timeout,
    /// No route could be found
    NoRoute,
    /// The payment failed with a non-specific error
    Error,
    /// The destination rejected the payment details
    IncorrectPaymentDetails,
    /// The sender could not afford the payment
    InsufficientBalance,
}

impl FailureReason {
    pub fn is_success(&self) -> bool {
        matches!(self, FailureReason::None)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::None => "none",
            FailureReason::Timeout => "timeout",
            FailureReason::NoRoute => "no route",
            FailureReason::Error => "error",
            FailureReason::IncorrectPaymentDetails => "incorrect payment details",
            FailureReason::InsufficientBalance => "insufficient balance",
        };
        write!(f, "{s}")
    }
}

/// Per-HTLC detail of a payment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HtlcAttempt {
    /// Whether the HTLC arrived at the destination endorsed
    pub incoming_endorsed: bool,
}

/// Outcome of one dispatched payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Hard error that prevented a normal result
    pub error: Option<String>,
    /// Terminal failure reason
    pub failure_reason: FailureReason,
    /// Route position of the node that failed each HTLC (0 is the sender)
    pub failure_indices: Vec<u32>,
    /// HTLC attempts that made up the payment
    pub htlcs: Vec<HtlcAttempt>,
}

impl PaymentResult {
    /// A settled payment.
    pub fn settled(htlcs: Vec<HtlcAttempt>) -> Self {
        Self {
            error: None,
            failure_reason: FailureReason::None,
            failure_indices: Vec::new(),
            htlcs,
        }
    }

    /// A payment failed back by the node at route position `index`.
    pub fn failed_at(index: u32, incoming_endorsed: bool) -> Self {
        Self {
            error: None,
            failure_reason: FailureReason::IncorrectPaymentDetails,
            failure_indices: vec![index],
            htlcs: vec![HtlcAttempt { incoming_endorsed }],
        }
    }

    /// A payment that could not produce a result at all.
    pub fn hard_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            failure_reason: FailureReason::Error,
            failure_indices: Vec::new(),
            htlcs: Vec::new(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.error.is_none() && self.failure_reason.is_success()
    }

    /// Whether any HTLC reached the destination endorsed.
    pub fn any_endorsed(&self) -> bool {
        self.htlcs.iter().any(|htlc| htlc.incoming_endorsed)
    }

    /// Turn a hard error into an [`AttackError::Payment`].
    pub fn check_error(&self) -> AttackResult<()> {
        match &self.error {
            Some(e) => Err(AttackError::Payment(e.clone())),
            None => Ok(()),
        }
    }
}

/// Sending half of a payment's single-delivery result channel
pub type ResultSender = oneshot::Sender<PaymentResult>;

/// Pending result of a dispatched payment; resolves exactly once
#[derive(Debug)]
pub struct PendingPayment {
    receiver: oneshot::Receiver<PaymentResult>,
}

impl PendingPayment {
    /// Create the result channel for one payment.
    pub fn channel() -> (ResultSender, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// A payment whose result is already known.
    pub fn ready(result: PaymentResult) -> Self {
        let (sender, pending) = Self::channel();
        // The receiver is alive, so the send cannot fail.
        let _ = sender.send(result);
        pending
    }
}

impl Future for PendingPayment {
    type Output = AttackResult<PaymentResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| AttackError::Abandoned))
    }
}

/// A dispatched jamming payment and its pending result, kept together so that
/// results can be collected in dispatch order
#[derive(Debug)]
pub struct JamPair {
    pub request: PaymentRequest,
    pub pending: PendingPayment,
}

/// Issues, holds, settles and fails payments on the network
#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    /// Send `request` over `route`, returning a handle to its eventual result.
    async fn dispatch(&self, request: PaymentRequest, route: &Route) -> AttackResult<PendingPayment>;
}
