//! Tunable parameters of the attack engine.

use crate::{AttackError, AttackResult, Msat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attack configuration; defaults match a regtest-style deployment with
/// 5 minute blocks and a 90 second reputation revenue window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Amount of each settled reputation round-trip payment
    pub reputation_amount_msat: Msat,
    /// Amount of the periodic endorsement probe (just above dust)
    pub endorsement_probe_amount_msat: Msat,
    /// Send an endorsement probe after every this many rounds
    pub probe_interval_rounds: u64,
    /// Give up building reputation after this many rounds
    pub max_reputation_rounds: u64,
    /// Hold time of the endorsement probe (milliseconds)
    pub endorsement_probe_wait_ms: u64,

    /// Amount of each jamming payment (just above dust)
    pub jam_amount_msat: Msat,
    /// Requested hold of the general slot jams (milliseconds)
    pub general_hold_ms: u64,
    /// Blocks of margin kept before the final hop's expiry
    pub safety_margin_blocks: u32,
    /// Assumed average block interval (seconds)
    pub block_interval_secs: u64,

    /// HTLCs prepaid in the first escalation round
    pub initial_prepay_batch: u64,
    /// Most HTLCs prepaid in a single escalation round
    pub max_prepay_batch: u64,
    /// Amount of the settled prepayment carrying the inflated fee
    pub prepay_amount_msat: Msat,
    /// Revenue window the target's reputation is measured over (seconds)
    pub revenue_window_secs: u64,
    /// Per-block cost multiplier applied to the target's fee
    pub cltv_cost: u64,
    /// Hold time of each protected-access probe (milliseconds)
    pub protected_probe_wait_ms: u64,
    /// Safety timeout shared by a whole protected probe (milliseconds)
    pub probe_timeout_ms: u64,

    /// Requested duration of the protected slot jam (milliseconds)
    pub protected_hold_ms: u64,
    /// Hold time of each fast jam payment (milliseconds)
    pub fast_jam_wait_ms: u64,
    /// Pause after every this many initial fast jam launches
    pub ramp_batch_size: usize,
    /// Length of the ramp-up pause (milliseconds)
    pub ramp_pause_ms: u64,
    /// Log dispatch progress after every this many jams
    pub progress_log_interval: u64,

    /// Capacity of every channel the attacker opens (satoshis)
    pub channel_capacity_sat: u64,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            reputation_amount_msat: 500_000_000,
            endorsement_probe_amount_msat: 400_000,
            probe_interval_rounds: 10,
            max_reputation_rounds: 100_000,
            endorsement_probe_wait_ms: 15_000,
            jam_amount_msat: 400_000,
            general_hold_ms: 60 * 60 * 1000,
            safety_margin_blocks: 10,
            block_interval_secs: 5 * 60,
            initial_prepay_batch: 10,
            max_prepay_batch: 30,
            prepay_amount_msat: 555_000_000,
            revenue_window_secs: 90,
            cltv_cost: 1,
            protected_probe_wait_ms: 30_000,
            probe_timeout_ms: 60_000,
            protected_hold_ms: 10 * 60 * 1000,
            fast_jam_wait_ms: 60_000,
            ramp_batch_size: 50,
            ramp_pause_ms: 5_000,
            progress_log_interval: 200,
            channel_capacity_sat: 16_777_215,
        }
    }
}

impl AttackConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how often the reputation builder probes, and when it gives up
    pub fn with_reputation_rounds(mut self, probe_interval: u64, max_rounds: u64) -> Self {
        self.probe_interval_rounds = probe_interval;
        self.max_reputation_rounds = max_rounds;
        self
    }

    /// Set the opening and maximum prepay batch sizes
    pub fn with_prepay_batches(mut self, initial: u64, max: u64) -> Self {
        self.initial_prepay_batch = initial;
        self.max_prepay_batch = max;
        self
    }

    /// Set the requested general and protected jam durations
    pub fn with_holds(mut self, general: Duration, protected: Duration) -> Self {
        self.general_hold_ms = general.as_millis() as u64;
        self.protected_hold_ms = protected.as_millis() as u64;
        self
    }

    /// Set the protected probe hold and its shared safety timeout
    pub fn with_probe_timing(mut self, probe_wait: Duration, timeout: Duration) -> Self {
        self.protected_probe_wait_ms = probe_wait.as_millis() as u64;
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the fast jam hold and its ramp-up pacing
    pub fn with_fast_jam(mut self, wait: Duration, ramp_batch: usize, ramp_pause: Duration) -> Self {
        self.fast_jam_wait_ms = wait.as_millis() as u64;
        self.ramp_batch_size = ramp_batch;
        self.ramp_pause_ms = ramp_pause.as_millis() as u64;
        self
    }

    pub fn endorsement_probe_wait(&self) -> Duration {
        Duration::from_millis(self.endorsement_probe_wait_ms)
    }

    pub fn general_hold(&self) -> Duration {
        Duration::from_millis(self.general_hold_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_secs(self.block_interval_secs)
    }

    pub fn revenue_window(&self) -> Duration {
        Duration::from_secs(self.revenue_window_secs)
    }

    pub fn protected_probe_wait(&self) -> Duration {
        Duration::from_millis(self.protected_probe_wait_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn protected_hold(&self) -> Duration {
        Duration::from_millis(self.protected_hold_ms)
    }

    pub fn fast_jam_wait(&self) -> Duration {
        Duration::from_millis(self.fast_jam_wait_ms)
    }

    pub fn ramp_pause(&self) -> Duration {
        Duration::from_millis(self.ramp_pause_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AttackResult<()> {
        if self.probe_interval_rounds == 0 {
            return Err(AttackError::InvalidConfig(
                "probe interval must be positive".to_string(),
            ));
        }

        if self.max_prepay_batch == 0 {
            return Err(AttackError::InvalidConfig(
                "max prepay batch must be positive".to_string(),
            ));
        }

        if self.initial_prepay_batch == 0 || self.initial_prepay_batch > self.max_prepay_batch {
            return Err(AttackError::InvalidConfig(format!(
                "initial prepay batch {} must be in 1..={}",
                self.initial_prepay_batch, self.max_prepay_batch
            )));
        }

        if self.block_interval_secs == 0 || self.revenue_window_secs == 0 {
            return Err(AttackError::InvalidConfig(
                "block interval and revenue window must be positive".to_string(),
            ));
        }

        if self.ramp_batch_size == 0 || self.progress_log_interval == 0 {
            return Err(AttackError::InvalidConfig(
                "ramp batch and progress interval must be positive".to_string(),
            ));
        }

        if self.probe_timeout_ms == 0 || self.fast_jam_wait_ms == 0 {
            return Err(AttackError::InvalidConfig(
                "probe timeout and fast jam wait must be positive".to_string(),
            ));
        }

        if self.jam_amount_msat == 0 || self.endorsement_probe_amount_msat == 0 {
            return Err(AttackError::InvalidConfig(
                "jam and probe amounts must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
