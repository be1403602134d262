//! # Harness Settings
//!
//! Settings are layered, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config`)
//! 3. `JAM_`-prefixed environment variables. Nested keys are separated by a
//!    double underscore, e.g. `JAM_ATTACK__PROBE_INTERVAL_ROUNDS=5`
//! 4. Command line flags
//!
//! ## Example
//!
//! ```toml
//! target_peer_alias = "target-peer"
//! strategy = "slow"
//! cleanup = true
//!
//! [attack]
//! protected_hold_ms = 300000
//!
//! [simnet]
//! target_liquidity_msat = 150000000
//! ```

use crate::cli::CliArgs;
use crate::simnet::SimParams;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use jamming_attack::{AttackConfig, JamStrategy, NodeId};
use serde::{Deserialize, Serialize};

/// Prefix of every settings environment variable
pub const ENV_PREFIX: &str = "JAM";

/// Everything one harness run needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Target node public key (hex); the simulated target when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Alias of the target's peer
    pub target_peer_alias: String,
    /// How the protected slots are jammed
    pub strategy: JamStrategy,
    /// Close every attacker channel after the run
    pub cleanup: bool,
    /// Force-close during cleanup
    pub force_close: bool,
    /// Attack engine tunables
    pub attack: AttackConfig,
    /// Simulated network parameters
    pub simnet: SimParams,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        let simnet = SimParams::default();
        Self {
            target: None,
            target_peer_alias: simnet.peer_alias.clone(),
            strategy: JamStrategy::default(),
            cleanup: false,
            force_close: false,
            attack: AttackConfig::default(),
            simnet,
        }
    }
}

impl HarnessSettings {
    /// Resolve every settings layer for `args`.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&Self::default()).context("encode default settings")?);

        if let Some(path) = &args.config {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(target) = &args.target {
            builder = builder.set_override("target", target.as_str())?;
        }
        if let Some(alias) = &args.peer_alias {
            builder = builder.set_override("target_peer_alias", alias.as_str())?;
        }
        if let Some(strategy) = &args.strategy {
            builder = builder.set_override("strategy", strategy.as_str())?;
        }
        if args.cleanup {
            builder = builder.set_override("cleanup", true)?;
        }
        if args.force_close {
            builder = builder.set_override("force_close", true)?;
        }

        let settings: Self = builder
            .build()
            .context("load settings")?
            .try_deserialize()
            .context("decode settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.target_id()?;
        self.attack.validate().context("attack settings")?;
        self.simnet.validate().context("simnet settings")?;
        Ok(())
    }

    /// Configured target identity, if any.
    pub fn target_id(&self) -> Result<Option<NodeId>> {
        self.target
            .as_deref()
            .map(|hex| NodeId::from_hex(hex).context("target"))
            .transpose()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("encode settings")
    }
}
