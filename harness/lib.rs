//! Jamming Attack Harness
//!
//! Process-level tooling around the attack engine: layered settings, the
//! command line, logging setup, and a simulated network that stands in for
//! the attacker, target and peer nodes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jamming_harness::{run_simulated, HarnessSettings, SimNetwork};
//! use tokio_util::sync::CancellationToken;
//!
//! let settings = HarnessSettings::default();
//! let network = SimNetwork::new(settings.simnet.clone(), CancellationToken::new())?;
//! let summary = run_simulated(&settings, network).await?;
//! println!("{}", serde_json::to_string_pretty(&summary)?);
//! ```

use anyhow::{Context, Result};
use jamming_attack::{Attack, AttackContext, AttackParams, AttackSummary};
use std::sync::Arc;
use tracing::{error, info};

pub mod cli;
pub mod logging;
pub mod settings;
pub mod simnet;

pub use cli::CliArgs;
pub use settings::HarnessSettings;
pub use simnet::{LinkUsage, SimNetwork, SimParams};

/// Run one attack against `network`, clean up if asked, and abandon whatever
/// is still held once the run is over.
///
/// Cancelling the network's shutdown token aborts the run.
pub async fn run_simulated(settings: &HarnessSettings, network: Arc<SimNetwork>) -> Result<AttackSummary> {
    let target = settings.target_id()?.unwrap_or_else(|| network.target_id());

    let ctx = AttackContext::new(
        network.node_registry()?,
        network.clone(),
        network.clone(),
        network.clone(),
        settings.attack.clone(),
    )?
    .with_shutdown(network.shutdown_token().clone());

    let attack = Attack::new(
        ctx,
        AttackParams::new(target, settings.target_peer_alias.clone(), settings.strategy),
    );

    info!(
        "Attacking {target} via peer {} with {} protected jams",
        settings.target_peer_alias, settings.strategy
    );
    let result = attack.run().await;

    if settings.cleanup {
        match attack.cleanup(settings.force_close).await {
            Ok(closed) => info!("Cleanup closed {closed} channels"),
            Err(e) => error!("Cleanup failed: {e}"),
        }
    }

    network.shutdown().await;
    result.context("attack run")
}
