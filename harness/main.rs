// Author: Ayush Srivastava
//! Runs a reputation jamming attack against the simulated network and prints
//! the run summary as JSON.
//!
//! Ctrl-C cancels the run; held payments are abandoned and every task is
//! joined before the process exits.

use anyhow::{Context, Result};
use jamming_harness::{logging, run_simulated, CliArgs, HarnessSettings, SimNetwork};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let settings = HarnessSettings::load(&args)?;

    if args.print_settings {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    logging::init(args.log_level.as_deref())?;

    let shutdown = CancellationToken::new();
    let network = SimNetwork::new(settings.simnet.clone(), shutdown.clone())?;

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling attack");
            interrupt.cancel();
        }
    });

    let summary = run_simulated(&settings, network).await?;
    info!("{summary}");

    let json = serde_json::to_string_pretty(&summary).context("encode summary")?;
    println!("{json}");
    Ok(())
}
