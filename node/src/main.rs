use anyhow::{Context, Result, bail};
use comms::specs::ShutdownReason;
use log::{info, warn};
use node::NodeConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = NodeConfig::from_env()
        .context("invalid node configuration")?;
    let role = config.role;

    // Members that vanish are presumed dead by the scheduler, which fails the run.
    let reason = tokio::select! {
        reason = node::run(config, CancellationToken::new()) => reason?,
        _ = signal::ctrl_c() => {
            warn!(role:? = role; "interrupted");
            bail!("interrupted");
        }
    };

    match reason {
        ShutdownReason::Completed => {
            info!("training completed");
            Ok(())
        }
        ShutdownReason::Failed { reason } => bail!("run failed: {reason}"),
    }
}
