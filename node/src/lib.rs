//! A single cluster member, its role and settings come from the environment.

mod config;

use anyhow::{Context, Result};
use comms::specs::ShutdownReason;
use log::info;
use tokio_util::sync::CancellationToken;
use worker::{LinearRegression, Worker};

pub use config::{ConfigErr, NodeConfig, Role};

/// Runs the member described by `config` until the run ends.
///
/// # Arguments
/// * `config` - The node configuration.
/// * `cancel` - Cancelled once the scheduler ends the run.
///
/// # Returns
/// How the run ended or the error that kept this member from taking part.
pub async fn run(config: NodeConfig, cancel: CancellationToken) -> Result<ShutdownReason> {
    info!(role:? = config.role, scheduler:% = config.scheduler_addr; "starting node");

    match config.role {
        Role::Scheduler => scheduler::serve(config.scheduler_config())
            .await
            .context("scheduler failed"),
        Role::Server => parameter_server::run(config.server_config())
            .await
            .context("parameter server failed"),
        Role::Worker => {
            let compute = LinearRegression::new(config.dataset_len);
            let mut worker = Worker::new(config.worker_config(), compute);

            let reason = worker.run(cancel).await.context("worker failed")?;
            info!(steps = worker.steps(); "worker finished");
            Ok(reason)
        }
    }
}
