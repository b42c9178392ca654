//! Starts a whole cluster of nodes and supervises it.

pub mod configs;
pub mod error;
mod session;
mod spawner;

use log::info;

use configs::{LaunchConfig, Planner};

pub use error::LauncherError;
pub use session::Session;
pub use spawner::{LocalSpawner, Spawner};

/// Plans and spawns every process of the cluster.
///
/// # Errors
/// Returns a `LauncherError` if the config is invalid or a process can't be spawned.
pub fn launch<S: Spawner>(config: &LaunchConfig, spawner: &S) -> Result<Session, LauncherError> {
    let plans = Planner::new().plan(config)?;
    info!(
        workers = config.num_workers,
        servers = config.num_servers;
        "launching {} process(es)",
        plans.len()
    );

    Session::start(&config.command, plans, spawner)
}
