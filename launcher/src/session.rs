use std::{io, process::ExitStatus};

use log::{error, info, warn};
use tokio::task::JoinSet;

use crate::{configs::ProcessPlan, error::LauncherError, spawner::Spawner};

/// The processes of a launched cluster, supervised until they all exit.
///
/// Children are killed when dropped, so dropping the session tears the
/// cluster down.
pub struct Session {
    tasks: JoinSet<(String, io::Result<ExitStatus>)>,
}

impl Session {
    /// Spawns every planned process, in order.
    ///
    /// # Arguments
    /// * `command` - The node program followed by its arguments.
    /// * `plans` - The processes to start.
    /// * `spawner` - How to start them.
    ///
    /// # Returns
    /// A new `Session`, or a `SpawnFailed` error after killing what was already running.
    pub fn start<S: Spawner>(
        command: &[String],
        plans: Vec<ProcessPlan>,
        spawner: &S,
    ) -> Result<Self, LauncherError> {
        let mut tasks = JoinSet::new();

        for plan in plans {
            let name = plan.name();
            let mut child = spawner
                .spawn(&plan, command)
                .map_err(|source| LauncherError::SpawnFailed {
                    name: name.clone(),
                    source,
                })?;

            info!(process:% = plan, pid:? = child.id(); "spawned");
            tasks.spawn(async move { (name, child.wait().await) });
        }

        Ok(Self { tasks })
    }

    /// The amount of processes still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every process to exit successfully.
    ///
    /// # Returns
    /// The first failure, once the remaining processes have been killed.
    pub async fn wait(mut self) -> Result<(), LauncherError> {
        while let Some(res) = self.tasks.join_next().await {
            let (name, status) = res.map_err(io::Error::other)?;
            let status = status?;

            if !status.success() {
                error!(process = name.as_str(), status:% = status; "process failed");
                self.kill_all().await;
                return Err(LauncherError::ProcessFailed { name, status });
            }

            info!(process = name.as_str(); "process exited");
        }

        Ok(())
    }

    /// Kills every process still running.
    pub async fn kill_all(&mut self) {
        if !self.tasks.is_empty() {
            warn!(remaining = self.tasks.len(); "killing the remaining processes");
        }

        self.tasks.shutdown().await;
    }
}
