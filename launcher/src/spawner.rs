use std::io;

use tokio::process::{Child, Command};

use crate::configs::ProcessPlan;

/// Starts the process described by a plan.
pub trait Spawner {
    /// # Arguments
    /// * `plan` - The process to start.
    /// * `command` - The program followed by its arguments.
    ///
    /// # Returns
    /// The started child, killed once dropped.
    fn spawn(&self, plan: &ProcessPlan, command: &[String]) -> io::Result<Child>;
}

/// Runs every process on this machine, whatever host it was planned on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSpawner;

impl Spawner for LocalSpawner {
    fn spawn(&self, plan: &ProcessPlan, command: &[String]) -> io::Result<Child> {
        let Some((program, args)) = command.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
        };

        Command::new(program)
            .args(args)
            .envs(&plan.env)
            .kill_on_drop(true)
            .spawn()
    }
}
