use std::{collections::BTreeMap, fmt};

use super::LaunchConfig;
use crate::error::LauncherError;

/// Variables the planner sets itself, the launch config can't override them.
const RESERVED: [&str; 5] = [
    "NODE_ROLE",
    "NODE_HOST",
    "SCHEDULER_ADDR",
    "NUM_WORKERS",
    "NUM_SERVERS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Scheduler,
    Server,
    Worker,
}

impl Role {
    /// The value of `NODE_ROLE` for this role.
    pub fn as_env(&self) -> &'static str {
        match self {
            Role::Scheduler => "scheduler",
            Role::Server => "server",
            Role::Worker => "worker",
        }
    }
}

/// One process to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessPlan {
    pub role: Role,
    /// Position among the processes of the same role.
    pub index: usize,
    pub host: String,
    pub env: BTreeMap<String, String>,
}

impl ProcessPlan {
    pub fn name(&self) -> String {
        match self.role {
            Role::Scheduler => "scheduler".into(),
            role => format!("{}-{}", role.as_env(), self.index),
        }
    }
}

impl fmt::Display for ProcessPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.host)
    }
}

/// Turns a `LaunchConfig` into the processes that make up the cluster.
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// Plans one scheduler on the first host, one server on each of the first
    /// `num_servers` hosts and one worker on each of the first `num_workers`.
    ///
    /// # Arguments
    /// * `config` - What to launch.
    ///
    /// # Returns
    /// The scheduler first, then the servers and the workers, or an
    /// `InvalidConfig` error.
    pub fn plan(&self, config: &LaunchConfig) -> Result<Vec<ProcessPlan>, LauncherError> {
        self.validate(config)?;

        let scheduler_host = &config.hosts[0];
        let scheduler_addr = format!("{scheduler_host}:{}", config.scheduler_port);

        let plan = |role: Role, index: usize, host: &String| {
            let mut env = config.env.clone();
            env.extend([
                ("NODE_ROLE".to_string(), role.as_env().to_string()),
                ("NODE_HOST".to_string(), host.clone()),
                ("SCHEDULER_ADDR".to_string(), scheduler_addr.clone()),
                ("NUM_WORKERS".to_string(), config.num_workers.to_string()),
                ("NUM_SERVERS".to_string(), config.num_servers.to_string()),
            ]);

            ProcessPlan {
                role,
                index,
                host: host.clone(),
                env,
            }
        };

        let mut plans = vec![plan(Role::Scheduler, 0, scheduler_host)];
        for (i, host) in config.hosts.iter().take(config.num_servers).enumerate() {
            plans.push(plan(Role::Server, i, host));
        }
        for (i, host) in config.hosts.iter().take(config.num_workers).enumerate() {
            plans.push(plan(Role::Worker, i, host));
        }

        Ok(plans)
    }

    fn validate(&self, config: &LaunchConfig) -> Result<(), LauncherError> {
        if config.num_workers == 0 || config.num_servers == 0 {
            return Err(LauncherError::InvalidConfig(
                "a cluster needs at least one worker and one server".into(),
            ));
        }

        let needed = config.num_workers.max(config.num_servers);
        if config.hosts.len() < needed {
            return Err(LauncherError::InvalidConfig(format!(
                "{needed} hosts are needed, only {} given",
                config.hosts.len()
            )));
        }

        if config.command.is_empty() {
            return Err(LauncherError::InvalidConfig("the command is empty".into()));
        }

        if let Some(var) = RESERVED.iter().find(|var| config.env.contains_key(**var)) {
            return Err(LauncherError::InvalidConfig(format!(
                "{var} is set by the launcher"
            )));
        }

        Ok(())
    }
}
