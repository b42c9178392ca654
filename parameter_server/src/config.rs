use std::time::Duration;

use comms::{
    ShardId,
    specs::{OptimizerSpec, SyncMode},
};
use scheduler::RetryPolicy;

/// Settings of one parameter server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub scheduler_addr: String,
    /// The host to bind and advertise to the workers.
    pub host: String,
    /// Zero picks any free port.
    pub port: u16,
    pub heartbeat_interval: Duration,
    /// Bounds the attempts to reach the scheduler.
    pub retry: RetryPolicy,
    pub optimizer: OptimizerSpec,
    pub sync: SyncMode,
    /// How long a synchronous step waits for the slowest worker.
    pub step_timeout: Duration,
    /// Consecutive missed steps before a worker is reported dead.
    pub max_missed_steps: u32,
}

impl ServerConfig {
    /// Creates a new `ServerConfig` for a synchronous gradient descent shard on a local ephemeral port.
    ///
    /// # Arguments
    /// * `scheduler_addr` - Where the scheduler listens.
    ///
    /// # Returns
    /// A new `ServerConfig` instance.
    pub fn new(scheduler_addr: impl Into<String>) -> Self {
        Self {
            scheduler_addr: scheduler_addr.into(),
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            optimizer: OptimizerSpec::default(),
            sync: SyncMode::default(),
            step_timeout: Duration::from_secs(30),
            max_missed_steps: 3,
        }
    }

    /// Completes this configuration with what the scheduler assigned.
    pub fn spec(&self, shard_id: ShardId, num_shards: usize, num_workers: usize) -> ServerSpec {
        ServerSpec {
            shard_id,
            num_shards,
            num_workers,
            optimizer: self.optimizer,
            sync: self.sync,
            step_timeout: self.step_timeout,
            max_missed_steps: self.max_missed_steps,
        }
    }
}

/// Everything needed to build the shard served by a `ParameterServer`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerSpec {
    pub shard_id: ShardId,
    pub num_shards: usize,
    pub num_workers: usize,
    pub optimizer: OptimizerSpec,
    pub sync: SyncMode,
    pub step_timeout: Duration,
    pub max_missed_steps: u32,
}
