use std::{num::NonZeroUsize, time::Duration};

use scheduler::RetryPolicy;

const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(32).unwrap();

/// Immutable execution bounds for a worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub scheduler_addr: String,
    /// This host's address, reported to the scheduler.
    pub host: String,
    pub heartbeat_interval: Duration,
    /// Bounds the attempts to reach the scheduler.
    pub retry: RetryPolicy,
    /// Bounds the retries of one shard request after a transient failure.
    pub kv_retry: RetryPolicy,
    pub epochs: usize,
    pub batch_size: NonZeroUsize,
    /// Makes the shuffles reproducible, each rank derives its own stream from it.
    pub seed: Option<u64>,
}

impl WorkerConfig {
    /// Creates a new worker configuration for a single epoch of batches of 32.
    ///
    /// # Args
    /// * `scheduler_addr` - Where the scheduler listens.
    ///
    /// # Returns
    /// A `WorkerConfig` instance.
    pub fn new(scheduler_addr: impl Into<String>) -> Self {
        Self {
            scheduler_addr: scheduler_addr.into(),
            host: "127.0.0.1".into(),
            heartbeat_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            kv_retry: RetryPolicy::default(),
            epochs: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            seed: None,
        }
    }
}
