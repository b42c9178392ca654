use std::time::Duration;

/// Settings of the cluster wide scheduler process.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Where to accept member connections, `host:port`.
    pub addr: String,
    pub num_workers: usize,
    pub num_servers: usize,
    /// How often members are expected to send a heartbeat.
    pub heartbeat_interval: Duration,
    /// Consecutive silent intervals before a member is presumed dead.
    pub max_missed_heartbeats: u32,
}

impl SchedulerConfig {
    /// Creates a new `SchedulerConfig` with a one second heartbeat and five missed beats of slack.
    ///
    /// # Arguments
    /// * `addr` - The listening address.
    /// * `num_workers` - The expected amount of workers.
    /// * `num_servers` - The expected amount of parameter servers.
    ///
    /// # Returns
    /// A new `SchedulerConfig` instance.
    pub fn new(addr: impl Into<String>, num_workers: usize, num_servers: usize) -> Self {
        Self {
            addr: addr.into(),
            num_workers,
            num_servers,
            heartbeat_interval: Duration::from_secs(1),
            max_missed_heartbeats: 5,
        }
    }
}

/// The shortest heartbeat period, a zero interval is raised to it.
const MIN_HEARTBEAT: Duration = Duration::from_millis(1);

/// The period heartbeats and liveness sweeps actually run at.
pub(crate) fn heartbeat_period(interval: Duration) -> Duration {
    interval.max(MIN_HEARTBEAT)
}

/// Bounds the retries of an operation that failed for a transient reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Wait before the first retry, every later retry waits one more multiple of it.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// The wait before retry number `attempt`, counting from zero.
    pub fn delay(&self, attempt: usize) -> Duration {
        self.backoff * (attempt as u32 + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}
