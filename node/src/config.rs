use std::{env, error::Error, fmt, num::NonZeroUsize, str::FromStr, time::Duration};

use comms::specs::{OptimizerSpec, SyncMode};
use parameter_server::ServerConfig;
use serde::de::DeserializeOwned;
use scheduler::{RetryPolicy, SchedulerConfig};
use worker::WorkerConfig;

const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(32).unwrap();

/// Members retry reaching the scheduler for a while, it may come up after them.
const SCHEDULER_RETRY: RetryPolicy = RetryPolicy {
    max_retries: 10,
    backoff: Duration::from_millis(100),
};

/// What a node process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Server,
    Scheduler,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker" => Ok(Self::Worker),
            "server" => Ok(Self::Server),
            "scheduler" => Ok(Self::Scheduler),
            other => Err(format!(
                "unknown role {other}, expected worker, server or scheduler"
            )),
        }
    }
}

/// A missing or malformed environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErr {
    Missing(&'static str),
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Missing(var) => write!(f, "{var} is not set"),
            ConfigErr::Invalid { var, value, reason } => {
                write!(f, "{var}={value:?} is invalid: {reason}")
            }
        }
    }
}

impl Error for ConfigErr {}

/// Everything a node process is configured with, as set by the launcher.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: Role,
    pub scheduler_addr: String,
    pub num_workers: usize,
    pub num_servers: usize,
    pub host: String,
    pub server_port: u16,
    pub heartbeat_interval: Duration,
    pub max_missed_heartbeats: u32,
    pub sync: SyncMode,
    pub step_timeout: Duration,
    pub max_missed_steps: u32,
    pub optimizer: OptimizerSpec,
    pub epochs: usize,
    pub batch_size: NonZeroUsize,
    pub seed: Option<u64>,
    pub kv_retry: RetryPolicy,
    pub dataset_len: usize,
}

/// Reads typed variables out of a lookup function.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var).filter(|value| !value.is_empty())
    }

    fn required<T>(&self, var: &'static str) -> Result<T, ConfigErr>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.optional(var)?.ok_or(ConfigErr::Missing(var))
    }

    fn optional<T>(&self, var: &'static str) -> Result<Option<T>, ConfigErr>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(value) = self.raw(var) else {
            return Ok(None);
        };

        match value.parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigErr::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn or<T>(&self, var: &'static str, default: T) -> Result<T, ConfigErr>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigErr> {
        self.or(var, default).map(Duration::from_millis)
    }

    fn json<T: DeserializeOwned>(&self, var: &'static str, default: T) -> Result<T, ConfigErr> {
        let Some(value) = self.raw(var) else {
            return Ok(default);
        };

        serde_json::from_str(&value).map_err(|e| ConfigErr::Invalid {
            var,
            reason: e.to_string(),
            value,
        })
    }
}

impl NodeConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigErr> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, empty values count as unset.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable.
    ///
    /// # Returns
    /// The configuration or the first `ConfigErr` found.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let sync = match vars.raw("SYNC_MODE").as_deref() {
            None | Some("sync") => SyncMode::Sync,
            Some("async") => SyncMode::Async,
            Some(other) => {
                return Err(ConfigErr::Invalid {
                    var: "SYNC_MODE",
                    value: other.into(),
                    reason: "expected sync or async".into(),
                });
            }
        };

        let config = Self {
            role: vars.required("NODE_ROLE")?,
            scheduler_addr: vars.required("SCHEDULER_ADDR")?,
            num_workers: vars.required("NUM_WORKERS")?,
            num_servers: vars.required("NUM_SERVERS")?,
            host: vars.or("NODE_HOST", "127.0.0.1".to_string())?,
            server_port: vars.or("SERVER_PORT", 0)?,
            heartbeat_interval: vars.millis("HEARTBEAT_MS", 1000)?,
            max_missed_heartbeats: vars.or("MAX_MISSED_HEARTBEATS", 5)?,
            sync,
            step_timeout: vars.millis("STEP_TIMEOUT_MS", 30_000)?,
            max_missed_steps: vars.or("MAX_MISSED_STEPS", 3)?,
            optimizer: vars.json("OPTIMIZER", OptimizerSpec::default())?,
            epochs: vars.or("EPOCHS", 1)?,
            batch_size: vars.or("BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            seed: vars.optional("SEED")?,
            kv_retry: RetryPolicy::new(
                vars.or("KV_RETRIES", 3)?,
                vars.millis("KV_BACKOFF_MS", 100)?,
            ),
            dataset_len: vars.or("DATASET_LEN", 1024)?,
        };

        if config.num_workers == 0 || config.num_servers == 0 {
            return Err(ConfigErr::Invalid {
                var: if config.num_workers == 0 { "NUM_WORKERS" } else { "NUM_SERVERS" },
                value: "0".into(),
                reason: "a cluster needs at least one worker and one server".into(),
            });
        }

        let zero = if config.heartbeat_interval.is_zero() {
            Some("HEARTBEAT_MS")
        } else if config.max_missed_heartbeats == 0 {
            Some("MAX_MISSED_HEARTBEATS")
        } else if config.max_missed_steps == 0 {
            Some("MAX_MISSED_STEPS")
        } else {
            None
        };
        if let Some(var) = zero {
            return Err(ConfigErr::Invalid {
                var,
                value: "0".into(),
                reason: "liveness settings must be positive".into(),
            });
        }

        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            addr: self.scheduler_addr.clone(),
            num_workers: self.num_workers,
            num_servers: self.num_servers,
            heartbeat_interval: self.heartbeat_interval,
            max_missed_heartbeats: self.max_missed_heartbeats,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            scheduler_addr: self.scheduler_addr.clone(),
            host: self.host.clone(),
            port: self.server_port,
            heartbeat_interval: self.heartbeat_interval,
            retry: SCHEDULER_RETRY,
            optimizer: self.optimizer,
            sync: self.sync,
            step_timeout: self.step_timeout,
            max_missed_steps: self.max_missed_steps,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            scheduler_addr: self.scheduler_addr.clone(),
            host: self.host.clone(),
            heartbeat_interval: self.heartbeat_interval,
            retry: SCHEDULER_RETRY,
            kv_retry: self.kv_retry,
            epochs: self.epochs,
            batch_size: self.batch_size,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |var| vars.get(var).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("NODE_ROLE", "worker"),
        ("SCHEDULER_ADDR", "10.0.0.1:9000"),
        ("NUM_WORKERS", "4"),
        ("NUM_SERVERS", "2"),
    ];

    #[test]
    fn defaults_fill_the_optional_variables() {
        let config = NodeConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.role, Role::Worker);
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.server_port, 0);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.max_missed_heartbeats, 5);
        assert_eq!(config.sync, SyncMode::Sync);
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(
            config.optimizer,
            OptimizerSpec::GradientDescent { learning_rate: 0.1 }
        );
        assert_eq!(config.batch_size.get(), 32);
        assert_eq!(config.seed, None);
        assert_eq!(
            config.kv_retry,
            RetryPolicy::new(3, Duration::from_millis(100))
        );
        assert_eq!(config.dataset_len, 1024);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("NODE_ROLE", "server"),
            ("SYNC_MODE", "async"),
            (
                "OPTIMIZER",
                r#"{"adam":{"learning_rate":0.01,"beta1":0.9,"beta2":0.999,"epsilon":1e-8}}"#,
            ),
            ("SEED", "42"),
            ("HEARTBEAT_MS", "250"),
        ]);

        let config = NodeConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.sync, SyncMode::Async);
        assert!(matches!(config.optimizer, OptimizerSpec::Adam { .. }));
        assert_eq!(config.seed, Some(42));

        let server = config.server_config();
        assert_eq!(server.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(server.sync, SyncMode::Async);
    }

    #[test]
    fn missing_and_malformed_variables_are_reported() {
        let err = NodeConfig::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert_eq!(err, ConfigErr::Missing("NODE_ROLE"));

        let mut vars = REQUIRED.to_vec();
        vars.push(("NUM_WORKERS", "many"));
        let err = NodeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigErr::Invalid { var: "NUM_WORKERS", .. }));

        let mut vars = REQUIRED.to_vec();
        vars.push(("SYNC_MODE", "eventually"));
        assert!(NodeConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("NODE_ROLE", "observer"));
        assert!(NodeConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn zero_liveness_settings_are_refused() {
        for var in ["HEARTBEAT_MS", "MAX_MISSED_HEARTBEATS", "MAX_MISSED_STEPS"] {
            let mut vars = REQUIRED.to_vec();
            vars.push((var, "0"));

            let err = NodeConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(
                matches!(err, ConfigErr::Invalid { var: v, .. } if v == var),
                "{var}: {err}"
            );
        }

        let mut vars = REQUIRED.to_vec();
        vars.push(("STEP_TIMEOUT_MS", "0"));
        assert!(NodeConfig::from_lookup(lookup(&vars)).is_ok());
    }
}
