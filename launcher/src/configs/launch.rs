use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::LauncherError;

const DEFAULT_SCHEDULER_PORT: u16 = 7070;

/// What to launch, read from a JSON file.
///
/// ```json
/// {
///   "num_workers": 2,
///   "num_servers": 1,
///   "hosts": ["127.0.0.1", "127.0.0.1"],
///   "command": ["target/release/node"],
///   "env": { "EPOCHS": "5", "SYNC_MODE": "async" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchConfig {
    pub num_workers: usize,
    pub num_servers: usize,
    /// One entry per machine, the first one also hosts the scheduler.
    pub hosts: Vec<String>,
    /// The node program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default = "default_scheduler_port")]
    pub scheduler_port: u16,
    /// Extra variables handed to every process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_scheduler_port() -> u16 {
    DEFAULT_SCHEDULER_PORT
}

impl LaunchConfig {
    /// Parses a `LaunchConfig` out of its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, LauncherError> {
        serde_json::from_str(json).map_err(|e| LauncherError::InvalidConfig(e.to_string()))
    }
}
