use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Rank, ShardId};

/// The role a process plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Worker,
    Server,
    Scheduler,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Worker => f.write_str("worker"),
            ProcessKind::Server => f.write_str("server"),
            ProcessKind::Scheduler => f.write_str("scheduler"),
        }
    }
}

/// A registered member of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberId {
    Worker(Rank),
    Server(ShardId),
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberId::Worker(rank) => write!(f, "worker {rank}"),
            MemberId::Server(shard) => write!(f, "server {shard}"),
        }
    }
}

/// Sent by a process to the scheduler on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub kind: ProcessKind,
    /// The host the process runs on, for observability.
    pub host: String,
    /// Where a server accepts worker connections, `host:port`.
    pub addr: Option<String>,
}

/// The identity the scheduler hands out on registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    Worker {
        rank: Rank,
        num_workers: usize,
        /// Server addresses indexed by shard id.
        servers: Vec<String>,
    },
    Server {
        shard_id: ShardId,
        num_shards: usize,
        num_workers: usize,
    },
}

impl Assignment {
    pub fn member(&self) -> MemberId {
        match *self {
            Assignment::Worker { rank, .. } => MemberId::Worker(rank),
            Assignment::Server { shard_id, .. } => MemberId::Server(shard_id),
        }
    }
}

/// Why the scheduler is stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    Completed,
    Failed { reason: String },
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Completed => f.write_str("training completed"),
            ShutdownReason::Failed { reason } => write!(f, "run failed: {reason}"),
        }
    }
}
