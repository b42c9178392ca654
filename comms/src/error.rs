use std::{error::Error, fmt};

use serde::{Deserialize, Serialize};

use crate::{DType, ParameterKey, Shape, ShardId, specs::ProcessKind};

/// Key-value contract violations, shared by the shard owners and their clients.
///
/// None of these are worth retrying, they mean the cluster is misconfigured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvErr {
    /// The key was never initialized on its shard.
    UnknownKey { key: ParameterKey },
    /// The pushed tensor's layout doesn't match the stored one.
    ShapeMismatch {
        key: ParameterKey,
        expected: (Shape, DType),
        got: (Shape, DType),
    },
    /// The request reached a shard that doesn't own the key.
    NotOwner { key: ParameterKey, owner: ShardId },
}

impl fmt::Display for KvErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvErr::UnknownKey { key } => write!(f, "unknown key {key}"),
            KvErr::ShapeMismatch { key, expected, got } => write!(
                f,
                "shape mismatch for {key}: expected {}/{}, got {}/{}",
                expected.0, expected.1, got.0, got.1
            ),
            KvErr::NotOwner { key, owner } => write!(f, "key {key} is owned by shard {owner}"),
        }
    }
}

impl Error for KvErr {}

/// Errors that cross the wire inside a `Msg::Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErr {
    Kv(KvErr),
    /// The scheduler already holds every expected member of this kind.
    ClusterFull { kind: ProcessKind, capacity: usize },
    /// The peer sent something out of protocol.
    Protocol(String),
}

impl fmt::Display for RemoteErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErr::Kv(e) => e.fmt(f),
            RemoteErr::ClusterFull { kind, capacity } => {
                write!(f, "cluster full: all {capacity} {kind} slots are taken")
            }
            RemoteErr::Protocol(detail) => write!(f, "protocol error: {detail}"),
        }
    }
}

impl Error for RemoteErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RemoteErr::Kv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KvErr> for RemoteErr {
    fn from(value: KvErr) -> Self {
        Self::Kv(value)
    }
}
