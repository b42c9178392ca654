use serde::{Deserialize, Serialize};

use crate::{ParameterKey, PushMode, Shape};

/// Declares a key and its initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitHeader {
    pub key: ParameterKey,
    pub shape: Shape,
}

/// A worker's update for one key at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushHeader {
    pub key: ParameterKey,
    pub shape: Shape,
    pub mode: PushMode,
    pub step: u64,
}

/// A shard's current value for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueHeader {
    pub key: ParameterKey,
    pub shape: Shape,
    pub version: u64,
}
