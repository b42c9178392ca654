use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

/// A worker's identity within one training run.
pub type Rank = usize;

/// The identity of a parameter server, equal to the index of the shard it owns.
pub type ShardId = usize;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The name of one tensor of the model.
///
/// Every process routes a key to its owning shard with `shard_of`, so the
/// hash must stay fixed across builds and platforms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterKey(String);

impl ParameterKey {
    /// Creates a new `ParameterKey`.
    ///
    /// # Arguments
    /// * `name` - The name of the tensor.
    ///
    /// # Returns
    /// A new `ParameterKey` instance.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Computes which shard owns this key.
    ///
    /// # Arguments
    /// * `num_shards` - The amount of shards in the cluster, must be non zero.
    ///
    /// # Returns
    /// The owning shard's id, in `[0, num_shards)`.
    pub fn shard_of(&self, num_shards: usize) -> ShardId {
        (fnv1a(self.0.as_bytes()) % num_shards.max(1) as u64) as ShardId
    }
}

/// 64 bit FNV-1a over `bytes`.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParameterKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ParameterKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ParameterKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
