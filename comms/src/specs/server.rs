use serde::{Deserialize, Serialize};

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    /// No update rule, the aggregated delta is added to the parameter as is.
    Accumulate,
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self::GradientDescent { learning_rate: 0.1 }
    }
}

/// How a shard combines the accumulate pushes of the workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Waits on every worker's push for a step before applying the optimizer once.
    #[default]
    Sync,
    /// Applies every push through the optimizer as soon as it arrives.
    Async,
}
