use comms::{ParameterKey, Rank, Tensor};

use super::StepErr;
use crate::{optimization::Optimizer, storage::StoreHandle};

/// Executes a single parameter update step.
///
/// A `Synchronizer` decides when the accumulate pushes of the workers are
/// turned into an optimizer update of the shard.
#[allow(unused)]
#[trait_variant::make(Synchronizer: Send)]
pub trait SynchronizerTemplate: Clone {
    /// Contributes one worker's gradient for `key` at `step`.
    ///
    /// Resolves once the update that includes this gradient was applied.
    ///
    /// # Arguments
    /// * `handle` - The handle to the shard's store.
    /// * `rank` - The pushing worker.
    /// * `step` - The worker's step counter.
    /// * `key` - The key the gradient belongs to.
    /// * `grad` - The gradient.
    ///
    /// # Returns
    /// The version of the key after the update, or a `StepErr`.
    async fn step<O>(
        &self,
        handle: &StoreHandle<O>,
        rank: Rank,
        step: u64,
        key: ParameterKey,
        grad: Tensor,
    ) -> Result<u64, StepErr>
    where
        O: Optimizer + Send + 'static;
}
