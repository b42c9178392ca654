use comms::{ParameterKey, Rank, Tensor};

use super::{StepErr, Synchronizer};
use crate::{optimization::Optimizer, storage::StoreHandle};

/// Skips synchronization between workers, every gradient goes through the optimizer as soon as it arrives.
#[derive(Clone)]
pub struct NoBlockingSync;

impl NoBlockingSync {
    /// Creates a new `NoBlockingSync` synchronizer.
    ///
    /// # Returns
    /// A new `NoBlockingSync` instance.
    pub fn new() -> Self {
        Self {}
    }
}

impl Synchronizer for NoBlockingSync {
    async fn step<O>(
        &self,
        handle: &StoreHandle<O>,
        _rank: Rank,
        _step: u64,
        key: ParameterKey,
        grad: Tensor,
    ) -> Result<u64, StepErr>
    where
        O: Optimizer + Send + 'static,
    {
        Ok(handle.update(&key, &grad).await?)
    }
}
