use std::{ops::Deref, sync::Arc};

use comms::{DType, KvErr, ParameterKey, PushMode, Shape, Tensor};
use tokio::task;

use super::ShardStore;
use crate::optimization::Optimizer;

/// The actual interface to interact with a `ShardStore`.
///
/// It bridges the async runtime with the blocking CPU-bound implementation of the `ShardStore`.
pub struct StoreHandle<O: Optimizer>(Arc<ShardStore<O>>);

impl<O: Optimizer> Clone for StoreHandle<O> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<O: Optimizer> Deref for StoreHandle<O> {
    type Target = ShardStore<O>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<O: Optimizer> StoreHandle<O> {
    /// Creates a new `StoreHandle`.
    ///
    /// # Arguments
    /// * `store` - The underlying shard store.
    ///
    /// # Returns
    /// A new `StoreHandle` instance.
    pub fn new(store: ShardStore<O>) -> Self {
        Self(Arc::new(store))
    }
}

impl<O: Optimizer + Send> StoreHandle<O> {
    /// Async call to the synchronous implementation of `ShardStore::init`.
    pub async fn init(&self, key: ParameterKey, tensor: Tensor) -> Result<u64, KvErr> {
        task::block_in_place(|| self.0.init(key, tensor))
    }

    /// Async call to the synchronous implementation of `ShardStore::validate`.
    pub async fn validate(
        &self,
        key: &ParameterKey,
        shape: &Shape,
        dtype: DType,
    ) -> Result<(), KvErr> {
        self.0.validate(key, shape, dtype)
    }

    /// Async call to the synchronous implementation of `ShardStore::push`.
    ///
    /// # Arguments
    /// * `key` - The key to update.
    /// * `tensor` - The pushed tensor.
    /// * `mode` - How to apply `tensor`.
    ///
    /// # Returns
    /// The new version of the key or a `KvErr`.
    pub async fn push(
        &self,
        key: &ParameterKey,
        tensor: &Tensor,
        mode: PushMode,
    ) -> Result<u64, KvErr> {
        task::block_in_place(|| self.0.push(key, tensor, mode))
    }

    /// Async call to the synchronous implementation of `ShardStore::update`.
    ///
    /// # Arguments
    /// * `key` - The key to update.
    /// * `grad` - The aggregated gradient.
    ///
    /// # Returns
    /// The new version of the key or a `KvErr`.
    pub async fn update(&self, key: &ParameterKey, grad: &Tensor) -> Result<u64, KvErr> {
        task::block_in_place(|| self.0.update(key, grad))
    }

    /// Async call to the synchronous implementation of `ShardStore::pull`.
    pub async fn pull(&self, key: &ParameterKey) -> Result<(Tensor, u64), KvErr> {
        task::block_in_place(|| self.0.pull(key))
    }
}
