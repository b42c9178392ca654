use std::{collections::HashMap, sync::Arc};

use comms::{DType, KvErr, ParameterKey, PushMode, Shape, ShardId, Tensor};
use parking_lot::{Mutex, RwLock};

use super::slot::Slot;
use crate::optimization::Optimizer;

type OptimizerFactory<O> = Box<dyn Fn(usize) -> O + Send + Sync>;

/// The parameters owned by one shard.
///
/// The key table is only write locked to add keys, every key then has its own
/// lock so updates to different keys never wait on each other. These methods
/// are blocking, the async interface lives in `StoreHandle`.
pub struct ShardStore<O: Optimizer> {
    shard_id: ShardId,
    num_shards: usize,
    slots: RwLock<HashMap<ParameterKey, Arc<Mutex<Slot<O>>>>>,
    optimizer_factory: OptimizerFactory<O>,
}

impl<O: Optimizer> ShardStore<O> {
    /// Creates a new empty `ShardStore`.
    ///
    /// # Arguments
    /// * `shard_id` - The shard this store owns.
    /// * `num_shards` - The amount of shards in the cluster.
    /// * `optimizer_factory` - Creates the optimizer state of a new key given its length.
    ///
    /// # Returns
    /// A new `ShardStore` instance.
    pub fn new<F>(shard_id: ShardId, num_shards: usize, optimizer_factory: F) -> Self
    where
        F: Fn(usize) -> O + Send + Sync + 'static,
    {
        Self {
            shard_id,
            num_shards,
            slots: RwLock::new(HashMap::new()),
            optimizer_factory: Box::new(optimizer_factory),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// The amount of initialized keys.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_owner(&self, key: &ParameterKey) -> Result<(), KvErr> {
        let owner = key.shard_of(self.num_shards);

        if owner != self.shard_id {
            return Err(KvErr::NotOwner {
                key: key.clone(),
                owner,
            });
        }

        Ok(())
    }

    fn slot(&self, key: &ParameterKey) -> Result<Arc<Mutex<Slot<O>>>, KvErr> {
        self.check_owner(key)?;

        match self.slots.read().get(key) {
            Some(slot) => Ok(Arc::clone(slot)),
            None => Err(KvErr::UnknownKey { key: key.clone() }),
        }
    }

    /// Declares `key` with its initial value, the first init wins.
    ///
    /// # Arguments
    /// * `key` - The key to declare.
    /// * `tensor` - The initial value.
    ///
    /// # Returns
    /// The key's current version, or a `ShapeMismatch` if it already exists
    /// with another layout.
    pub fn init(&self, key: ParameterKey, tensor: Tensor) -> Result<u64, KvErr> {
        self.check_owner(&key)?;
        let mut slots = self.slots.write();

        if let Some(slot) = slots.get(&key) {
            let slot = slot.lock();
            slot.check(&key, tensor.shape(), tensor.dtype())?;
            return Ok(slot.version());
        }

        let optimizer = (self.optimizer_factory)(tensor.len());
        slots.insert(key, Arc::new(Mutex::new(Slot::new(tensor, optimizer))));
        Ok(0)
    }

    /// Checks that a tensor of `shape` and `dtype` can be applied to `key`.
    pub fn validate(&self, key: &ParameterKey, shape: &Shape, dtype: DType) -> Result<(), KvErr> {
        self.slot(key)?.lock().check(key, shape, dtype)
    }

    /// Applies a pushed tensor directly, without going through the optimizer.
    ///
    /// # Arguments
    /// * `key` - The key to update.
    /// * `tensor` - A delta for `Accumulate`, the new value for `Overwrite`.
    /// * `mode` - How to apply `tensor`.
    ///
    /// # Returns
    /// The new version or a `KvErr`, in which case the shard is left unchanged.
    pub fn push(&self, key: &ParameterKey, tensor: &Tensor, mode: PushMode) -> Result<u64, KvErr> {
        let slot = self.slot(key)?;
        let mut slot = slot.lock();
        slot.check(key, tensor.shape(), tensor.dtype())?;

        Ok(match mode {
            PushMode::Accumulate => slot.accumulate(tensor.as_slice()),
            PushMode::Overwrite => slot.overwrite(tensor.as_slice()),
        })
    }

    /// Runs the key's optimizer once over an aggregated gradient.
    ///
    /// # Returns
    /// The new version or a `KvErr`, in which case the shard is left unchanged.
    pub fn update(&self, key: &ParameterKey, grad: &Tensor) -> Result<u64, KvErr> {
        let slot = self.slot(key)?;
        let mut slot = slot.lock();
        slot.check(key, grad.shape(), grad.dtype())?;

        slot.update(grad.as_slice()).map_err(|e| KvErr::ShapeMismatch {
            key: key.clone(),
            expected: (Shape::new([e.expected]), grad.dtype()),
            got: (grad.shape().clone(), grad.dtype()),
        })
    }

    /// Reads the latest applied value of `key`.
    pub fn pull(&self, key: &ParameterKey) -> Result<(Tensor, u64), KvErr> {
        Ok(self.slot(key)?.lock().snapshot())
    }

    pub fn version(&self, key: &ParameterKey) -> Result<u64, KvErr> {
        Ok(self.slot(key)?.lock().version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{Accumulate, GradientDescent};

    fn single_shard<O: Optimizer, F>(factory: F) -> ShardStore<O>
    where
        F: Fn(usize) -> O + Send + Sync + 'static,
    {
        ShardStore::new(0, 1, factory)
    }

    #[test]
    fn accumulate_then_gradient_descent_step() {
        let store = single_shard(|_| GradientDescent::new(0.1));
        let key = ParameterKey::from("w");
        store.init(key.clone(), Tensor::scalar(0.)).unwrap();

        let mut sum = Tensor::scalar(1.);
        sum.as_mut_slice()[0] += 2.;
        let version = store.update(&key, &sum).unwrap();

        let (value, pulled) = store.pull(&key).unwrap();
        assert!((value.as_slice()[0] - -0.3).abs() < 1e-6);
        assert_eq!(version, 1);
        assert_eq!(pulled, 1);
    }

    #[test]
    fn accumulate_is_order_independent() {
        let deltas = [0.5f32, -1.25, 3.0, 0.125];
        let mut results = Vec::new();

        for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
            let store = single_shard(|_| Accumulate);
            let key = ParameterKey::from("b");
            store
                .init(key.clone(), Tensor::vector(vec![1., 2.]))
                .unwrap();

            for i in order {
                let delta = Tensor::vector(vec![deltas[i], 2. * deltas[i]]);
                store.push(&key, &delta, PushMode::Accumulate).unwrap();
            }

            results.push(store.pull(&key).unwrap());
        }

        let total: f32 = deltas.iter().sum();
        for (value, version) in results {
            assert_eq!(value.as_slice(), [1. + total, 2. + 2. * total]);
            assert_eq!(version, 4);
        }
    }

    #[test]
    fn versions_strictly_increase() {
        let store = single_shard(|_| Accumulate);
        let key = ParameterKey::from("w");
        store
            .init(key.clone(), Tensor::vector(vec![0.; 2]))
            .unwrap();

        let mut last = store.version(&key).unwrap();
        for i in 0..10 {
            let tensor = Tensor::vector(vec![i as f32; 2]);
            let version = match i % 3 {
                0 => store.push(&key, &tensor, PushMode::Accumulate),
                1 => store.push(&key, &tensor, PushMode::Overwrite),
                _ => store.update(&key, &tensor),
            }
            .unwrap();

            assert!(version > last);
            last = version;
        }
    }

    #[test]
    fn overwrite_replaces_the_value() {
        let store = single_shard(|_| Accumulate);
        let key = ParameterKey::from("w");
        store
            .init(key.clone(), Tensor::vector(vec![1., 1.]))
            .unwrap();

        let version = store
            .push(&key, &Tensor::vector(vec![7., -7.]), PushMode::Overwrite)
            .unwrap();

        let (value, pulled) = store.pull(&key).unwrap();
        assert_eq!(value.as_slice(), [7., -7.]);
        assert_eq!(version, pulled);
    }

    #[test]
    fn first_init_wins() {
        let store = single_shard(|_| Accumulate);
        let key = ParameterKey::from("w");

        assert_eq!(store.init(key.clone(), Tensor::scalar(1.)).unwrap(), 0);
        store
            .push(&key, &Tensor::scalar(1.), PushMode::Accumulate)
            .unwrap();

        assert_eq!(store.init(key.clone(), Tensor::scalar(42.)).unwrap(), 1);
        assert_eq!(store.pull(&key).unwrap().0.as_slice(), [2.]);

        let err = store
            .init(key.clone(), Tensor::vector(vec![0.; 3]))
            .unwrap_err();
        assert!(matches!(err, KvErr::ShapeMismatch { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let store = single_shard(|_| Accumulate);
        let key = ParameterKey::from("never");

        let expected = KvErr::UnknownKey { key: key.clone() };
        assert_eq!(store.pull(&key).unwrap_err(), expected);
        assert_eq!(
            store
                .push(&key, &Tensor::scalar(1.), PushMode::Accumulate)
                .unwrap_err(),
            expected
        );
    }

    #[test]
    fn mismatched_pushes_leave_the_shard_unchanged() {
        let store = single_shard(|_| Accumulate);
        let key = ParameterKey::from("w");
        store
            .init(key.clone(), Tensor::vector(vec![1., 2.]))
            .unwrap();

        let longer = Tensor::vector(vec![1., 2., 3.]);
        let err = store.push(&key, &longer, PushMode::Accumulate).unwrap_err();
        assert!(matches!(err, KvErr::ShapeMismatch { .. }));

        let half = Tensor::new(Shape::new([2]), DType::F16, vec![1., 1.]).unwrap();
        assert!(store.update(&key, &half).is_err());

        let (value, version) = store.pull(&key).unwrap();
        assert_eq!(value.as_slice(), [1., 2.]);
        assert_eq!(version, 0);
    }

    #[test]
    fn keys_of_other_shards_are_refused() {
        const SHARDS: usize = 4;

        let stores: Vec<_> = (0..SHARDS)
            .map(|id| ShardStore::new(id, SHARDS, |_| Accumulate))
            .collect();

        let key = ParameterKey::from("layer.3.weight");
        let owner = key.shard_of(SHARDS);

        for store in &stores {
            let res = store.init(key.clone(), Tensor::scalar(0.));
            if store.shard_id() == owner {
                assert_eq!(res, Ok(0));
            } else {
                let expected = KvErr::NotOwner {
                    key: key.clone(),
                    owner,
                };
                assert_eq!(res, Err(expected));
            }
        }
    }
}
