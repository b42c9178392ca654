use comms::{DType, KvErr, ParameterKey, Shape, Tensor};
use rayon::prelude::*;

use crate::optimization::Optimizer;

/// Buffers at least this long are added up in parallel.
const PAR_THRESHOLD: usize = 1 << 14;

/// Adds `delta` into `acc` element wise.
pub(crate) fn add_assign(acc: &mut [f32], delta: &[f32]) {
    if acc.len() >= PAR_THRESHOLD {
        acc.par_iter_mut()
            .zip(delta.par_iter())
            .for_each(|(a, d)| *a += d);
    } else {
        acc.iter_mut().zip(delta).for_each(|(a, d)| *a += d);
    }
}

/// The state a shard keeps for one key.
#[derive(Debug)]
pub(super) struct Slot<O: Optimizer> {
    tensor: Tensor,
    version: u64,
    optimizer: O,
}

impl<O: Optimizer> Slot<O> {
    /// Creates a new `Slot` at version zero.
    pub fn new(tensor: Tensor, optimizer: O) -> Self {
        Self {
            tensor,
            version: 0,
            optimizer,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Checks that a tensor of `shape` and `dtype` can be applied to this slot.
    ///
    /// # Returns
    /// A `ShapeMismatch` naming both layouts if it can't.
    pub fn check(&self, key: &ParameterKey, shape: &Shape, dtype: DType) -> Result<(), KvErr> {
        if self.tensor.same_layout(shape, dtype) {
            return Ok(());
        }

        Err(KvErr::ShapeMismatch {
            key: key.clone(),
            expected: (self.tensor.shape().clone(), self.tensor.dtype()),
            got: (shape.clone(), dtype),
        })
    }

    /// Adds `delta` to the value and bumps the version.
    pub fn accumulate(&mut self, delta: &[f32]) -> u64 {
        add_assign(self.tensor.as_mut_slice(), delta);
        self.bump()
    }

    /// Replaces the value and bumps the version.
    pub fn overwrite(&mut self, value: &[f32]) -> u64 {
        self.tensor.as_mut_slice().copy_from_slice(value);
        self.bump()
    }

    /// Runs the optimizer once over `grad` and bumps the version.
    ///
    /// The version is left untouched if the optimizer refuses the gradient.
    pub fn update(&mut self, grad: &[f32]) -> crate::storage::Result<u64> {
        self.optimizer
            .update_params(grad, self.tensor.as_mut_slice())?;
        Ok(self.bump())
    }

    pub fn snapshot(&self) -> (Tensor, u64) {
        (self.tensor.clone(), self.version)
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::Accumulate;

    fn slot(values: Vec<f32>) -> Slot<Accumulate> {
        Slot::new(Tensor::vector(values), Accumulate)
    }

    #[test]
    fn every_change_bumps_the_version() {
        let mut slot = slot(vec![0.; 3]);
        assert_eq!(slot.version(), 0);

        assert_eq!(slot.accumulate(&[1., 2., 3.]), 1);
        assert_eq!(slot.overwrite(&[5., 5., 5.]), 2);
        assert_eq!(slot.update(&[1., 1., 1.]).unwrap(), 3);

        let (tensor, version) = slot.snapshot();
        assert_eq!(tensor.as_slice(), [6., 6., 6.]);
        assert_eq!(version, 3);
    }

    #[test]
    fn check_names_both_layouts() {
        let slot = slot(vec![0.; 4]);
        let key = ParameterKey::from("w");

        assert!(slot.check(&key, &Shape::new([4]), DType::F32).is_ok());

        let square = Shape::new([2, 2]);
        let err = slot.check(&key, &square, DType::F32).unwrap_err();
        assert_eq!(
            err,
            KvErr::ShapeMismatch {
                key: key.clone(),
                expected: (Shape::new([4]), DType::F32),
                got: (Shape::new([2, 2]), DType::F32),
            }
        );

        assert!(slot.check(&key, &Shape::new([4]), DType::F16).is_err());
    }

    #[test]
    fn large_buffers_add_up_in_parallel() {
        let len = PAR_THRESHOLD + 3;
        let mut acc = vec![1.; len];
        let delta: Vec<f32> = (0..len).map(|i| i as f32).collect();

        add_assign(&mut acc, &delta);
        assert!(acc.iter().enumerate().all(|(i, a)| *a == i as f32 + 1.));
    }
}
