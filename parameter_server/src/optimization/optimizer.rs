use crate::storage::{Result, SizeMismatchErr};

/// Defines the rule a shard applies to a parameter once per aggregated gradient.
///
/// Every key owns its own instance, so stateful rules keep per key state.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the aggregated gradient.
    ///
    /// # Arguments
    /// * `grad` - The sum of the workers' gradients for one step.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

/// Fails with a `SizeMismatchErr` unless `grad` is as long as `expected`.
pub(super) fn check_len(grad: &[f32], expected: usize) -> Result<()> {
    if grad.len() != expected {
        return Err(SizeMismatchErr {
            expected,
            got: grad.len(),
        });
    }

    Ok(())
}
