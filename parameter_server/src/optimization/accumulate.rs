use super::{Optimizer, optimizer::check_len};
use crate::storage::{Result, add_assign};

/// The rule used when no optimizer is configured, the aggregated delta is added as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulate;

impl Optimizer for Accumulate {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params.len())?;
        add_assign(params, grad);
        Ok(())
    }
}
