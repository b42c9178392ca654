use super::{Optimizer, optimizer::check_len};
use crate::storage::Result;

/// Adam with bias corrected moment estimates, one instance per key.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    /// Updates applied so far.
    t: i32,
    mean: Box<[f32]>,
    variance: Box<[f32]>,
}

impl Adam {
    /// Creates a new `Adam` optimizer with zeroed moments.
    ///
    /// # Arguments
    /// * `len` - The length of the key this optimizer updates.
    /// * `learning_rate` - The step size.
    /// * `beta1` - Decay of the mean estimate.
    /// * `beta2` - Decay of the variance estimate.
    /// * `epsilon` - Keeps the denominator away from zero.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            mean: vec![0.; len].into(),
            variance: vec![0.; len].into(),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params.len())?;
        check_len(grad, self.mean.len())?;

        self.t = self.t.saturating_add(1);
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let mean_correction = 1. - b1.powi(self.t);
        let variance_correction = 1. - b2.powi(self.t);

        for (i, g) in grad.iter().enumerate() {
            let m = &mut self.mean[i];
            let v = &mut self.variance[i];

            *m = b1 * *m + (1. - b1) * g;
            *v = b2 * *v + (1. - b2) * g * g;

            let m_hat = *m / mean_correction;
            let v_hat = *v / variance_correction;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + eps);
        }

        Ok(())
    }
}
