use super::{Optimizer, optimizer::check_len};
use crate::storage::Result;

/// Gradient descent that keeps a decaying sum of past gradients per parameter.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<f32>,
}

impl GradientDescentWithMomentum {
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len],
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params.len())?;
        check_len(grad, self.velocity.len())?;

        for ((param, g), velocity) in params.iter_mut().zip(grad).zip(&mut self.velocity) {
            *velocity = self.momentum * *velocity + g;
            *param -= self.learning_rate * *velocity;
        }

        Ok(())
    }
}
