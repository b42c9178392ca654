use std::collections::BTreeMap;

use comms::{ParameterKey, Tensor};

use crate::{Result, WorkerErr};

/// Parameter values or gradients by key.
pub type Params = BTreeMap<ParameterKey, Tensor>;

/// What a batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    /// One gradient per touched key, laid out like its parameter.
    pub grads: Params,
    pub batch_size: usize,
}

/// The numeric side of training, opaque to the coordination layer.
pub trait Compute: Send {
    /// The length of the dataset the batches index into.
    fn dataset_len(&self) -> usize;

    /// The value every key starts from, every worker must agree on it.
    fn initial_params(&self) -> Params;

    /// Computes the gradients of a batch.
    ///
    /// # Arguments
    /// * `params` - The pulled parameters.
    /// * `batch` - The dataset indices of the batch.
    ///
    /// # Returns
    /// The gradients or a `WorkerErr` if a needed parameter is missing.
    fn compute_gradients(&mut self, params: &Params, batch: &[usize]) -> Result<Gradients>;
}

/// Fits `y = weight * x + bias` by mean squared error over a synthetic `y = 2x + 1` dataset.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl LinearRegression {
    pub const WEIGHT: &'static str = "weight";
    pub const BIAS: &'static str = "bias";

    /// Creates a new `LinearRegression` over `len` evenly spaced samples in `[0, 1)`.
    pub fn new(len: usize) -> Self {
        let xs: Vec<f32> = (0..len).map(|i| i as f32 / len as f32).collect();
        let ys = xs.iter().map(|x| 2. * x + 1.).collect();
        Self { xs, ys }
    }

    /// The mean squared error of `params` over the whole dataset.
    pub fn loss(&self, params: &Params) -> Result<f32> {
        let (w, b) = (scalar(params, Self::WEIGHT)?, scalar(params, Self::BIAS)?);

        let total: f32 = self
            .xs
            .iter()
            .zip(&self.ys)
            .map(|(x, y)| (w * x + b - y).powi(2))
            .sum();

        Ok(total / self.xs.len().max(1) as f32)
    }
}

fn param<'a>(params: &'a Params, key: &str) -> Result<&'a Tensor> {
    params
        .get(key)
        .ok_or_else(|| WorkerErr::MissingParameter { key: key.into() })
}

fn scalar(params: &Params, key: &str) -> Result<f32> {
    match param(params, key)?.as_slice() {
        [value] => Ok(*value),
        _ => Err(WorkerErr::MissingParameter { key: key.into() }),
    }
}

/// A tensor laid out like `param` holding `value`.
fn like(param: &Tensor, value: f32) -> Tensor {
    let mut grad = param.clone();
    grad.as_mut_slice().fill(value);
    grad
}

impl Compute for LinearRegression {
    fn dataset_len(&self) -> usize {
        self.xs.len()
    }

    fn initial_params(&self) -> Params {
        Params::from([
            (Self::WEIGHT.into(), Tensor::scalar(0.)),
            (Self::BIAS.into(), Tensor::scalar(0.)),
        ])
    }

    fn compute_gradients(&mut self, params: &Params, batch: &[usize]) -> Result<Gradients> {
        let (w, b) = (scalar(params, Self::WEIGHT)?, scalar(params, Self::BIAS)?);

        let (mut gw, mut gb) = (0., 0.);
        for &i in batch {
            let err = w * self.xs[i] + b - self.ys[i];
            gw += 2. * err * self.xs[i];
            gb += 2. * err;
        }

        let n = batch.len().max(1) as f32;
        let grads = Params::from([
            (Self::WEIGHT.into(), like(param(params, Self::WEIGHT)?, gw / n)),
            (Self::BIAS.into(), like(param(params, Self::BIAS)?, gb / n)),
        ]);

        Ok(Gradients {
            grads,
            batch_size: batch.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradients_point_towards_the_fit() {
        let mut model = LinearRegression::new(100);
        let params = model.initial_params();

        let batch: Vec<_> = (0..100).collect();
        let Gradients { grads, batch_size } = model.compute_gradients(&params, &batch).unwrap();

        assert_eq!(batch_size, 100);
        assert!(grads["weight"].as_slice()[0] < 0.);
        assert!(grads["bias"].as_slice()[0] < 0.);
    }

    #[test]
    fn exact_fit_has_no_loss_nor_gradient() {
        let mut model = LinearRegression::new(10);
        let params = Params::from([
            ("weight".into(), Tensor::scalar(2.)),
            ("bias".into(), Tensor::scalar(1.)),
        ]);

        assert!(model.loss(&params).unwrap() < 1e-10);

        let grads = model.compute_gradients(&params, &[0, 3, 7]).unwrap().grads;
        assert!(grads.values().all(|g| g.as_slice()[0].abs() < 1e-5));
    }

    #[test]
    fn missing_parameters_are_reported() {
        let mut model = LinearRegression::new(10);
        let params = Params::from([("weight".into(), Tensor::scalar(0.))]);

        let err = model.compute_gradients(&params, &[0]).unwrap_err();
        assert!(matches!(
            err,
            WorkerErr::MissingParameter { key } if key.as_str() == "bias"
        ));
    }
}
