//! Batch normalization, Ioffe & Szegedy 2015, https://arxiv.org/abs/1502.03167
//!
//! Normalizes over every axis but the channel axis (axis 1), so the same layer
//! works behind dense layers (batch, features) and convolutions
//! (batch, channels, height, width).
use crate::{
    layers::{Layer, Mode, Parameter},
    ImagePrecision, MlError, MlResult, WeightPrecision,
};
use ndarray::*;

/// Keras default
pub const DEFAULT_EPSILON: f32 = 1e-3;

struct BatchCache {
    normalized: Array3<ImagePrecision>,
    inv_std: Array1<ImagePrecision>,
}

pub struct BatchNormLayer {
    gamma: Parameter,
    beta: Parameter,
    moving_mean: Array1<WeightPrecision>,
    moving_variance: Array1<WeightPrecision>,
    momentum: f32,
    epsilon: f32,
    num_channels: usize,
    cache: Option<BatchCache>,
}

impl BatchNormLayer {
    pub fn new(num_channels: usize, momentum: f32) -> Self {
        Self {
            gamma: Parameter::new(ArrayD::ones(IxDyn(&[num_channels]))),
            beta: Parameter::new(ArrayD::zeros(IxDyn(&[num_channels]))),
            moving_mean: Array1::zeros(num_channels),
            moving_variance: Array1::ones(num_channels),
            momentum,
            epsilon: DEFAULT_EPSILON,
            num_channels,
            cache: None,
        }
    }

    pub fn moving_mean(&self) -> &Array1<WeightPrecision> {
        &self.moving_mean
    }

    pub fn moving_variance(&self) -> &Array1<WeightPrecision> {
        &self.moving_variance
    }

    /// Views the input as (batch, channels, rest) where rest collects all spatial axes.
    fn as_3d(&self, input: &ArrayD<f32>) -> MlResult<Array3<ImagePrecision>> {
        let shape = input.shape();
        if shape.len() < 2 || shape[1] != self.num_channels {
            return Err(MlError::InputShapeError {
                layer: self.name(),
                expected: vec![0, self.num_channels],
                actual: shape.to_vec(),
            });
        }
        let rest = shape[2..].iter().product();
        Ok(input
            .as_standard_layout()
            .into_owned()
            .into_shape((shape[0], self.num_channels, rest))?)
    }

    fn channel_view(&self, arr: &Array1<f32>) -> MlResult<Array3<f32>> {
        Ok(arr.clone().into_shape((1, self.num_channels, 1))?)
    }

    fn channel_param(&self, param: &Parameter) -> MlResult<Array3<f32>> {
        Ok(param
            .value
            .clone()
            .into_shape((1, self.num_channels, 1))?)
    }
}

/// Sum over batch and spatial axes, leaving one value per channel.
fn channel_sum(x: &Array3<f32>) -> Array1<f32> {
    x.sum_axis(Axis(2)).sum_axis(Axis(0))
}

impl Layer for BatchNormLayer {
    fn name(&self) -> &'static str {
        "BatchNormalization"
    }

    fn forward(&mut self, input: &ArrayD<f32>, mode: Mode) -> MlResult<ArrayD<f32>> {
        let x = self.as_3d(input)?;
        let count = (x.len_of(Axis(0)) * x.len_of(Axis(2))) as f32;

        let (mean, variance) = match mode {
            Mode::Train => {
                let mean = channel_sum(&x) / count;
                let centered = &x - &self.channel_view(&mean)?;
                let variance = channel_sum(&centered.mapv(|a| a * a)) / count;

                let m = self.momentum;
                self.moving_mean = &self.moving_mean * m + &mean * (1. - m);
                self.moving_variance = &self.moving_variance * m + &variance * (1. - m);
                (mean, variance)
            }
            Mode::Inference => (self.moving_mean.clone(), self.moving_variance.clone()),
        };

        let eps = self.epsilon;
        let inv_std = variance.mapv(|v| 1. / (v + eps).sqrt());
        let normalized = (&x - &self.channel_view(&mean)?) * &self.channel_view(&inv_std)?;
        let output = &normalized * &self.channel_param(&self.gamma)?
            + &self.channel_param(&self.beta)?;

        self.cache = Some(BatchCache {
            normalized,
            inv_std,
        });
        Ok(output.into_shape(input.shape())?)
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        let grad = self.as_3d(grad_output)?;
        let count = (grad.len_of(Axis(0)) * grad.len_of(Axis(2))) as f32;

        let grad_beta = channel_sum(&grad);
        let grad_gamma = channel_sum(&(&grad * &cache.normalized));

        // dx = gamma * inv_std / m * (m * dy - sum(dy) - x_hat * sum(dy * x_hat))
        let gamma = self.channel_param(&self.gamma)?;
        let grad_normalized = &grad * &gamma;
        let sum_dn = self.channel_view(&channel_sum(&grad_normalized))?;
        let sum_dn_xhat = self.channel_view(&channel_sum(&(&grad_normalized * &cache.normalized)))?;
        let grad_input = (&grad_normalized * count - &sum_dn - &cache.normalized * &sum_dn_xhat)
            * &self.channel_view(&cache.inv_std)?
            / count;

        self.gamma.gradient = grad_gamma.into_dyn();
        self.beta.gradient = grad_beta.into_dyn();
        Ok(grad_input.into_shape(grad_output.shape())?)
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        Ok(input_shape.to_vec())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.gamma, &self.beta]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.gamma, &mut self.beta]
    }
}
