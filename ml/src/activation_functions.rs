//! This module provides the activation functions for our neural networks,
//! namely Relu, Leaky Relu and the logistic sigmoid.
//!
//! All activation functions are exposed as a layer as well as a free function
use ndarray::*;

use crate::{
    layers::{Layer, Mode},
    ImagePrecision, MlError, MlResult,
};

/// Leaky relu implementation
pub fn leaky_relu<D: Dimension>(
    data: &Array<ImagePrecision, D>,
    alpha: ImagePrecision,
) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { alpha * x })
}

/// Relu implementation
pub fn relu<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { 0. })
}

/// Logistic sigmoid, evaluated in a way that does not overflow for large |x|.
pub fn sigmoid<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| {
        if x >= 0. {
            1. / (1. + (-x).exp())
        } else {
            let e = x.exp();
            e / (1. + e)
        }
    })
}

/// Relu as a layer.
#[derive(Default)]
pub struct ReluLayer {
    input: Option<ArrayD<ImagePrecision>>,
}

impl ReluLayer {
    pub fn new() -> Self {
        Self { input: None }
    }

    pub fn activate(&self, x: &ArrayD<ImagePrecision>) -> ArrayD<ImagePrecision> {
        relu(x)
    }
}

impl Layer for ReluLayer {
    fn name(&self) -> &'static str {
        "Activation(relu)"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        self.input = Some(input.clone());
        Ok(self.activate(input))
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let input = self
            .input
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        let mut grad = grad_output.clone();
        Zip::from(&mut grad)
            .and(input)
            .for_each(|g, &x| if x <= 0. { *g = 0. });
        Ok(grad)
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        Ok(input_shape.to_vec())
    }
}

/// Leaky relu as a layer, with slope `alpha` for negative inputs.
pub struct LeakyReluLayer {
    alpha: ImagePrecision,
    input: Option<ArrayD<ImagePrecision>>,
}

impl LeakyReluLayer {
    pub fn new(alpha: ImagePrecision) -> Self {
        Self { alpha, input: None }
    }
}

impl Layer for LeakyReluLayer {
    fn name(&self) -> &'static str {
        "LeakyReLU"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        self.input = Some(input.clone());
        Ok(leaky_relu(input, self.alpha))
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let input = self
            .input
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        let alpha = self.alpha;
        let mut grad = grad_output.clone();
        Zip::from(&mut grad)
            .and(input)
            .for_each(|g, &x| if x <= 0. { *g *= alpha });
        Ok(grad)
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        Ok(input_shape.to_vec())
    }
}

/// Sigmoid as a layer. Squashes activations into [0, 1].
#[derive(Default)]
pub struct SigmoidLayer {
    output: Option<ArrayD<ImagePrecision>>,
}

impl SigmoidLayer {
    pub fn new() -> Self {
        Self { output: None }
    }
}

impl Layer for SigmoidLayer {
    fn name(&self) -> &'static str {
        "Activation(sigmoid)"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        let output = sigmoid(input);
        self.output = Some(output.clone());
        Ok(output)
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let output = self
            .output
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        let mut grad = grad_output.clone();
        Zip::from(&mut grad)
            .and(output)
            .for_each(|g, &s| *g *= s * (1. - s));
        Ok(grad)
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        Ok(input_shape.to_vec())
    }
}
