//! Layers that only move data around: reshaping dense activations into
//! feature maps, flattening feature maps, and nearest neighbour upsampling.
use crate::{
    layers::{expect_ndim, to_standard, Layer, Mode},
    MlError, MlResult,
};
use ndarray::*;

/// Reshapes (batch, features) into (batch, channels, height, width).
pub struct ReshapeLayer {
    target: (usize, usize, usize),
}

impl ReshapeLayer {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            target: (channels, height, width),
        }
    }

    fn check_input(&self, shape: &[usize]) -> MlResult<()> {
        let (c, h, w) = self.target;
        expect_ndim(self.name(), shape, 2)?;
        if shape[1] != c * h * w {
            return Err(MlError::InputShapeError {
                layer: self.name(),
                expected: vec![shape[0], c * h * w],
                actual: shape.to_vec(),
            });
        }
        Ok(())
    }
}

impl Layer for ReshapeLayer {
    fn name(&self) -> &'static str {
        "Reshape"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        self.check_input(input.shape())?;
        let (c, h, w) = self.target;
        Ok(to_standard(input.view())
            .into_shape((input.shape()[0], c, h, w))?
            .into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let (c, h, w) = self.target;
        let batch = grad_output.shape()[0];
        Ok(to_standard(grad_output.view())
            .into_shape((batch, c * h * w))?
            .into_dyn())
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        self.check_input(input_shape)?;
        let (c, h, w) = self.target;
        Ok(vec![input_shape[0], c, h, w])
    }
}

/// Flattens (batch, ...) into (batch, features).
#[derive(Default)]
pub struct FlattenLayer {
    input_shape: Option<Vec<usize>>,
}

impl FlattenLayer {
    pub fn new() -> Self {
        Self { input_shape: None }
    }
}

impl Layer for FlattenLayer {
    fn name(&self) -> &'static str {
        "Flatten"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        let shape = self.output_shape(input.shape())?;
        self.input_shape = Some(input.shape().to_vec());
        Ok(to_standard(input.view()).into_shape(shape)?)
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let shape = self
            .input_shape
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        Ok(to_standard(grad_output.view()).into_shape(shape.as_slice())?)
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        if input_shape.is_empty() {
            return Err(MlError::InputShapeError {
                layer: self.name(),
                expected: vec![0, 0],
                actual: Vec::new(),
            });
        }
        Ok(vec![input_shape[0], input_shape[1..].iter().product()])
    }
}

/// Nearest neighbour upsampling by an integer factor (Keras `UpSampling2D`).
pub struct UpSamplingLayer {
    factor: usize,
}

impl UpSamplingLayer {
    pub fn new(factor: usize) -> Self {
        debug_assert!(factor > 0, "Upsampling factor of 0 passed");
        Self { factor }
    }
}

impl Default for UpSamplingLayer {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Layer for UpSamplingLayer {
    fn name(&self) -> &'static str {
        "UpSampling2D"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        let x = input.view().into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = x.dim();
        let f = self.factor;
        let mut output = Array4::zeros((n, c, h * f, w * f));
        for dy in 0..f {
            for dx in 0..f {
                output
                    .slice_mut(s![.., .., dy..;f, dx..;f])
                    .assign(&x);
            }
        }
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let g = grad_output.view().into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = g.dim();
        let f = self.factor;
        let mut grad_input = Array4::zeros((n, c, h / f, w / f));
        for dy in 0..f {
            for dx in 0..f {
                grad_input += &g.slice(s![.., .., dy..;f, dx..;f]);
            }
        }
        Ok(grad_input.into_dyn())
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        expect_ndim(self.name(), input_shape, 4)?;
        let f = self.factor;
        Ok(vec![
            input_shape[0],
            input_shape[1],
            input_shape[2] * f,
            input_shape[3] * f,
        ])
    }
}
