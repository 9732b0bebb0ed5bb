use crate::{
    initializers::glorot_uniform,
    layers::{expect_ndim, Layer, Mode, Parameter},
    ImagePrecision, MlError, MlResult, WeightPrecision,
};
use ndarray::*;
use ndarray_rand::rand::Rng;

/// Rust implementation of a feed forward (dense) layer.
/// The weight matrix shall have dimension (in that order)
/// input units x output units.
pub struct FeedforwardLayer {
    weights: Parameter,
    bias: Parameter,
    input_dimension: usize,
    output_dimension: usize,
    input: Option<Array2<ImagePrecision>>,
}

impl FeedforwardLayer {
    pub fn new(weights: Array2<WeightPrecision>) -> FeedforwardLayer {
        let (input_dimension, output_dimension) = weights.dim();
        FeedforwardLayer {
            weights: Parameter::new(weights.into_dyn()),
            bias: Parameter::new(ArrayD::zeros(IxDyn(&[output_dimension]))),
            input_dimension,
            output_dimension,
            input: None,
        }
    }

    pub fn glorot<R: Rng + ?Sized>(
        input_dimension: usize,
        output_dimension: usize,
        rng: &mut R,
    ) -> FeedforwardLayer {
        FeedforwardLayer::new(glorot_uniform(
            (input_dimension, output_dimension),
            input_dimension,
            output_dimension,
            rng,
        ))
    }

    fn weight_matrix(&self) -> MlResult<ArrayView2<WeightPrecision>> {
        Ok(self.weights.value.view().into_dimensionality::<Ix2>()?)
    }

    fn check_input(&self, shape: &[usize]) -> MlResult<()> {
        expect_ndim(self.name(), shape, 2)?;
        if shape[1] != self.input_dimension {
            return Err(MlError::InputShapeError {
                layer: self.name(),
                expected: vec![shape[0], self.input_dimension],
                actual: shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Computes x W + b for a batch of row vectors.
    pub fn forward_pass<'a, V>(&self, data: V) -> MlResult<Array2<ImagePrecision>>
    where
        V: AsArray<'a, ImagePrecision, Ix2>,
    {
        let data_arr: ArrayView2<ImagePrecision> = data.into();
        self.check_input(data_arr.shape())?;
        let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;
        Ok(data_arr.dot(&self.weight_matrix()?) + &bias)
    }
}

impl Layer for FeedforwardLayer {
    fn name(&self) -> &'static str {
        "Dense"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        let data = input.view().into_dimensionality::<Ix2>()?;
        let output = self.forward_pass(data)?;
        self.input = Some(data.to_owned());
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let input = self
            .input
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        let grad = grad_output.view().into_dimensionality::<Ix2>()?;
        let grad_input = grad.dot(&self.weight_matrix()?.t());
        self.weights.gradient = input.t().dot(&grad).into_dyn();
        self.bias.gradient = grad.sum_axis(Axis(0)).into_dyn();
        Ok(grad_input.into_dyn())
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        self.check_input(input_shape)?;
        Ok(vec![input_shape[0], self.output_dimension])
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weights, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weights, &mut self.bias]
    }
}
