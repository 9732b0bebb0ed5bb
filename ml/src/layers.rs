//! The layer abstraction shared by all network building blocks, and a
//! sequential container chaining them (the equivalent of a Keras `Sequential`).
use crate::{MlError, MlResult, WeightPrecision};
use ndarray::ArrayD;
use std::fmt::Write;

/// Whether a forward pass happens during training (dropout active, batch
/// statistics) or inference (dropout disabled, moving statistics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Inference,
}

/// A trainable tensor together with the gradient of the last backward pass.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub value: ArrayD<WeightPrecision>,
    pub gradient: ArrayD<WeightPrecision>,
}

impl Parameter {
    pub fn new(value: ArrayD<WeightPrecision>) -> Parameter {
        let gradient = ArrayD::zeros(value.raw_dim());
        Parameter { value, gradient }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// A differentiable building block.
///
/// `forward` caches whatever the layer needs to compute its gradients,
/// `backward` consumes the gradient of the loss w.r.t. the layer output,
/// writes the parameter gradients and returns the gradient w.r.t. the input.
/// Gradients are overwritten, not accumulated.
pub trait Layer {
    fn name(&self) -> &'static str;

    fn forward(&mut self, input: &ArrayD<f32>, mode: Mode) -> MlResult<ArrayD<f32>>;

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>>;

    /// Shape of the output for an input of the given shape (batch axis included).
    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>>;

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }
}

/// Checks that `actual` has the expected number of dimensions.
pub(crate) fn expect_ndim(layer: &'static str, actual: &[usize], ndim: usize) -> MlResult<()> {
    if actual.len() != ndim {
        return Err(MlError::InputShapeError {
            layer,
            expected: vec![0; ndim],
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Ordered stack of layers.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn add<L: Layer + 'static>(mut self, layer: L) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn forward(&mut self, input: &ArrayD<f32>, mode: Mode) -> MlResult<ArrayD<f32>> {
        let mut x = input.clone();
        for layer in self.layers.iter_mut() {
            x = layer.forward(&x, mode)?;
        }
        Ok(x)
    }

    pub fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let mut grad = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    pub fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        let mut shape = input_shape.to_vec();
        for layer in self.layers.iter() {
            shape = layer.output_shape(&shape)?;
        }
        Ok(shape)
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }

    /// Renders a table of layers, output shapes and parameter counts,
    /// similar to `model.summary()` in Keras. The batch axis is shown as `None`.
    pub fn summary(&self, input_shape: &[usize]) -> MlResult<String> {
        let mut out = String::new();
        let mut shape = input_shape.to_vec();
        let _ = writeln!(out, "{:<24}{:<28}{:>12}", "Layer", "Output Shape", "Param #");
        for layer in self.layers.iter() {
            shape = layer.output_shape(&shape)?;
            let params: usize = layer.parameters().iter().map(|p| p.len()).sum();
            let shape_str = format!("{:?}", &shape[1..]);
            let _ = writeln!(
                out,
                "{:<24}{:<28}{:>12}",
                layer.name(),
                format!("(None, {})", shape_str.trim_matches(|c| c == '[' || c == ']')),
                params
            );
        }
        let _ = write!(out, "Total params: {}", self.num_parameters());
        Ok(out)
    }
}

/// Copies an array view into a fresh array in standard (row major) layout,
/// so it can be reshaped freely.
pub(crate) fn to_standard<D: ndarray::Dimension>(
    view: ndarray::ArrayView<'_, f32, D>,
) -> ndarray::Array<f32, D> {
    view.as_standard_layout().into_owned()
}
