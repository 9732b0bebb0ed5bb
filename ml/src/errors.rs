use ndarray::ShapeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MlError {
    #[error("Wrong shape for array:\n {0}.")]
    ShapeError(#[from] ShapeError),
    #[error("Layer {layer} expected input of shape {expected:?}, got {actual:?}")]
    InputShapeError {
        layer: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("backward pass of layer {0} called without a preceding forward pass")]
    MissingForwardCache(&'static str),
    #[error("Optimizer state was built for {expected} parameters, got {actual}")]
    OptimizerMismatch { expected: usize, actual: usize },
    #[error("Labels have length {labels}, predictions have length {predictions}")]
    LabelMismatch { labels: usize, predictions: usize },
    #[error("Loss is not a finite number ({0})")]
    NonFiniteLoss(f32),
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
}
