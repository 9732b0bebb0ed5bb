use ml::MlError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Model(#[from] MlError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Could not read npy array: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),
    #[error("Could not parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("No training images found under {0:?}")]
    EmptyDataset(PathBuf),
    #[error("Dataset has images of shape {actual:?}, model expects {expected:?}")]
    DatasetShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Loss became {loss} in step {step}")]
    NonFiniteLoss { step: usize, loss: f32 },
    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),
}
