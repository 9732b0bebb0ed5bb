//! Neural network building blocks for the face DCGAN.
//!
//! Every layer implements a forward and a backward pass on `ndarray` arrays,
//! so the generator and discriminator can be trained without an autodiff
//! framework. Image data inside the layers uses Pytorch layout
//! (batch, channels, height, width); the public model interfaces take and
//! return (batch, rows, cols, channels) like Keras models.
pub mod activation_functions;
pub mod convolutions;
pub mod dcgan;
pub mod dropout;
mod errors;
pub mod fully_connected;
mod initializers;
pub mod layers;
pub mod losses;
pub mod models;
pub mod normalization;
pub mod optimizers;
pub mod reshaping;
pub mod transposed_convolutions;

pub use errors::MlError;

pub type WeightPrecision = f32;
pub type ImagePrecision = f32;

/// Kernel of a (transposed) convolution, four dimensional.
pub type ConvKernel = ndarray::Array4<WeightPrecision>;

/// Batched image data in Pytorch layout (batch, channels, height, width).
pub type InternalDataRepresentation = ndarray::Array4<ImagePrecision>;

/// Number of image channels. Faces are grayscale.
pub const CHANNELS: usize = 1;

pub type MlResult<T> = std::result::Result<T, MlError>;
