//! Generator and discriminator of the DCGAN.
//!
//! Both networks are plain layer stacks. Their public `predict` methods take
//! and return images in (batch, rows, cols, channels) layout, internally all
//! layers run on (batch, channels, rows, cols).
use crate::{
    activation_functions::{LeakyReluLayer, ReluLayer, SigmoidLayer},
    convolutions::{ConvolutionLayer, Padding},
    dcgan::ModelConfig,
    dropout::DropoutLayer,
    fully_connected::FeedforwardLayer,
    layers::{to_standard, Mode, Parameter, Sequential},
    normalization::BatchNormLayer,
    reshaping::{FlattenLayer, ReshapeLayer, UpSamplingLayer},
    transposed_convolutions::TransposedConvolutionLayer,
    ImagePrecision, MlError, MlResult, CHANNELS,
};
use log::info;
use ndarray::*;
use ndarray_rand::rand::{rngs::StdRng, Rng};
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Channels of the feature map the noise is projected to.
    /// Halved by every transposed convolution block.
    pub depth: usize,
    pub dropout: f32,
    /// Momentum of the batch normalization moving statistics.
    pub momentum: f32,
    pub kernel_size: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            depth: 256,
            dropout: 0.4,
            momentum: 0.9,
            kernel_size: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscriminatorConfig {
    /// Filters of the first convolution, doubled by each following one.
    pub depth: usize,
    pub dropout: f32,
    /// Slope of the leaky relu for negative inputs.
    pub alpha: f32,
    pub kernel_size: usize,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            depth: 64,
            dropout: 0.4,
            alpha: 0.2,
            kernel_size: 5,
        }
    }
}

/// (batch, rows, cols, channels) -> (batch, channels, rows, cols)
pub fn to_channels_first(images: ArrayView4<ImagePrecision>) -> Array4<ImagePrecision> {
    to_standard(images.permuted_axes([0, 3, 1, 2]))
}

/// (batch, channels, rows, cols) -> (batch, rows, cols, channels)
pub fn to_channels_last(images: ArrayView4<ImagePrecision>) -> Array4<ImagePrecision> {
    to_standard(images.permuted_axes([0, 2, 3, 1]))
}

fn log_summary(title: &str, network: &Sequential, input_shape: &[usize]) {
    match network.summary(input_shape) {
        Ok(summary) => info!("{}\n{}", title, summary),
        Err(e) => info!("{}: no summary available ({})", title, e),
    }
}

/// Maps noise vectors to grayscale images with pixel values in [0, 1].
///
/// In: noise_dim
/// Dense -> rows/4 x cols/4 x depth, two upsampling blocks bring the feature
/// map to rows x cols while the channels go depth/2, depth/4, depth/8, 1.
pub struct Generator {
    network: Sequential,
    noise_dim: usize,
    rows: usize,
    cols: usize,
}

impl Generator {
    pub fn new(config: &ModelConfig, rng: &mut StdRng) -> Generator {
        let g = config.generator;
        let depth = g.depth;
        let k = g.kernel_size;
        let (dim_rows, dim_cols) = (config.rows / 4, config.cols / 4);

        let network = Sequential::new()
            // In: noise_dim
            // Out: dim x dim x depth
            .add(FeedforwardLayer::glorot(
                config.noise_dim,
                dim_rows * dim_cols * depth,
                rng,
            ))
            .add(BatchNormLayer::new(dim_rows * dim_cols * depth, g.momentum))
            .add(ReluLayer::new())
            .add(ReshapeLayer::new(depth, dim_rows, dim_cols))
            .add(DropoutLayer::new(g.dropout, rng.gen()))
            // In: dim x dim x depth
            // Out: 2*dim x 2*dim x depth/2
            .add(UpSamplingLayer::new(2))
            .add(TransposedConvolutionLayer::glorot(depth, depth / 2, k, 1, Padding::Same, rng))
            .add(BatchNormLayer::new(depth / 2, g.momentum))
            .add(ReluLayer::new())
            .add(UpSamplingLayer::new(2))
            .add(TransposedConvolutionLayer::glorot(depth / 2, depth / 4, k, 1, Padding::Same, rng))
            .add(BatchNormLayer::new(depth / 4, g.momentum))
            .add(ReluLayer::new())
            .add(TransposedConvolutionLayer::glorot(depth / 4, depth / 8, k, 1, Padding::Same, rng))
            .add(BatchNormLayer::new(depth / 8, g.momentum))
            .add(ReluLayer::new())
            // Out: rows x cols x 1 grayscale image [0.0,1.0] per pix
            .add(TransposedConvolutionLayer::glorot(depth / 8, CHANNELS, k, 1, Padding::Same, rng))
            .add(SigmoidLayer::new());

        log_summary("Generator", &network, &[1, config.noise_dim]);
        Generator {
            network,
            noise_dim: config.noise_dim,
            rows: config.rows,
            cols: config.cols,
        }
    }

    pub fn noise_dim(&self) -> usize {
        self.noise_dim
    }

    /// Shape of one generated image, (rows, cols, channels).
    pub fn image_shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, CHANNELS)
    }

    pub fn network(&self) -> &Sequential {
        &self.network
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        self.network.parameters()
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.network.parameters_mut()
    }

    /// Generates images in (batch, channels, rows, cols) layout.
    pub(crate) fn forward(
        &mut self,
        noise: &Array2<ImagePrecision>,
        mode: Mode,
    ) -> MlResult<ArrayD<ImagePrecision>> {
        if noise.ncols() != self.noise_dim {
            return Err(MlError::InputShapeError {
                layer: "Generator",
                expected: vec![noise.nrows(), self.noise_dim],
                actual: noise.shape().to_vec(),
            });
        }
        self.network.forward(&noise.clone().into_dyn(), mode)
    }

    pub(crate) fn backward(&mut self, grad: &ArrayD<ImagePrecision>) -> MlResult<()> {
        self.network.backward(grad)?;
        Ok(())
    }

    /// Generates a batch of images of shape (batch, rows, cols, 1) from
    /// noise of shape (batch, noise_dim). Runs in inference mode.
    pub fn predict(&mut self, noise: &Array2<ImagePrecision>) -> MlResult<Array4<ImagePrecision>> {
        let images = self
            .forward(noise, Mode::Inference)?
            .into_dimensionality::<Ix4>()?;
        Ok(to_channels_last(images.view()))
    }
}

/// Maps images to the probability of being real.
///
/// Four strided convolutions (stride 2, 2, 2, 1) with leaky relu and dropout,
/// then a dense layer down to one sigmoid unit.
pub struct Discriminator {
    network: Sequential,
    rows: usize,
    cols: usize,
}

impl Discriminator {
    pub fn new(config: &ModelConfig, rng: &mut StdRng) -> Discriminator {
        let d = config.discriminator;
        let depth = d.depth;
        let k = d.kernel_size;
        let mut network = Sequential::new();
        let mut in_channels = CHANNELS;
        let (mut rows, mut cols) = (config.rows, config.cols);

        // In: rows x cols x 1
        // Out: rows/2 x cols/2 x depth, then depth*2, depth*4 and depth*8
        for (multiplier, stride) in [(1, 2), (2, 2), (4, 2), (8, 1)].iter() {
            let filters = depth * multiplier;
            network = network
                .add(ConvolutionLayer::glorot(in_channels, filters, k, *stride, Padding::Same, rng))
                .add(LeakyReluLayer::new(d.alpha))
                .add(DropoutLayer::new(d.dropout, rng.gen()));
            in_channels = filters;
            rows = (rows + stride - 1) / stride;
            cols = (cols + stride - 1) / stride;
        }

        // Out: 1-dim probability
        let network = network
            .add(FlattenLayer::new())
            .add(FeedforwardLayer::glorot(in_channels * rows * cols, 1, rng))
            .add(SigmoidLayer::new());

        log_summary(
            "Discriminator",
            &network,
            &[1, CHANNELS, config.rows, config.cols],
        );
        Discriminator {
            network,
            rows: config.rows,
            cols: config.cols,
        }
    }

    pub fn network(&self) -> &Sequential {
        &self.network
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        self.network.parameters()
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.network.parameters_mut()
    }

    /// Takes images in (batch, channels, rows, cols) layout.
    pub(crate) fn forward(
        &mut self,
        images: &ArrayD<ImagePrecision>,
        mode: Mode,
    ) -> MlResult<Array2<ImagePrecision>> {
        let shape = images.shape();
        if shape.len() != 4 || shape[1..] != [CHANNELS, self.rows, self.cols] {
            return Err(MlError::InputShapeError {
                layer: "Discriminator",
                expected: vec![shape.first().copied().unwrap_or(0), CHANNELS, self.rows, self.cols],
                actual: shape.to_vec(),
            });
        }
        Ok(self
            .network
            .forward(images, mode)?
            .into_dimensionality::<Ix2>()?)
    }

    /// Returns the gradient w.r.t. the (channels first) input images.
    pub(crate) fn backward(
        &mut self,
        grad: &Array2<ImagePrecision>,
    ) -> MlResult<ArrayD<ImagePrecision>> {
        self.network.backward(&grad.clone().into_dyn())
    }

    /// Probability of being real for each image of a (batch, rows, cols, 1)
    /// batch; returns shape (batch, 1). Runs in inference mode.
    pub fn predict(
        &mut self,
        images: ArrayView4<ImagePrecision>,
    ) -> MlResult<Array2<ImagePrecision>> {
        let images = to_channels_first(images).into_dyn();
        self.forward(&images, Mode::Inference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand::SeedableRng;

    fn small_config() -> ModelConfig {
        ModelConfig {
            rows: 12,
            cols: 8,
            noise_dim: 6,
            generator: GeneratorConfig {
                depth: 8,
                ..GeneratorConfig::default()
            },
            discriminator: DiscriminatorConfig {
                depth: 2,
                ..DiscriminatorConfig::default()
            },
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_layout_conversion() {
        let nhwc =
            Array4::from_shape_fn((2, 3, 4, 1), |(n, r, c, _)| (n * 100 + r * 10 + c) as f32);
        let nchw = to_channels_first(nhwc.view());
        assert_eq!(nchw.shape(), &[2, 1, 3, 4]);
        assert_eq!(nchw[[1, 0, 2, 3]], 123.);
        assert_eq!(to_channels_last(nchw.view()), nhwc);
    }

    #[test]
    fn test_generator_topology() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(0);
        let generator = Generator::new(&config, &mut rng);
        // dense, bn, relu, reshape, dropout, 2 x (up, conv-t, bn, relu),
        // conv-t, bn, relu, conv-t, sigmoid
        assert_eq!(generator.network().len(), 18);
        assert_eq!(
            generator.network().output_shape(&[5, 6]).unwrap(),
            vec![5, CHANNELS, 12, 8]
        );
        assert_eq!(generator.image_shape(), (12, 8, 1));
        assert_eq!(generator.noise_dim(), 6);
        // the dense projection alone: 6 * (3 * 2 * 8) weights + 48 biases
        assert!(generator.network().num_parameters() > 6 * 48 + 48);
    }

    #[test]
    fn test_discriminator_topology() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(1);
        let discriminator = Discriminator::new(&config, &mut rng);
        let network = discriminator.network();
        // 4 x (conv, leaky relu, dropout), flatten, dense, sigmoid
        assert_eq!(network.len(), 15);
        assert_eq!(network.output_shape(&[3, 1, 12, 8]).unwrap(), vec![3, 1]);
        // 12 x 8 -> 6 x 4 -> 3 x 2 -> 2 x 1 -> 2 x 1 with 16 filters
        let dense = network.parameters()[8].len();
        assert_eq!(dense, 2 * 16);
        let summary = network.summary(&[1, 1, 12, 8]).unwrap();
        assert!(summary.contains("Conv2D"));
        assert!(summary.contains("(None, 16, 2, 1)"));
        assert!(summary.ends_with(&format!("Total params: {}", network.num_parameters())));
    }
}
