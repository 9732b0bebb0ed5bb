/// Transposed convolutions (also wrongly called deconvolution layers)
/// are learnable upsampling maps.
/// More can be read here:
/// - https://datascience.stackexchange.com/questions/6107/what-are-deconvolutional-layers
/// - https://github.com/akutzer/numpy_cnn/blob/master/CNN/Layer/TransposedConv.py
/// - https://ieee.nitk.ac.in/blog/deconv/
use crate::{
    convolutions::{ConvGeometry, Padding},
    initializers::glorot_uniform,
    layers::{expect_ndim, to_standard, Layer, Mode, Parameter},
    ConvKernel, ImagePrecision, InternalDataRepresentation, MlError, MlResult, WeightPrecision,
};
use ndarray::*;
use ndarray_rand::rand::Rng;

/// Analog to a Convolution Layer. The forward pass of a transposed convolution
/// is the backward pass (w.r.t. the input) of the convolution with the same
/// geometry, and vice versa.
///
/// The weight matrix shall have dimension (in that order)
/// input channels x output channels x kernel height x kernel width (pytorch order).
pub struct TransposedConvolutionLayer {
    kernel: Parameter,
    bias: Parameter,
    kernel_size: usize,
    stride: usize,
    padding: Padding,
    in_channels: usize,
    out_channels: usize,
    input: Option<InternalDataRepresentation>,
}

impl TransposedConvolutionLayer {
    pub fn new(weights: ConvKernel, stride: usize, padding: Padding) -> TransposedConvolutionLayer {
        let in_channels = weights.len_of(Axis(0));
        let out_channels = weights.len_of(Axis(1));
        let kernel_size = weights.len_of(Axis(2));
        debug_assert_eq!(kernel_size, weights.len_of(Axis(3)), "Kernel is not square");
        debug_assert!(stride > 0, "Stride of 0 passed");

        TransposedConvolutionLayer {
            kernel: Parameter::new(weights.into_dyn()),
            bias: Parameter::new(ArrayD::zeros(IxDyn(&[out_channels]))),
            kernel_size,
            stride,
            padding,
            in_channels,
            out_channels,
            input: None,
        }
    }

    pub fn glorot<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: Padding,
        rng: &mut R,
    ) -> TransposedConvolutionLayer {
        let receptive = kernel_size * kernel_size;
        let weights = glorot_uniform(
            (in_channels, out_channels, kernel_size, kernel_size),
            in_channels * receptive,
            out_channels * receptive,
            rng,
        );
        TransposedConvolutionLayer::new(weights, stride, padding)
    }

    /// Size of the upsampled output for one spatial axis.
    /// Same: H' = H * stride, Valid: H' = (H - 1) * stride + HH
    /// https://theano-pymc.readthedocs.io/en/latest/tutorial/conv_arithmetic.html
    fn upsampled_size(&self, size: usize) -> usize {
        match self.padding {
            Padding::Same => size * self.stride,
            Padding::Valid => (size - 1) * self.stride + self.kernel_size,
        }
    }

    /// Geometry of the convolution that maps the output of this layer back to its input.
    fn geometry(&self, height: usize, width: usize) -> MlResult<ConvGeometry> {
        ConvGeometry::new(
            self.out_channels,
            self.upsampled_size(height),
            self.upsampled_size(width),
            self.kernel_size,
            self.stride,
            self.padding,
        )
    }

    /// Kernel flattened to (in channels, out channels * kernel_size * kernel_size).
    fn kernel_matrix(&self) -> MlResult<ArrayView2<WeightPrecision>> {
        let patch_len = self.out_channels * self.kernel_size * self.kernel_size;
        Ok(self
            .kernel
            .value
            .view()
            .into_shape((self.in_channels, patch_len))?)
    }

    fn check_input(&self, shape: &[usize]) -> MlResult<()> {
        expect_ndim(self.name(), shape, 4)?;
        if shape[1] != self.in_channels || shape[2] == 0 || shape[3] == 0 {
            return Err(MlError::InputShapeError {
                layer: self.name(),
                expected: vec![shape[0], self.in_channels, shape[2], shape[3]],
                actual: shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Performs a transposed convolution on the input images. This upsamples the images.
    /// More explanation can be read here:
    /// - https://datascience.stackexchange.com/questions/6107/what-are-deconvolutional-layers
    pub fn transposed_convolve(
        &self,
        images: ArrayView4<ImagePrecision>,
    ) -> MlResult<InternalDataRepresentation> {
        self.check_input(images.shape())?;
        let (batch, _, height, width) = images.dim();
        let geometry = self.geometry(height, width)?;
        let kernel = self.kernel_matrix()?;
        let bias = self
            .bias
            .value
            .view()
            .into_shape((self.out_channels, 1, 1))?;

        let mut output = Array4::zeros((batch, self.out_channels, geometry.height, geometry.width));
        for (image, mut out) in images.outer_iter().zip(output.outer_iter_mut()) {
            let flat = to_standard(image).into_shape((self.in_channels, height * width))?;
            let cols = flat.t().dot(&kernel);
            out.assign(&(&geometry.col2im(&cols) + &bias));
        }
        Ok(output)
    }
}

impl Layer for TransposedConvolutionLayer {
    fn name(&self) -> &'static str {
        "Conv2DTranspose"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        let images = input.view().into_dimensionality::<Ix4>()?;
        let output = self.transposed_convolve(images)?;
        self.input = Some(to_standard(images));
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let input = self
            .input
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        let (_, _, height, width) = input.dim();
        let geometry = self.geometry(height, width)?;
        let grad = grad_output.view().into_dimensionality::<Ix4>()?;
        let kernel = self.kernel_matrix()?;

        let mut grad_kernel: Array2<WeightPrecision> =
            Array2::zeros((self.in_channels, geometry.patch_len()));
        let mut grad_input = Array4::zeros(input.raw_dim());
        for ((image, g), mut dx) in input
            .outer_iter()
            .zip(grad.outer_iter())
            .zip(grad_input.outer_iter_mut())
        {
            let cols = geometry.im2col(g);
            let flat = image.into_shape((self.in_channels, height * width))?;
            grad_kernel += &flat.dot(&cols);
            let grad_flat = kernel.dot(&cols.t());
            dx.assign(&grad_flat.into_shape((self.in_channels, height, width))?);
        }

        self.bias.gradient = grad
            .sum_axis(Axis(3))
            .sum_axis(Axis(2))
            .sum_axis(Axis(0))
            .into_dyn();
        self.kernel.gradient = grad_kernel
            .into_shape((
                self.in_channels,
                self.out_channels,
                self.kernel_size,
                self.kernel_size,
            ))?
            .into_dyn();
        Ok(grad_input.into_dyn())
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        self.check_input(input_shape)?;
        Ok(vec![
            input_shape[0],
            self.out_channels,
            self.upsampled_size(input_shape[2]),
            self.upsampled_size(input_shape[3]),
        ])
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.kernel, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.kernel, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand::{rngs::StdRng, SeedableRng};
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    #[test]
    fn test_2d_conv_t() {
        let test_img = array![[55.0, 52.0], [57.0, 50.0]]
            .into_shape((1, 1, 2, 2))
            .unwrap();
        let kernel = Array::from_shape_vec((1, 1, 2, 2), vec![1., 2., 3., 4.]).unwrap();
        let conv_t_layer = TransposedConvolutionLayer::new(kernel, 1, Padding::Valid);

        let convolved_image = conv_t_layer.transposed_convolve(test_img.view()).unwrap();
        let output1 = array![
            [55.0, 162.0, 104.0],
            [222.0, 540.0, 308.0],
            [171.0, 378.0, 200.0],
        ]
        .into_shape((1, 1, 3, 3))
        .unwrap();
        assert_eq!(convolved_image, output1);

        let kernel_same = Array::from_shape_vec((1, 1, 2, 2), vec![1., 2., 3., 4.]).unwrap();

        let conv_t_layer_same = TransposedConvolutionLayer::new(kernel_same, 1, Padding::Same);
        let convolved_image_same = conv_t_layer_same
            .transposed_convolve(test_img.view())
            .unwrap();

        let output_same = array![[55.0, 162.0], [222.0, 540.0]]
            .into_shape((1, 1, 2, 2))
            .unwrap();
        assert_eq!(convolved_image_same, output_same);
    }

    #[test]
    fn test_same_padding_upsamples_by_stride() {
        let mut rng = StdRng::seed_from_u64(4);
        let layer = TransposedConvolutionLayer::glorot(4, 2, 5, 2, Padding::Same, &mut rng);
        let x = Array4::<f32>::ones((3, 4, 6, 5));
        let out = layer.transposed_convolve(x.view()).unwrap();
        assert_eq!(out.shape(), &[3, 2, 12, 10]);
        assert_eq!(layer.output_shape(x.shape()).unwrap(), vec![3, 2, 12, 10]);

        let layer = TransposedConvolutionLayer::glorot(4, 2, 5, 1, Padding::Same, &mut rng);
        assert_eq!(layer.output_shape(&[3, 4, 6, 5]).unwrap(), vec![3, 2, 6, 5]);
    }

    #[test]
    fn test_backward_is_adjoint() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = TransposedConvolutionLayer::glorot(3, 2, 5, 1, Padding::Same, &mut rng);
        let x = Array4::random_using((2, 3, 4, 5), Uniform::new(-1., 1.), &mut rng).into_dyn();
        let out = layer.forward(&x, Mode::Train).unwrap();
        let g = ArrayD::random_using(out.raw_dim(), Uniform::new(-1., 1.), &mut rng);
        let dx = layer.backward(&g).unwrap();

        let forward_dot = (&out * &g).sum();
        assert!((forward_dot - (&x * &dx).sum()).abs() < 1e-3);
        let kernel = &layer.parameters()[0];
        assert!((forward_dot - (&kernel.value * &kernel.gradient).sum()).abs() < 1e-3);
    }

    #[test]
    fn test_bias_is_added_per_channel() {
        let kernel = Array4::zeros((1, 2, 1, 1));
        let mut layer = TransposedConvolutionLayer::new(kernel, 1, Padding::Same);
        layer.parameters_mut()[1].value = array![0.5, -1.0].into_dyn();
        let out = layer
            .transposed_convolve(Array4::ones((1, 1, 2, 2)).view())
            .unwrap();
        assert!(out.index_axis(Axis(1), 0).iter().all(|&v| v == 0.5));
        assert!(out.index_axis(Axis(1), 1).iter().all(|&v| v == -1.0));
    }
}
