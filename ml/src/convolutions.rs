use crate::{
    initializers::glorot_uniform,
    layers::{expect_ndim, to_standard, Layer, Mode, Parameter},
    ConvKernel, ImagePrecision, InternalDataRepresentation, MlError, MlResult, WeightPrecision,
};
use ndarray::*;
use ndarray_rand::rand::Rng;
use serde_derive::{Deserialize, Serialize};

/// Padding scheme of a convolution, following the Tensorflow conventions.
/// "Same" pads so that output = ceil(input / stride), putting the extra
/// pixel (if the total padding is odd) at the bottom / right.
/// "Valid" does not pad at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    Same,
    Valid,
}

/// Output size and leading padding along one axis.
fn padded_output_size(
    size: usize,
    kernel_size: usize,
    stride: usize,
    padding: Padding,
) -> Option<(usize, usize)> {
    match padding {
        Padding::Same => {
            let out = (size + stride - 1) / stride;
            let total = ((out - 1) * stride + kernel_size).saturating_sub(size);
            Some((out, total / 2))
        }
        Padding::Valid => {
            if size < kernel_size {
                None
            } else {
                Some(((size - kernel_size) / stride + 1, 0))
            }
        }
    }
}

/// Spatial arithmetic of a convolution on a single image of shape
/// (channels, height, width). Provides the im2col transformation and its adjoint, col2im.
///
/// Read more on im2col here:
/// https://leonardoaraujosantos.gitbook.io/artificial-inteligence/machine_learning/deep_learning/convolution_layer/making_faster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub out_height: usize,
    pub out_width: usize,
}

impl ConvGeometry {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        kernel_size: usize,
        stride: usize,
        padding: Padding,
    ) -> MlResult<ConvGeometry> {
        if stride == 0 || kernel_size == 0 {
            return Err(MlError::InvalidConfig(
                "stride and kernel size have to be positive".to_string(),
            ));
        }
        let too_small = || {
            MlError::InvalidConfig(format!(
                "image of size {}x{} is smaller than the kernel ({})",
                height, width, kernel_size
            ))
        };
        let (out_height, pad_top) =
            padded_output_size(height, kernel_size, stride, padding).ok_or_else(too_small)?;
        let (out_width, pad_left) =
            padded_output_size(width, kernel_size, stride, padding).ok_or_else(too_small)?;
        Ok(ConvGeometry {
            channels,
            height,
            width,
            kernel_size,
            stride,
            pad_top,
            pad_left,
            out_height,
            out_width,
        })
    }

    /// Number of columns of the im2col matrix.
    pub fn patch_len(&self) -> usize {
        self.channels * self.kernel_size * self.kernel_size
    }

    /// Number of rows of the im2col matrix.
    pub fn num_patches(&self) -> usize {
        self.out_height * self.out_width
    }

    /// Position in the input image that kernel entry (kh, kw) touches at
    /// output position (oh, ow). None if it falls into the padding.
    #[inline]
    fn source_pixel(&self, oh: usize, ow: usize, kh: usize, kw: usize) -> Option<(usize, usize)> {
        let ih = (oh * self.stride + kh) as isize - self.pad_top as isize;
        let iw = (ow * self.stride + kw) as isize - self.pad_left as isize;
        if ih < 0 || iw < 0 || ih as usize >= self.height || iw as usize >= self.width {
            None
        } else {
            Some((ih as usize, iw as usize))
        }
    }

    /// Unrolls all patches of the image into the rows of a matrix of shape
    /// (out_height * out_width, channels * kernel_size * kernel_size).
    /// Columns are ordered (channel, kernel row, kernel column).
    pub fn im2col<'a, T>(&self, image: T) -> Array2<ImagePrecision>
    where
        T: AsArray<'a, ImagePrecision, Ix3>,
    {
        let image: ArrayView3<ImagePrecision> = image.into();
        let k = self.kernel_size;
        let mut cols = Array2::zeros((self.num_patches(), self.patch_len()));
        for (row, mut patch) in cols.outer_iter_mut().enumerate() {
            let (oh, ow) = (row / self.out_width, row % self.out_width);
            let mut col = 0;
            for c in 0..self.channels {
                for kh in 0..k {
                    for kw in 0..k {
                        if let Some((ih, iw)) = self.source_pixel(oh, ow, kh, kw) {
                            patch[col] = image[[c, ih, iw]];
                        }
                        col += 1;
                    }
                }
            }
        }
        cols
    }

    /// Adjoint of im2col: scatters patch rows back into an image of shape
    /// (channels, height, width), summing overlapping contributions.
    pub fn col2im<'a, T>(&self, cols: T) -> Array3<ImagePrecision>
    where
        T: AsArray<'a, ImagePrecision, Ix2>,
    {
        let cols: ArrayView2<ImagePrecision> = cols.into();
        let k = self.kernel_size;
        let mut image = Array3::zeros((self.channels, self.height, self.width));
        for (row, patch) in cols.outer_iter().enumerate() {
            let (oh, ow) = (row / self.out_width, row % self.out_width);
            let mut col = 0;
            for c in 0..self.channels {
                for kh in 0..k {
                    for kw in 0..k {
                        if let Some((ih, iw)) = self.source_pixel(oh, ow, kh, kw) {
                            image[[c, ih, iw]] += patch[col];
                        }
                        col += 1;
                    }
                }
            }
        }
        image
    }
}

/// Rust implementation of a convolutional layer.
/// The weight matrix shall have dimension (in that order)
/// output channels (filters) x input channels x kernel height x kernel width
/// (to comply with the order in which pytorch weights are saved).
pub struct ConvolutionLayer {
    kernel: Parameter,
    bias: Parameter,
    kernel_size: usize,
    stride: usize,
    padding: Padding,
    num_filters: usize,
    img_channels: usize,
    input: Option<InternalDataRepresentation>,
}

impl ConvolutionLayer {
    pub fn new(weights: ConvKernel, stride: usize, padding: Padding) -> ConvolutionLayer {
        let num_filters = weights.len_of(Axis(0));
        let img_channels = weights.len_of(Axis(1));
        let kernel_size = weights.len_of(Axis(2));
        debug_assert_eq!(kernel_size, weights.len_of(Axis(3)), "Kernel is not square");
        debug_assert!(stride > 0, "Stride of 0 passed");

        ConvolutionLayer {
            kernel: Parameter::new(weights.into_dyn()),
            bias: Parameter::new(ArrayD::zeros(IxDyn(&[num_filters]))),
            kernel_size,
            stride,
            padding,
            num_filters,
            img_channels,
            input: None,
        }
    }

    /// Glorot initialised layer with zero bias.
    pub fn glorot<R: Rng + ?Sized>(
        img_channels: usize,
        num_filters: usize,
        kernel_size: usize,
        stride: usize,
        padding: Padding,
        rng: &mut R,
    ) -> ConvolutionLayer {
        let receptive = kernel_size * kernel_size;
        let weights = glorot_uniform(
            (num_filters, img_channels, kernel_size, kernel_size),
            img_channels * receptive,
            num_filters * receptive,
            rng,
        );
        ConvolutionLayer::new(weights, stride, padding)
    }

    pub fn geometry(&self, height: usize, width: usize) -> MlResult<ConvGeometry> {
        ConvGeometry::new(
            self.img_channels,
            height,
            width,
            self.kernel_size,
            self.stride,
            self.padding,
        )
    }

    /// Kernel flattened to (filters, channels * kernel_size * kernel_size).
    fn kernel_matrix(&self) -> MlResult<ArrayView2<WeightPrecision>> {
        let patch_len = self.img_channels * self.kernel_size * self.kernel_size;
        Ok(self
            .kernel
            .value
            .view()
            .into_shape((self.num_filters, patch_len))?)
    }

    fn check_input(&self, shape: &[usize]) -> MlResult<()> {
        expect_ndim(self.name(), shape, 4)?;
        if shape[1] != self.img_channels {
            return Err(MlError::InputShapeError {
                layer: self.name(),
                expected: vec![shape[0], self.img_channels, shape[2], shape[3]],
                actual: shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Performs a convolution on a batch of images in (batch, channels, height, width) layout.
    pub fn convolve(
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
            .into_shape((self.num_filters, 1, 1))?;

        let mut output = Array4::zeros((
            batch,
            self.num_filters,
            geometry.out_height,
            geometry.out_width,
        ));
        for (image, mut out) in images.outer_iter().zip(output.outer_iter_mut()) {
            let cols = geometry.im2col(image);
            let activations = kernel.dot(&cols.t()).into_shape((
                self.num_filters,
                geometry.out_height,
                geometry.out_width,
            ))?;
            out.assign(&(&activations + &bias));
        }
        Ok(output)
    }
}

impl Layer for ConvolutionLayer {
    fn name(&self) -> &'static str {
        "Conv2D"
    }

    fn forward(&mut self, input: &ArrayD<f32>, _mode: Mode) -> MlResult<ArrayD<f32>> {
        let images = input.view().into_dimensionality::<Ix4>()?;
        let output = self.convolve(images)?;
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
        let grad = to_standard(grad_output.view().into_dimensionality::<Ix4>()?);
        let kernel = self.kernel_matrix()?;

        let mut grad_kernel: Array2<WeightPrecision> =
            Array2::zeros((self.num_filters, geometry.patch_len()));
        let mut grad_input = Array4::zeros(input.raw_dim());
        for ((image, g), mut dx) in input
            .outer_iter()
            .zip(grad.outer_iter())
            .zip(grad_input.outer_iter_mut())
        {
            let cols = geometry.im2col(image);
            let g = g.into_shape((self.num_filters, geometry.num_patches()))?;
            grad_kernel += &g.dot(&cols);
            let grad_cols = g.t().dot(&kernel);
            dx.assign(&geometry.col2im(&grad_cols));
        }

        self.bias.gradient = grad
            .sum_axis(Axis(3))
            .sum_axis(Axis(2))
            .sum_axis(Axis(0))
            .into_dyn();
        self.kernel.gradient = grad_kernel
            .into_shape((
                self.num_filters,
                self.img_channels,
                self.kernel_size,
                self.kernel_size,
            ))?
            .into_dyn();
        Ok(grad_input.into_dyn())
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        self.check_input(input_shape)?;
        let geometry = self.geometry(input_shape[2], input_shape[3])?;
        Ok(vec![
            input_shape[0],
            self.num_filters,
            geometry.out_height,
            geometry.out_width,
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

    fn single(img: Array2<f32>) -> Array4<f32> {
        let (h, w) = img.dim();
        img.into_shape((1, 1, h, w)).unwrap()
    }

    #[test]
    fn test_naive_2d_conv() {
        let test_img = array![[0., 1., 0.], [0., 0., 0.], [-1., 0., 0.]];
        let kernel = Array::from_shape_vec((1, 1, 2, 2), vec![0., 1., -1., 0.]).unwrap();
        let conv_layer = ConvolutionLayer::new(kernel, 1, Padding::Valid);

        let convolved_image = conv_layer.convolve(single(test_img).view()).unwrap();

        assert_eq!(
            convolved_image.index_axis(Axis(0), 0).index_axis(Axis(0), 0),
            array![[1., 0.], [1., 0.]]
        );
    }

    #[test]
    fn test_naive_2d_conv_with_stride() {
        let test_img: Array2<ImagePrecision> = array![[0., 1., 0.], [0., 0., 0.], [-1., 0., 0.]];
        let kernel = Array::from_shape_vec((1, 1, 1, 1), vec![1.]).unwrap();
        let conv_layer = ConvolutionLayer::new(kernel, 2, Padding::Valid);

        let convolved_image = conv_layer.convolve(single(test_img).view()).unwrap();

        assert_eq!(
            convolved_image.index_axis(Axis(0), 0).index_axis(Axis(0), 0),
            array![[0., 0.], [-1., 0.]]
        );
    }

    #[test]
    fn test_2d_conv() {
        let channel = array![
            [1.0, 2.0, 3.0, 4.0],
            [4.0, 5.0, 6.0, 7.0],
            [7.0, 8.0, 9.0, 9.0],
            [7.0, 8.0, 9.0, 9.0]
        ];
        let test_img = stack![Axis(0), channel, channel, channel].insert_axis(Axis(0));
        let kernel = Array::from_shape_vec(
            (1, 3, 2, 2),
            vec![1., 2., 1., 2., 1., 2., 1., 2., 1., 2., 1., 2.],
        )
        .unwrap();
        let conv_layer = ConvolutionLayer::new(kernel, 1, Padding::Valid);
        let output = arr3(&[[
            [57.0, 75.0, 93.0],
            [111.0, 129.0, 141.0],
            [138.0, 156.0, 162.0],
        ]])
        .insert_axis(Axis(0));
        let convolved_image = conv_layer.convolve(test_img.view()).unwrap();

        assert_eq!(convolved_image, output);
    }

    #[test]
    fn test_same_padding_sizes() {
        // Tensorflow: out = ceil(in / stride)
        let g = ConvGeometry::new(1, 48, 48, 5, 2, Padding::Same).unwrap();
        assert_eq!((g.out_height, g.out_width), (24, 24));
        assert_eq!(g.pad_top, 1);
        let g = ConvGeometry::new(1, 6, 5, 5, 2, Padding::Same).unwrap();
        assert_eq!((g.out_height, g.out_width), (3, 3));
        let g = ConvGeometry::new(1, 6, 6, 5, 1, Padding::Same).unwrap();
        assert_eq!((g.out_height, g.out_width, g.pad_top), (6, 6, 2));
        assert!(ConvGeometry::new(1, 2, 2, 3, 1, Padding::Valid).is_err());
    }

    #[test]
    fn test_same_conv_keeps_size() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = ConvolutionLayer::glorot(2, 3, 5, 2, Padding::Same, &mut rng);
        let input = Array4::<f32>::ones((4, 2, 7, 7)).into_dyn();
        let out = layer.forward(&input, Mode::Train).unwrap();
        assert_eq!(out.shape(), &[4, 3, 4, 4]);
        assert_eq!(layer.output_shape(input.shape()).unwrap(), vec![4, 3, 4, 4]);
    }

    #[test]
    fn test_col2im_is_adjoint_of_im2col() {
        let mut rng = StdRng::seed_from_u64(1);
        let g = ConvGeometry::new(2, 5, 6, 3, 2, Padding::Same).unwrap();
        let x = Array3::random_using((2, 5, 6), Uniform::new(-1., 1.), &mut rng);
        let y = Array2::random_using(
            (g.num_patches(), g.patch_len()),
            Uniform::new(-1., 1.),
            &mut rng,
        );
        let lhs = (&g.im2col(&x) * &y).sum();
        let rhs = (&x * &g.col2im(&y)).sum();
        assert!((lhs - rhs).abs() < 1e-4);
    }

    #[test]
    fn test_backward_is_adjoint() {
        // The layer is linear in its input and in its kernel (bias is zero), so
        // <conv(x), g> == <x, dx> == <kernel, dkernel>.
        let mut rng = StdRng::seed_from_u64(2);
        let mut layer = ConvolutionLayer::glorot(3, 4, 3, 2, Padding::Same, &mut rng);
        let x = Array4::random_using((2, 3, 6, 5), Uniform::new(-1., 1.), &mut rng).into_dyn();
        let out = layer.forward(&x, Mode::Train).unwrap();
        let g = ArrayD::random_using(out.raw_dim(), Uniform::new(-1., 1.), &mut rng);
        let dx = layer.backward(&g).unwrap();

        let forward_dot = (&out * &g).sum();
        assert!((forward_dot - (&x * &dx).sum()).abs() < 1e-3);
        let kernel = &layer.parameters()[0];
        assert!((forward_dot - (&kernel.value * &kernel.gradient).sum()).abs() < 1e-3);
        assert_eq!(
            layer.parameters()[1].gradient,
            g.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0))
        );
    }

    #[test]
    fn test_backward_without_forward_fails() {
        let mut layer = ConvolutionLayer::new(Array4::ones((1, 1, 1, 1)), 1, Padding::Valid);
        let g = Array4::<f32>::ones((1, 1, 2, 2)).into_dyn();
        assert!(matches!(
            layer.backward(&g),
            Err(MlError::MissingForwardCache(_))
        ));
    }

    #[test]
    fn test_wrong_channels() {
        let layer = ConvolutionLayer::new(Array4::ones((1, 2, 1, 1)), 1, Padding::Valid);
        let x = Array4::<f32>::ones((1, 3, 2, 2));
        assert!(layer.convolve(x.view()).is_err());
    }
}
