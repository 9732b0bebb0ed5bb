//! Random geometric augmentation of the training faces.
//!
//! Follows the Keras `ImageDataGenerator` pipeline: a random affine transform
//! (rotation, shift, zoom) about the image centre, sampled bilinearly with the
//! nearest border pixel as fill, an optional horizontal flip and finally a
//! rescaling of the intensities.
use crate::{dataset::FaceDataset, TrainingError, TrainingResult};
use log::info;
use ndarray::*;
use rand::{rngs::StdRng, seq::SliceRandom, Rng};
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximal rotation in degrees, either direction.
    pub rotation_range: f32,
    /// Maximal horizontal shift as fraction of the width.
    pub width_shift_range: f32,
    /// Maximal vertical shift as fraction of the height.
    pub height_shift_range: f32,
    /// Zoom factors are drawn per axis from `[1 - zoom_range, 1 + zoom_range]`.
    pub zoom_range: f32,
    /// Multiplied onto every intensity after the transform.
    pub rescale: f32,
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 10.,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            zoom_range: 0.1,
            rescale: 1. / 255.,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Only rescales, no geometric changes.
    pub fn rescale_only() -> Self {
        Self {
            rotation_range: 0.,
            width_shift_range: 0.,
            height_shift_range: 0.,
            zoom_range: 0.,
            horizontal_flip: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        let ranges = [
            self.rotation_range,
            self.width_shift_range,
            self.height_shift_range,
            self.zoom_range,
        ];
        if ranges.iter().any(|r| !r.is_finite() || *r < 0.) {
            return Err(TrainingError::InvalidConfig(format!(
                "augmentation ranges have to be non-negative, got {:?}",
                ranges
            )));
        }
        if self.zoom_range >= 1. {
            return Err(TrainingError::InvalidConfig(format!(
                "zoom range {} would allow zooming to 0",
                self.zoom_range
            )));
        }
        Ok(())
    }
}

/// Parameters of one random transform.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Transform {
    /// radians
    theta: f32,
    /// pixels along rows
    shift_rows: f32,
    /// pixels along cols
    shift_cols: f32,
    zoom_rows: f32,
    zoom_cols: f32,
    flip: bool,
}

impl Transform {
    /// Source position of output pixel (row, col).
    ///
    /// The output is zoomed, shifted and rotated about the image centre,
    /// the affine map goes from output to input coordinates.
    fn source(&self, row: f32, col: f32, center: (f32, f32)) -> (f32, f32) {
        let (cos, sin) = (self.theta.cos(), self.theta.sin());
        let r = (row - center.0) * self.zoom_rows + self.shift_rows;
        let c = (col - center.1) * self.zoom_cols + self.shift_cols;
        (cos * r - sin * c + center.0, sin * r + cos * c + center.1)
    }

    fn apply(&self, image: ArrayView2<f32>) -> Array2<f32> {
        let (rows, cols) = image.dim();
        let center = (rows as f32 / 2. - 0.5, cols as f32 / 2. - 0.5);
        let mut out = Array2::from_shape_fn((rows, cols), |(r, c)| {
            let (sr, sc) = self.source(r as f32, c as f32, center);
            bilinear_nearest(&image, sr, sc)
        });
        if self.flip {
            out.invert_axis(Axis(1));
        }
        out
    }
}

/// Bilinear interpolation, coordinates outside the image take the value of
/// the nearest border pixel.
fn bilinear_nearest(image: &ArrayView2<f32>, row: f32, col: f32) -> f32 {
    let (rows, cols) = image.dim();
    let row = row.max(0.).min((rows - 1) as f32);
    let col = col.max(0.).min((cols - 1) as f32);
    let (r0, c0) = (row.floor() as usize, col.floor() as usize);
    let (r1, c1) = ((r0 + 1).min(rows - 1), (c0 + 1).min(cols - 1));
    let (fr, fc) = (row - r0 as f32, col - c0 as f32);

    image[[r0, c0]] * (1. - fr) * (1. - fc)
        + image[[r0, c1]] * (1. - fr) * fc
        + image[[r1, c0]] * fr * (1. - fc)
        + image[[r1, c1]] * fr * fc
}

pub struct Augmenter {
    config: AugmentationConfig,
    rng: StdRng,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, rng: StdRng) -> Self {
        Self { config, rng }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    fn symmetric(&mut self, range: f32) -> f32 {
        self.rng.gen_range(-range..=range)
    }

    fn sample_transform(&mut self, rows: usize, cols: usize) -> Transform {
        let c = self.config;
        let theta = self.symmetric(c.rotation_range).to_radians();
        let shift_rows = self.symmetric(c.height_shift_range) * rows as f32;
        let shift_cols = self.symmetric(c.width_shift_range) * cols as f32;
        let zoom_rows = 1. + self.symmetric(c.zoom_range);
        let zoom_cols = 1. + self.symmetric(c.zoom_range);
        let flip = c.horizontal_flip && self.rng.gen_bool(0.5);
        Transform {
            theta,
            shift_rows,
            shift_cols,
            zoom_rows,
            zoom_cols,
            flip,
        }
    }

    /// Randomly transforms and rescales one (rows, cols, 1) image.
    /// The result is clamped to `[0, 1]`.
    pub fn random_transform(&mut self, image: ArrayView3<f32>) -> Array3<f32> {
        let (rows, cols, _) = image.dim();
        let transform = self.sample_transform(rows, cols);
        let rescale = self.config.rescale;
        let mut out = Array3::zeros(image.raw_dim());
        for (channel, mut target) in image
            .axis_iter(Axis(2))
            .zip(out.axis_iter_mut(Axis(2)))
        {
            let transformed = transform.apply(channel);
            Zip::from(&mut target)
                .and(&transformed)
                .for_each(|t, &x| *t = (x * rescale).clamp(0., 1.));
        }
        out
    }

    /// Endless stream of augmented images. The dataset is walked in shuffled
    /// order, reshuffled after every pass.
    pub fn flow<'a>(&'a mut self, dataset: &'a FaceDataset) -> Flow<'a> {
        Flow {
            augmenter: self,
            dataset,
            order: (0..dataset.len()).collect(),
            position: dataset.len(),
        }
    }

    /// Generates `size` augmented images, shape (size, rows, cols, 1).
    pub fn pool(&mut self, dataset: &FaceDataset, size: usize) -> Array4<f32> {
        let (rows, cols) = dataset.image_shape();
        let mut pool = Array4::zeros((size, rows, cols, ml::CHANNELS));
        for (mut slot, image) in pool.outer_iter_mut().zip(self.flow(dataset)) {
            slot.assign(&image);
        }
        info!("Augmented pool of shape {:?}", pool.shape());
        pool
    }
}

pub struct Flow<'a> {
    augmenter: &'a mut Augmenter,
    dataset: &'a FaceDataset,
    order: Vec<usize>,
    position: usize,
}

impl<'a> Iterator for Flow<'a> {
    type Item = Array3<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.order.is_empty() {
            return None;
        }
        if self.position >= self.order.len() {
            self.order.shuffle(&mut self.augmenter.rng);
            self.position = 0;
        }
        let index = self.order[self.position];
        self.position += 1;
        Some(self.augmenter.random_transform(self.dataset.image(index)))
    }
}
