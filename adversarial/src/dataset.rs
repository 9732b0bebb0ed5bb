//! The raw training images.
//!
//! Images are kept as intensities in `0..=255`, shape (n, rows, cols, 1).
//! Scaling to `[0, 1]` is done by the augmenter (or by
//! [`FaceDataset::sample_normalized`]).
use crate::{TrainingError, TrainingResult};
use image::{
    imageops::{self, FilterType},
    io::Reader as ImageReader,
};
use log::{debug, info};
use ndarray::*;
use ndarray_npy::{read_npy, ReadNpyError};
use nshare::ToNdarray2;
use rand::Rng;
use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

pub const MAX_INTENSITY: f32 = 255.;

#[derive(Debug, Clone)]
pub struct FaceDataset {
    images: Array4<f32>,
}

impl FaceDataset {
    /// Wraps (n, rows, cols, 1) raw intensities. Fails on an empty batch or
    /// on more than one channel.
    pub fn from_array(images: Array4<f32>) -> TrainingResult<Self> {
        let (n, _, _, channels) = images.dim();
        if channels != ml::CHANNELS {
            return Err(TrainingError::DatasetShape {
                expected: vec![n, images.dim().1, images.dim().2, ml::CHANNELS],
                actual: images.shape().to_vec(),
            });
        }
        if n == 0 {
            return Err(TrainingError::EmptyDataset(PathBuf::new()));
        }
        Ok(Self { images })
    }

    /// Loads every png under `dir` (recursively), converted to grayscale and
    /// resized to `rows x cols`.
    pub fn load_dir<P: AsRef<Path>>(dir: P, rows: usize, cols: usize) -> TrainingResult<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        collect_pngs(dir, &mut paths)?;
        paths.sort();
        if paths.is_empty() {
            return Err(TrainingError::EmptyDataset(dir.to_path_buf()));
        }

        let mut images = Array4::zeros((paths.len(), rows, cols, ml::CHANNELS));
        for (path, mut slot) in paths.iter().zip(images.outer_iter_mut()) {
            debug!("Loading {:?}", path);
            let pixels = load_grayscale(path, rows, cols)?;
            slot.index_axis_mut(Axis(2), 0).assign(&pixels);
        }
        info!("Loaded {} images from {:?}, shape {:?}", paths.len(), dir, images.shape());
        Ok(Self { images })
    }

    /// Loads raw intensities stored as (n, rows, cols) or (n, rows, cols, 1),
    /// as f32, f64 or u8 array.
    pub fn load_npy<P: AsRef<Path>>(path: P) -> TrainingResult<Self> {
        let path = path.as_ref();
        let array = read_intensities(path)?;
        let images = match array.ndim() {
            3 => array.insert_axis(Axis(3)).into_dimensionality::<Ix4>(),
            4 => array.into_dimensionality::<Ix4>(),
            _ => {
                return Err(TrainingError::DatasetShape {
                    expected: vec![0, 0, 0, ml::CHANNELS],
                    actual: array.shape().to_vec(),
                })
            }
        }
        .map_err(ml::MlError::from)?;
        info!("Loaded images from {:?}, shape {:?}", path, images.shape());
        Self::from_array(images)
    }

    /// Directory of pngs or a single `.npy` file.
    pub fn load<P: AsRef<Path>>(path: P, rows: usize, cols: usize) -> TrainingResult<Self> {
        let path = path.as_ref();
        if path.extension().and_then(OsStr::to_str) == Some("npy") {
            Self::load_npy(path)
        } else {
            Self::load_dir(path, rows, cols)
        }
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (rows, cols)
    pub fn image_shape(&self) -> (usize, usize) {
        let (_, rows, cols, _) = self.images.dim();
        (rows, cols)
    }

    pub fn images(&self) -> ArrayView4<f32> {
        self.images.view()
    }

    /// Image `i` as (rows, cols, 1).
    pub fn image(&self, i: usize) -> ArrayView3<f32> {
        self.images.index_axis(Axis(0), i)
    }

    /// `count` images drawn with replacement, scaled to `[0, 1]`.
    pub fn sample_normalized<R: Rng>(&self, count: usize, rng: &mut R) -> Array4<f32> {
        let indices: Vec<usize> = (0..count).map(|_| rng.gen_range(0..self.len())).collect();
        self.images
            .select(Axis(0), &indices)
            .mapv(|x| (x / MAX_INTENSITY).clamp(0., 1.))
    }
}

/// Reads an npy array of any supported element type as f32. Only a dtype
/// mismatch moves on to the next type, if none matches the error of the f32
/// read is returned.
fn read_intensities(path: &Path) -> TrainingResult<ArrayD<f32>> {
    let f32_error = match read_npy::<_, ArrayD<f32>>(path) {
        Ok(array) => return Ok(array),
        Err(e @ ReadNpyError::WrongDescriptor(_)) => e,
        Err(e) => return Err(e.into()),
    };
    match read_npy::<_, ArrayD<f64>>(path) {
        Ok(array) => return Ok(array.mapv(|x| x as f32)),
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        Err(e) => return Err(e.into()),
    }
    match read_npy::<_, ArrayD<u8>>(path) {
        Ok(array) => Ok(array.mapv(f32::from)),
        Err(ReadNpyError::WrongDescriptor(_)) => Err(f32_error.into()),
        Err(e) => Err(e.into()),
    }
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
}

fn collect_pngs(dir: &Path, paths: &mut Vec<PathBuf>) -> TrainingResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_pngs(&path, paths)?;
        } else if is_png(&path) {
            paths.push(path);
        }
    }
    Ok(())
}

/// Grayscale intensities of the image, shape (rows, cols).
fn load_grayscale(path: &Path, rows: usize, cols: usize) -> TrainingResult<Array2<f32>> {
    let gray = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_luma8();
    let resized = imageops::resize(&gray, cols as u32, rows as u32, FilterType::Nearest);
    Ok(resized.into_ndarray2().mapv(f32::from))
}
