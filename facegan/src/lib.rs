//! Image output of the face DCGAN: pixel conversion, mosaics and the observer
//! that writes checkpoints to disk.
use adversarial::{
    checkpoint::{step_sample_filename, MosaicKind, FINAL_SAMPLE_FILENAME},
    trainer::{StepReport, Trainer},
    TrainingObserver, TrainingResult,
};
use image::{GrayImage, Luma};
use log::info;
use ndarray::{Array2, ArrayView2, ArrayView4, Axis};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Tiles per mosaic row.
pub const MOSAIC_COLUMNS: usize = 4;
/// Every image pixel becomes a `MOSAIC_SCALE x MOSAIC_SCALE` block.
pub const MOSAIC_SCALE: usize = 4;
/// White border between the tiles, in output pixels.
pub const MOSAIC_PADDING: usize = 4;

/// Turns output from neural net into a pixel value
pub fn to_pixel(x: &f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Turns a (rows, cols) array into a grayscale image
pub fn array_to_image(arr: ArrayView2<u8>) -> GrayImage {
    let (height, width) = arr.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([arr[[y as usize, x as usize]]])
    })
}

/// Single (rows, cols, 1) image with intensities in `[0, 1]` as pixels.
fn sample_pixels(images: &ArrayView4<f32>, i: usize) -> Array2<u8> {
    images
        .index_axis(Axis(0), i)
        .index_axis(Axis(2), 0)
        .map(to_pixel)
}

/// Lays out (n, rows, cols, 1) images with intensities in `[0, 1]` on a grid
/// with `columns` tiles per row, upscaled by `scale`.
pub fn compose_mosaic(
    images: ArrayView4<f32>,
    columns: usize,
    scale: usize,
    padding: usize,
) -> GrayImage {
    let (n, rows, cols, _) = images.dim();
    let columns = columns.max(1);
    let scale = scale.max(1);
    let grid_rows = (n + columns - 1) / columns;
    let tile_height = rows * scale;
    let tile_width = cols * scale;
    let width = columns * tile_width + (columns + 1) * padding;
    let height = grid_rows * tile_height + (grid_rows + 1) * padding;

    let mut mosaic = GrayImage::from_pixel(width as u32, height as u32, Luma([255]));
    for i in 0..n {
        let top = padding + (i / columns) * (tile_height + padding);
        let left = padding + (i % columns) * (tile_width + padding);
        let pixels = sample_pixels(&images, i);
        for ((r, c), &value) in pixels.indexed_iter() {
            for dy in 0..scale {
                for dx in 0..scale {
                    let x = left + c * scale + dx;
                    let y = top + r * scale + dy;
                    mosaic.put_pixel(x as u32, y as u32, Luma([value]));
                }
            }
        }
    }
    mosaic
}

/// Prints the step reports and writes checkpoint images into a directory.
pub struct ImageWriter {
    output_dir: PathBuf,
}

impl ImageWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> TrainingResult<Self> {
        fs::create_dir_all(output_dir.as_ref())?;
        Ok(Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write_mosaic(
        &self,
        kind: MosaicKind,
        images: ArrayView4<f32>,
    ) -> TrainingResult<PathBuf> {
        let path = self.output_dir.join(kind.filename());
        compose_mosaic(images, MOSAIC_COLUMNS, MOSAIC_SCALE, MOSAIC_PADDING).save(&path)?;
        info!("Saved {} to {:?}", kind, path);
        Ok(path)
    }

    /// Writes the first of the images unscaled under `filename`.
    pub fn write_sample(&self, filename: &str, images: ArrayView4<f32>) -> TrainingResult<PathBuf> {
        let path = self.output_dir.join(filename);
        array_to_image(sample_pixels(&images, 0).view()).save(&path)?;
        Ok(path)
    }

    /// Writes one generated image, a mosaic of generated images and a mosaic
    /// of real images.
    pub fn write_final_outputs(&self, trainer: &mut Trainer) -> TrainingResult<()> {
        let single = trainer.generate(1)?;
        self.write_sample(FINAL_SAMPLE_FILENAME, single.view())?;

        let samples = trainer.config().mosaic_samples;
        let generated = trainer.generate(samples)?;
        self.write_mosaic(MosaicKind::Final, generated.view())?;

        let real = trainer.real_samples(samples);
        self.write_mosaic(MosaicKind::Real, real.view())?;
        Ok(())
    }
}

impl TrainingObserver for ImageWriter {
    fn on_step(&mut self, report: &StepReport) -> TrainingResult<()> {
        println!("{}", report);
        Ok(())
    }

    fn on_checkpoint(&mut self, step: usize, images: &ndarray::Array4<f32>) -> TrainingResult<()> {
        self.write_sample(&step_sample_filename(step), images.view())?;
        self.write_mosaic(MosaicKind::Step(step), images.view())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adversarial::{config::TrainingConfig, dataset::FaceDataset};
    use ml::models::{DiscriminatorConfig, GeneratorConfig};
    use ndarray::{array, Array4};

    #[test]
    fn test_to_pixel() {
        assert_eq!(to_pixel(&0.), 0);
        assert_eq!(to_pixel(&1.), 255);
        assert_eq!(to_pixel(&0.5), 128);
        assert_eq!(to_pixel(&-3.), 0);
        assert_eq!(to_pixel(&7.), 255);
    }

    #[test]
    fn test_array_to_image() {
        let arr = array![[0u8, 10, 20], [30, 40, 50]];
        let img = array_to_image(arr.view());
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(2, 0), &Luma([20]));
        assert_eq!(img.get_pixel(0, 1), &Luma([30]));
    }

    #[test]
    fn test_mosaic_layout() {
        let mut images = Array4::zeros((16, 2, 3, 1));
        images[[5, 1, 2, 0]] = 1.;
        let mosaic = compose_mosaic(images.view(), 4, 2, 1);
        // 4 tiles of 6 px plus 5 px padding
        assert_eq!(mosaic.dimensions(), (4 * 6 + 5, 4 * 4 + 5));
        // padding stays white
        assert_eq!(mosaic.get_pixel(0, 0), &Luma([255]));
        // tile 5 is row 1, column 1
        let (left, top) = (1 + 7, 1 + 5);
        assert_eq!(mosaic.get_pixel(left, top), &Luma([0]));
        assert_eq!(mosaic.get_pixel(left + 2 * 2 + 1, top + 2 + 1), &Luma([255]));
    }

    #[test]
    fn test_incomplete_last_row() {
        let images = Array4::<f32>::zeros((5, 2, 2, 1));
        let mosaic = compose_mosaic(images.view(), 4, 1, 0);
        assert_eq!(mosaic.dimensions(), (8, 4));
        assert_eq!(mosaic.get_pixel(7, 3), &Luma([255]));
    }

    #[test]
    fn test_checkpoint_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ImageWriter::new(dir.path().join("out")).unwrap();
        let images = Array4::from_elem((16, 8, 8, 1), 0.5);
        writer.on_checkpoint(5, &images).unwrap();
        assert!(dir.path().join("out/face_noise_step5.png").is_file());
        let single = image::open(dir.path().join("out/test_step5.tiff"))
            .unwrap()
            .to_luma8();
        assert_eq!(single.dimensions(), (8, 8));
        assert!(single.pixels().all(|p| p == &Luma([128])));
    }

    fn small_run(train_steps: usize) -> Trainer {
        let mut config = TrainingConfig {
            train_steps,
            batch_size: 2,
            save_interval: 1,
            pool_size: 4,
            mosaic_samples: 4,
            seed: Some(3),
            ..TrainingConfig::default()
        };
        config.model.rows = 8;
        config.model.cols = 8;
        config.model.generator = GeneratorConfig {
            depth: 8,
            ..GeneratorConfig::default()
        };
        config.model.discriminator = DiscriminatorConfig {
            depth: 2,
            ..DiscriminatorConfig::default()
        };
        let dataset = FaceDataset::from_array(Array4::from_elem((3, 8, 8, 1), 100.)).unwrap();
        Trainer::new(config, dataset).unwrap()
    }

    #[test]
    fn test_zero_steps_write_no_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ImageWriter::new(dir.path()).unwrap();
        let mut trainer = small_run(0);
        trainer.train(&mut writer).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        // only the final outputs appear afterwards
        writer.write_final_outputs(&mut trainer).unwrap();
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["face_noise_final.png", "face_true.png", "test_gen.tiff"]);
    }

    #[test]
    fn test_training_writes_checkpoints_and_final_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ImageWriter::new(dir.path()).unwrap();
        let mut trainer = small_run(2);
        trainer.train(&mut writer).unwrap();
        writer.write_final_outputs(&mut trainer).unwrap();

        for name in &[
            "face_noise_step1.png",
            "face_noise_step2.png",
            "test_step1.tiff",
            "test_step2.tiff",
            "test_gen.tiff",
            "face_noise_final.png",
            "face_true.png",
        ] {
            assert!(dir.path().join(name).is_file(), "{} missing", name);
        }
    }
}
