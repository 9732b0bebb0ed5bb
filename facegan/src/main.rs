//! Command line interface to train the face DCGAN and to inspect the
//! augmented training data.

use adversarial::{
    augmentation::Augmenter, config::TrainingConfig, dataset::FaceDataset, timer::ElapsedTimer,
    trainer::Trainer, TrainingResult,
};
use env_logger::Builder;
use facegan::{compose_mosaic, ImageWriter, MOSAIC_COLUMNS, MOSAIC_PADDING, MOSAIC_SCALE};
use log::info;
use ml::dcgan::DiscriminatorCoupling;
use quicli::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use std::path::PathBuf;
use structopt::StructOpt;

/// Trains the DCGAN on a directory of face images
#[derive(Debug, StructOpt)]
struct TrainOpts {
    /// Directory that is searched recursively for png images, or a .npy array
    #[structopt(parse(from_os_str), default_value = "A")]
    dataset: PathBuf,
    /// JSON training configuration, flags below take precedence
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    config: Option<PathBuf>,
    /// Directory the checkpoint and final images are written to
    #[structopt(short = "o", long = "output", parse(from_os_str), default_value = ".")]
    output: PathBuf,
    /// Number of training iterations
    #[structopt(long = "steps")]
    steps: Option<usize>,
    /// Real images per iteration, the discriminator sees twice as many
    #[structopt(short = "b", long = "batch-size")]
    batch_size: Option<usize>,
    /// Iterations between checkpoints, 0 disables them
    #[structopt(long = "save-interval")]
    save_interval: Option<usize>,
    /// Number of augmented images generated before training
    #[structopt(long = "pool-size")]
    pool_size: Option<usize>,
    /// Seed for weights, sampling and augmentation
    #[structopt(long = "seed")]
    seed: Option<u64>,
    /// Only update the generator in the adversarial step
    #[structopt(long = "freeze-discriminator")]
    freeze_discriminator: bool,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Writes a mosaic of augmented training images
#[derive(Debug, StructOpt)]
struct PreviewOpts {
    /// Directory that is searched recursively for png images, or a .npy array
    #[structopt(parse(from_os_str), default_value = "A")]
    dataset: PathBuf,
    /// Output path of the mosaic
    #[structopt(
        short = "o",
        long = "output",
        parse(from_os_str),
        default_value = "augmented_preview.png"
    )]
    output: PathBuf,
    /// JSON training configuration, used for image size and augmentation
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    config: Option<PathBuf>,
    /// Number of augmented images in the mosaic
    #[structopt(short = "n", long = "samples", default_value = "16")]
    samples: usize,
    #[structopt(long = "seed")]
    seed: Option<u64>,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Generate faces with a deep convolutional generative adversarial network.
#[derive(Debug, StructOpt)]
#[structopt(name = "FaceGAN")]
enum Facegan {
    #[structopt(
        name = "train",
        about = "Trains the generator and discriminator, writes checkpoint mosaics and \
        the final samples."
    )]
    Train(TrainOpts),
    #[structopt(
        name = "preview",
        about = "Writes a mosaic of augmented training images."
    )]
    Preview(PreviewOpts),
}

/// Trait for the subcommands that facegan uses
trait FaceganOpts {
    /// Performs the subcommand
    fn run(&self) -> CliResult;
    /// Returns the verbosity command
    fn get_verbosity(&self) -> &Verbosity;
    /// Sets up logging
    fn setup_env_logger(&self) -> CliResult {
        let mut builder = Builder::from_default_env();

        builder
            .filter(None, self.get_verbosity().log_level().to_level_filter())
            .init();

        Ok(())
    }
}

/// Configuration file if given, defaults otherwise
fn load_config(path: &Option<PathBuf>) -> TrainingResult<TrainingConfig> {
    match path {
        Some(p) => TrainingConfig::from_json_file(p),
        None => Ok(TrainingConfig::default()),
    }
}

impl TrainOpts {
    fn training_config(&self) -> TrainingResult<TrainingConfig> {
        let mut config = load_config(&self.config)?;
        if let Some(steps) = self.steps {
            config.train_steps = steps;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(save_interval) = self.save_interval {
            config.save_interval = save_interval;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.freeze_discriminator {
            config.model.coupling = DiscriminatorCoupling::Frozen;
        }
        Ok(config)
    }
}

impl FaceganOpts for TrainOpts {
    // Performs the training run
    fn run(&self) -> CliResult {
        let config = self.training_config()?;
        let dataset = FaceDataset::load(&self.dataset, config.model.rows, config.model.cols)?;
        println!("{:?}", dataset.images().shape());

        let mut writer = ImageWriter::new(&self.output)?;
        let mut trainer = Trainer::new(config, dataset)?;
        let timer = ElapsedTimer::start();
        trainer.train(&mut writer)?;
        println!("{}", timer);

        writer.write_final_outputs(&mut trainer)?;
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl FaceganOpts for PreviewOpts {
    // Writes the augmented mosaic
    fn run(&self) -> CliResult {
        let config = load_config(&self.config)?;
        config.augmentation.validate()?;
        let dataset = FaceDataset::load(&self.dataset, config.model.rows, config.model.cols)?;

        let rng = match self.seed.or(config.seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut augmenter = Augmenter::new(config.augmentation, rng);
        let pool = augmenter.pool(&dataset, self.samples);

        compose_mosaic(pool.view(), MOSAIC_COLUMNS, MOSAIC_SCALE, MOSAIC_PADDING)
            .save(&self.output)?;
        info!("Saved {} augmented images to {:?}", self.samples, self.output);
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl FaceganOpts for Facegan {
    fn run(&self) -> CliResult {
        match self {
            Facegan::Train(c) => c.run(),
            Facegan::Preview(c) => c.run(),
        }
    }

    fn get_verbosity(&self) -> &Verbosity {
        match self {
            Facegan::Train(c) => c.get_verbosity(),
            Facegan::Preview(c) => c.get_verbosity(),
        }
    }
}

fn main() -> CliResult {
    let args = Facegan::from_args();
    args.setup_env_logger()?;
    args.run()
}
