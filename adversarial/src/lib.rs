//! This crate ties the DCGAN models of the `ml` crate to a training process.
//!
//! It loads and augments the face images, samples noise and runs the
//! alternating discriminator / adversarial updates. Everything that leaves
//! the process (console lines, image files) goes through the
//! [`TrainingObserver`] trait, so the trainer itself never touches the
//! output directory.

pub mod augmentation;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod noise;
pub mod timer;
pub mod trainer;
mod training_errors;

pub use training_errors::TrainingError;

use ndarray::Array4;
use trainer::StepReport;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Receives the progress of a training run.
pub trait TrainingObserver {
    /// Called after every training iteration.
    fn on_step(&mut self, report: &StepReport) -> TrainingResult<()>;

    /// Called on checkpoint iterations with freshly generated images of shape
    /// (samples, rows, cols, 1). `step` counts iterations from 1.
    fn on_checkpoint(&mut self, step: usize, images: &Array4<f32>) -> TrainingResult<()>;
}

/// Observer that discards everything.
#[derive(Debug, Default)]
pub struct SilentObserver;

impl TrainingObserver for SilentObserver {
    fn on_step(&mut self, _report: &StepReport) -> TrainingResult<()> {
        Ok(())
    }

    fn on_checkpoint(&mut self, _step: usize, _images: &Array4<f32>) -> TrainingResult<()> {
        Ok(())
    }
}
