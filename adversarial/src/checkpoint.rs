//! Names of the files a training run produces.
use std::fmt;

/// Single generated image written after training.
pub const FINAL_SAMPLE_FILENAME: &str = "test_gen.tiff";

/// Whether iteration `i` (counted from 0) ends with a checkpoint.
/// An interval of 0 disables checkpoints.
pub fn is_checkpoint_step(i: usize, interval: usize) -> bool {
    interval > 0 && (i + 1) % interval == 0
}

/// What a mosaic shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosaicKind {
    /// Generated images after the given iteration (counted from 1).
    Step(usize),
    /// Generated images after training.
    Final,
    /// Real training images.
    Real,
}

impl MosaicKind {
    pub fn filename(&self) -> String {
        match self {
            MosaicKind::Step(step) => format!("face_noise_step{}.png", step),
            MosaicKind::Final => "face_noise_final.png".to_string(),
            MosaicKind::Real => "face_true.png".to_string(),
        }
    }
}

impl fmt::Display for MosaicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MosaicKind::Step(step) => write!(f, "generated faces after step {}", step),
            MosaicKind::Final => write!(f, "generated faces"),
            MosaicKind::Real => write!(f, "training faces"),
        }
    }
}

/// Raw generated image stored next to the mosaic of a checkpoint.
pub fn step_sample_filename(step: usize) -> String {
    format!("test_step{}.tiff", step)
}
