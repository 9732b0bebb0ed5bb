//! Training configuration. Every field has a default, an empty JSON object
//! is a valid config.
use crate::{augmentation::AugmentationConfig, TrainingError, TrainingResult};
use ml::dcgan::ModelConfig;
use serde_derive::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub augmentation: AugmentationConfig,
    pub train_steps: usize,
    pub batch_size: usize,
    /// Iterations between checkpoints, 0 disables them.
    pub save_interval: usize,
    /// Number of augmented images generated before training.
    pub pool_size: usize,
    /// Iterations after which the augmented pool is regenerated,
    /// 0 keeps one pool for the whole run.
    pub pool_refresh_interval: usize,
    /// Images per mosaic.
    pub mosaic_samples: usize,
    /// Seed for sampling and augmentation. Also seeds the networks unless
    /// `model.seed` is set.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            augmentation: AugmentationConfig::default(),
            train_steps: 30,
            batch_size: 256,
            save_interval: 5,
            pool_size: 50 * 1000,
            pool_refresh_interval: 0,
            mosaic_samples: 16,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn from_json_str(json: &str) -> TrainingResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> TrainingResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        self.model.validate()?;
        self.augmentation.validate()?;
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig(
                "batch size must not be 0".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(TrainingError::InvalidConfig(
                "augmented pool must not be empty".to_string(),
            ));
        }
        if self.mosaic_samples == 0 {
            return Err(TrainingError::InvalidConfig(
                "mosaic needs at least one sample".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml::dcgan::DiscriminatorCoupling;
    use std::io::Write;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = TrainingConfig::from_json_str("{}").unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert_eq!(config.pool_size, 50000);
        assert_eq!(config.batch_size, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{
            "train_steps": 3,
            "seed": 7,
            "model": { "rows": 8, "cols": 8, "coupling": "Frozen" },
            "augmentation": { "horizontal_flip": false }
        }"#;
        let config = TrainingConfig::from_json_str(json).unwrap();
        assert_eq!(config.train_steps, 3);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.model.rows, 8);
        assert_eq!(config.model.noise_dim, 100);
        assert_eq!(config.model.coupling, DiscriminatorCoupling::Frozen);
        assert!(!config.augmentation.horizontal_flip);
        assert_eq!(config.augmentation.rotation_range, 10.);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"batch_size\": 4}}").unwrap();
        let config = TrainingConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 4);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            TrainingConfig::from_json_str("{\"batch_size\": -1}"),
            Err(TrainingError::Config(_))
        ));
        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrainingError::InvalidConfig(_))
        ));
        let mut config = TrainingConfig::default();
        config.model.rows = 47;
        assert!(matches!(config.validate(), Err(TrainingError::Model(_))));
    }
}
