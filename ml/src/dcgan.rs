//! The two trainable stacks of the DCGAN and the builder that owns them.
//!
//! The discriminator model trains the discriminator on real and generated
//! images. The adversarial model stacks generator and discriminator and
//! trains the generator to make the discriminator answer "real". Both models
//! hold handles to the same discriminator.
use crate::{
    layers::Mode,
    losses::{binary_accuracy, binary_crossentropy},
    models::{to_channels_first, Discriminator, DiscriminatorConfig, Generator, GeneratorConfig},
    optimizers::{RmsProp, RmsPropConfig},
    ImagePrecision, MlError, MlResult,
};
use log::{info, warn};
use ndarray::*;
use ndarray_rand::rand::{rngs::StdRng, SeedableRng};
use serde_derive::{Deserialize, Serialize};
use std::{
    cell::{OnceCell, RefCell},
    rc::Rc,
};

/// Which weights the adversarial step updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscriminatorCoupling {
    /// Generator and discriminator weights are both updated by the adversarial
    /// step, the generator-fooling gradient also moves the discriminator.
    Shared,
    /// Only the generator is updated by the adversarial step.
    Frozen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub rows: usize,
    pub cols: usize,
    pub noise_dim: usize,
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
    pub discriminator_optimizer: RmsPropConfig,
    pub adversarial_optimizer: RmsPropConfig,
    pub coupling: DiscriminatorCoupling,
    /// Seed for weight initialisation and dropout. Random if None.
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            rows: 48,
            cols: 48,
            noise_dim: 100,
            generator: GeneratorConfig::default(),
            discriminator: DiscriminatorConfig::default(),
            discriminator_optimizer: RmsPropConfig::discriminator(),
            adversarial_optimizer: RmsPropConfig::adversarial(),
            coupling: DiscriminatorCoupling::Shared,
            seed: None,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> MlResult<()> {
        let invalid = |msg: String| Err(MlError::InvalidConfig(msg));
        if self.rows < 4 || self.cols < 4 || self.rows % 4 != 0 || self.cols % 4 != 0 {
            return invalid(format!(
                "image size {}x{} has to be a positive multiple of 4",
                self.rows, self.cols
            ));
        }
        if self.noise_dim == 0 {
            return invalid("noise dimension must not be 0".to_string());
        }
        if self.generator.depth < 8 || self.generator.depth % 8 != 0 {
            return invalid(format!(
                "generator depth {} has to be a positive multiple of 8",
                self.generator.depth
            ));
        }
        if self.discriminator.depth == 0 {
            return invalid("discriminator depth must not be 0".to_string());
        }
        if self.generator.kernel_size == 0 || self.discriminator.kernel_size == 0 {
            return invalid("kernel size must not be 0".to_string());
        }
        for rate in [self.generator.dropout, self.discriminator.dropout].iter() {
            if !(0.0..1.0).contains(rate) {
                return invalid(format!("dropout rate {} not in [0, 1)", rate));
            }
        }
        Ok(())
    }
}

/// Discriminator with its own binary cross-entropy / RMSprop training setup.
pub struct DiscriminatorModel {
    discriminator: Rc<RefCell<Discriminator>>,
    optimizer: RmsProp,
}

impl DiscriminatorModel {
    pub fn new(discriminator: Rc<RefCell<Discriminator>>, optimizer: RmsPropConfig) -> Self {
        Self {
            discriminator,
            optimizer: RmsProp::new(optimizer),
        }
    }

    pub fn discriminator(&self) -> Rc<RefCell<Discriminator>> {
        Rc::clone(&self.discriminator)
    }

    /// One gradient step on a batch of (batch, rows, cols, 1) images with
    /// labels of shape (batch, 1). Returns (loss, accuracy) before the update.
    pub fn train_on_batch(
        &mut self,
        images: ArrayView4<ImagePrecision>,
        labels: &Array2<ImagePrecision>,
    ) -> MlResult<(f32, f32)> {
        let mut discriminator = self.discriminator.borrow_mut();
        let images = to_channels_first(images).into_dyn();
        let predictions = discriminator.forward(&images, Mode::Train)?;
        let (loss, grad) = binary_crossentropy(&predictions, labels)?;
        let accuracy = binary_accuracy(&predictions, labels)?;

        discriminator.backward(&grad)?;
        self.optimizer.step(discriminator.parameters_mut())?;
        Ok((loss, accuracy))
    }
}

/// Generator followed by the discriminator, trained end to end.
pub struct AdversarialModel {
    generator: Rc<RefCell<Generator>>,
    discriminator: Rc<RefCell<Discriminator>>,
    optimizer: RmsProp,
    coupling: DiscriminatorCoupling,
}

impl AdversarialModel {
    pub fn new(
        generator: Rc<RefCell<Generator>>,
        discriminator: Rc<RefCell<Discriminator>>,
        optimizer: RmsPropConfig,
        coupling: DiscriminatorCoupling,
    ) -> Self {
        Self {
            generator,
            discriminator,
            optimizer: RmsProp::new(optimizer),
            coupling,
        }
    }

    pub fn coupling(&self) -> DiscriminatorCoupling {
        self.coupling
    }

    pub fn generator(&self) -> Rc<RefCell<Generator>> {
        Rc::clone(&self.generator)
    }

    pub fn discriminator(&self) -> Rc<RefCell<Discriminator>> {
        Rc::clone(&self.discriminator)
    }

    /// One gradient step through generator and discriminator on a noise batch
    /// of shape (batch, noise_dim) with labels of shape (batch, 1).
    /// Returns (loss, accuracy) before the update.
    pub fn train_on_batch(
        &mut self,
        noise: &Array2<ImagePrecision>,
        labels: &Array2<ImagePrecision>,
    ) -> MlResult<(f32, f32)> {
        let mut generator = self.generator.borrow_mut();
        let mut discriminator = self.discriminator.borrow_mut();

        let fake = generator.forward(noise, Mode::Train)?;
        let predictions = discriminator.forward(&fake, Mode::Train)?;
        let (loss, grad) = binary_crossentropy(&predictions, labels)?;
        let accuracy = binary_accuracy(&predictions, labels)?;

        let grad_fake = discriminator.backward(&grad)?;
        generator.backward(&grad_fake)?;

        let mut params = generator.parameters_mut();
        if self.coupling == DiscriminatorCoupling::Shared {
            params.extend(discriminator.parameters_mut());
        }
        self.optimizer.step(params)?;
        Ok((loss, accuracy))
    }
}

/// Owns the networks and the two training models. Every accessor builds its
/// object on first use and hands out the cached one afterwards.
pub struct Dcgan {
    config: ModelConfig,
    generator: OnceCell<Rc<RefCell<Generator>>>,
    discriminator: OnceCell<Rc<RefCell<Discriminator>>>,
    discriminator_model: OnceCell<Rc<RefCell<DiscriminatorModel>>>,
    adversarial_model: OnceCell<Rc<RefCell<AdversarialModel>>>,
}

impl Dcgan {
    pub fn new(config: ModelConfig) -> MlResult<Dcgan> {
        config.validate()?;
        Ok(Dcgan {
            config,
            generator: OnceCell::new(),
            discriminator: OnceCell::new(),
            discriminator_model: OnceCell::new(),
            adversarial_model: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Each network draws from its own stream so that building order does not
    /// change the weights of a seeded run.
    fn network_rng(&self, stream: u64) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_mul(31).wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }

    pub fn generator(&self) -> Rc<RefCell<Generator>> {
        let generator = self.generator.get_or_init(|| {
            let mut rng = self.network_rng(0);
            Rc::new(RefCell::new(Generator::new(&self.config, &mut rng)))
        });
        Rc::clone(generator)
    }

    pub fn discriminator(&self) -> Rc<RefCell<Discriminator>> {
        let discriminator = self.discriminator.get_or_init(|| {
            let mut rng = self.network_rng(1);
            Rc::new(RefCell::new(Discriminator::new(&self.config, &mut rng)))
        });
        Rc::clone(discriminator)
    }

    pub fn discriminator_model(&self) -> Rc<RefCell<DiscriminatorModel>> {
        let model = self.discriminator_model.get_or_init(|| {
            Rc::new(RefCell::new(DiscriminatorModel::new(
                self.discriminator(),
                self.config.discriminator_optimizer,
            )))
        });
        Rc::clone(model)
    }

    pub fn adversarial_model(&self) -> Rc<RefCell<AdversarialModel>> {
        let model = self.adversarial_model.get_or_init(|| {
            match self.config.coupling {
                DiscriminatorCoupling::Shared => warn!(
                    "Adversarial model updates the shared discriminator weights as well \
                    (coupling = Shared)"
                ),
                DiscriminatorCoupling::Frozen => {
                    info!("Discriminator weights are frozen during the adversarial step")
                }
            }
            Rc::new(RefCell::new(AdversarialModel::new(
                self.generator(),
                self.discriminator(),
                self.config.adversarial_optimizer,
                self.config.coupling,
            )))
        });
        Rc::clone(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    /// Small networks so the tests stay fast: 8x8 images.
    fn tiny_config() -> ModelConfig {
        ModelConfig {
            rows: 8,
            cols: 8,
            generator: GeneratorConfig {
                depth: 16,
                ..GeneratorConfig::default()
            },
            discriminator: DiscriminatorConfig {
                depth: 2,
                ..DiscriminatorConfig::default()
            },
            seed: Some(42),
            ..ModelConfig::default()
        }
    }

    fn noise(batch: usize, dim: usize, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::random_using((batch, dim), Uniform::new_inclusive(-1., 1.), &mut rng)
    }

    fn flat_parameters(discriminator: &Discriminator) -> Vec<f32> {
        discriminator
            .parameters()
            .iter()
            .flat_map(|p| p.value.iter().copied())
            .collect()
    }

    #[test]
    fn test_generator_output_shape_and_range() {
        let dcgan = Dcgan::new(tiny_config()).unwrap();
        let generator = dcgan.generator();
        for seed in 0..3 {
            let images = generator.borrow_mut().predict(&noise(16, 100, seed)).unwrap();
            assert_eq!(images.shape(), &[16, 8, 8, 1]);
            assert!(images.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_generator_rejects_wrong_noise_dim() {
        let dcgan = Dcgan::new(tiny_config()).unwrap();
        let result = dcgan.generator().borrow_mut().predict(&noise(2, 99, 0));
        assert!(matches!(result, Err(MlError::InputShapeError { .. })));
    }

    #[test]
    fn test_discriminator_output_range() {
        let dcgan = Dcgan::new(tiny_config()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let images = Array4::random_using((5, 8, 8, 1), Uniform::new(0., 1.), &mut rng);
        let p = dcgan.discriminator().borrow_mut().predict(images.view()).unwrap();
        assert_eq!(p.shape(), &[5, 1]);
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_discriminator_rejects_wrong_image_size() {
        let dcgan = Dcgan::new(tiny_config()).unwrap();
        let images = Array4::<f32>::zeros((2, 12, 8, 1));
        let result = dcgan.discriminator().borrow_mut().predict(images.view());
        assert!(matches!(result, Err(MlError::InputShapeError { .. })));
    }

    #[test]
    fn test_networks_are_built_once() {
        let dcgan = Dcgan::new(tiny_config()).unwrap();
        assert!(Rc::ptr_eq(&dcgan.generator(), &dcgan.generator()));
        assert!(Rc::ptr_eq(&dcgan.discriminator(), &dcgan.discriminator()));
        assert!(Rc::ptr_eq(
            &dcgan.discriminator_model(),
            &dcgan.discriminator_model()
        ));
        assert!(Rc::ptr_eq(&dcgan.adversarial_model(), &dcgan.adversarial_model()));

        // both training models share the one discriminator
        let from_dm = dcgan.discriminator_model().borrow().discriminator();
        let from_am = dcgan.adversarial_model().borrow().discriminator();
        assert!(Rc::ptr_eq(&from_dm, &dcgan.discriminator()));
        assert!(Rc::ptr_eq(&from_am, &dcgan.discriminator()));
    }

    #[test]
    fn test_seeded_models_are_reproducible() {
        let a = Dcgan::new(tiny_config()).unwrap();
        let b = Dcgan::new(tiny_config()).unwrap();
        // build in different order
        let _ = b.discriminator();
        let ga = a.generator().borrow_mut().predict(&noise(2, 100, 9)).unwrap();
        let gb = b.generator().borrow_mut().predict(&noise(2, 100, 9)).unwrap();
        assert_eq!(ga, gb);
    }

    #[test]
    fn test_discriminator_step_on_mixed_batch() {
        let dcgan = Dcgan::new(tiny_config()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let real = Array4::random_using((256, 8, 8, 1), Uniform::new(0., 1.), &mut rng);
        let fake = dcgan.generator().borrow_mut().predict(&noise(256, 100, 3)).unwrap();
        let x = concatenate![Axis(0), real, fake];
        let mut y = Array2::ones((512, 1));
        y.slice_mut(s![256.., ..]).fill(0.);

        let before = flat_parameters(&dcgan.discriminator().borrow());
        let (loss, acc) = dcgan
            .discriminator_model()
            .borrow_mut()
            .train_on_batch(x.view(), &y)
            .unwrap();
        assert!(loss.is_finite() && loss > 0.);
        assert!((0.0..=1.0).contains(&acc));
        assert_ne!(before, flat_parameters(&dcgan.discriminator().borrow()));
    }

    #[test]
    fn test_shared_coupling_moves_discriminator() {
        let dcgan = Dcgan::new(tiny_config()).unwrap();
        let before = flat_parameters(&dcgan.discriminator().borrow());
        let (loss, acc) = dcgan
            .adversarial_model()
            .borrow_mut()
            .train_on_batch(&noise(8, 100, 4), &Array2::ones((8, 1)))
            .unwrap();
        assert!(loss.is_finite());
        assert!((0.0..=1.0).contains(&acc));
        assert_ne!(before, flat_parameters(&dcgan.discriminator().borrow()));
    }

    #[test]
    fn test_frozen_coupling_keeps_discriminator() {
        let config = ModelConfig {
            coupling: DiscriminatorCoupling::Frozen,
            ..tiny_config()
        };
        let dcgan = Dcgan::new(config).unwrap();
        let before = flat_parameters(&dcgan.discriminator().borrow());
        let generator_before: Vec<f32> = dcgan
            .generator()
            .borrow()
            .parameters()
            .iter()
            .flat_map(|p| p.value.iter().copied())
            .collect();

        dcgan
            .adversarial_model()
            .borrow_mut()
            .train_on_batch(&noise(8, 100, 5), &Array2::ones((8, 1)))
            .unwrap();

        assert_eq!(before, flat_parameters(&dcgan.discriminator().borrow()));
        let generator_after: Vec<f32> = dcgan
            .generator()
            .borrow()
            .parameters()
            .iter()
            .flat_map(|p| p.value.iter().copied())
            .collect();
        assert_ne!(generator_before, generator_after);
    }

    #[test]
    fn test_invalid_configs() {
        let odd_size = ModelConfig {
            rows: 10,
            ..tiny_config()
        };
        assert!(matches!(Dcgan::new(odd_size), Err(MlError::InvalidConfig(_))));

        let mut bad_depth = tiny_config();
        bad_depth.generator.depth = 12;
        assert!(Dcgan::new(bad_depth).is_err());

        let mut bad_dropout = tiny_config();
        bad_dropout.discriminator.dropout = 1.0;
        assert!(Dcgan::new(bad_dropout).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!((config.rows, config.cols, config.noise_dim), (48, 48, 100));
        assert_eq!(config.generator.depth, 256);
        assert_eq!(config.discriminator.depth, 64);
        assert_eq!(config.discriminator_optimizer.learning_rate, 0.0002);
        assert_eq!(config.adversarial_optimizer.learning_rate, 0.0001);
        assert!(config.validate().is_ok());
    }
}
