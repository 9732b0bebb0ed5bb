//! The alternating DCGAN training loop.
use crate::{
    augmentation::Augmenter, checkpoint::is_checkpoint_step, config::TrainingConfig,
    dataset::FaceDataset, noise::NoiseSampler, TrainingError, TrainingObserver, TrainingResult,
};
use log::{debug, info};
use ml::{dcgan::Dcgan, MlError};
use ndarray::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Augmenting,
    DiscriminatorStep,
    AdversarialStep,
    Checkpointing,
    Done,
}

/// Losses and accuracies of one iteration, measured before the updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Iteration, counted from 0.
    pub step: usize,
    pub discriminator_loss: f32,
    pub discriminator_accuracy: f32,
    pub adversarial_loss: f32,
    pub adversarial_accuracy: f32,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [D loss: {:.6}, acc: {:.6}]  [A loss: {:.6}, acc: {:.6}]",
            self.step,
            self.discriminator_loss,
            self.discriminator_accuracy,
            self.adversarial_loss,
            self.adversarial_accuracy
        )
    }
}

/// Attaches the iteration to a diverged loss.
fn at_step(step: usize) -> impl Fn(MlError) -> TrainingError {
    move |e| match e {
        MlError::NonFiniteLoss(loss) => TrainingError::NonFiniteLoss { step, loss },
        e => TrainingError::Model(e),
    }
}

pub struct Trainer {
    config: TrainingConfig,
    dataset: FaceDataset,
    dcgan: Dcgan,
    augmenter: Augmenter,
    noise: NoiseSampler,
    rng: StdRng,
    pool: Option<Array4<f32>>,
    pools_generated: usize,
    state: TrainerState,
}

impl Trainer {
    pub fn new(config: TrainingConfig, dataset: FaceDataset) -> TrainingResult<Self> {
        config.validate()?;
        let expected = (config.model.rows, config.model.cols);
        if dataset.image_shape() != expected {
            return Err(TrainingError::DatasetShape {
                expected: vec![dataset.len(), expected.0, expected.1, ml::CHANNELS],
                actual: dataset.images().shape().to_vec(),
            });
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut model = config.model.clone();
        if model.seed.is_none() {
            model.seed = config.seed;
        }
        let dcgan = Dcgan::new(model)?;
        let augmenter = Augmenter::new(config.augmentation, StdRng::seed_from_u64(rng.gen()));
        let noise = NoiseSampler::new(config.model.noise_dim, StdRng::seed_from_u64(rng.gen()));

        Ok(Self {
            config,
            dataset,
            dcgan,
            augmenter,
            noise,
            rng,
            pool: None,
            pools_generated: 0,
            state: TrainerState::Idle,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn dcgan(&self) -> &Dcgan {
        &self.dcgan
    }

    pub fn dataset(&self) -> &FaceDataset {
        &self.dataset
    }

    /// Augmented images the real batches are drawn from, None before training.
    pub fn pool(&self) -> Option<ArrayView4<f32>> {
        self.pool.as_ref().map(|p| p.view())
    }

    /// How often the augmented pool has been generated so far.
    pub fn pools_generated(&self) -> usize {
        self.pools_generated
    }

    fn transition(&mut self, state: TrainerState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn refresh_pool(&mut self) {
        self.transition(TrainerState::Augmenting);
        let pool = self.augmenter.pool(&self.dataset, self.config.pool_size);
        self.pool = Some(pool);
        self.pools_generated += 1;
    }

    /// Real images drawn with replacement from the augmented pool.
    fn real_batch(&mut self) -> TrainingResult<Array4<f32>> {
        let pool = self.pool.as_ref().ok_or_else(|| {
            TrainingError::InvalidConfig("augmented pool has not been generated".to_string())
        })?;
        let n = pool.len_of(Axis(0));
        let rng = &mut self.rng;
        let indices: Vec<usize> = (0..self.config.batch_size)
            .map(|_| rng.gen_range(0..n))
            .collect();
        Ok(pool.select(Axis(0), &indices))
    }

    fn train_step(&mut self, step: usize) -> TrainingResult<StepReport> {
        let batch_size = self.config.batch_size;

        self.transition(TrainerState::DiscriminatorStep);
        let real = self.real_batch()?;
        let fake = self.generate(batch_size)?;
        let images = concatenate(Axis(0), &[real.view(), fake.view()]).map_err(MlError::from)?;
        let mut labels = Array2::ones((2 * batch_size, 1));
        labels.slice_mut(s![batch_size.., ..]).fill(0.);
        let (discriminator_loss, discriminator_accuracy) = self
            .dcgan
            .discriminator_model()
            .borrow_mut()
            .train_on_batch(images.view(), &labels)
            .map_err(at_step(step))?;

        self.transition(TrainerState::AdversarialStep);
        let noise = self.noise.sample(batch_size);
        let labels = Array2::ones((batch_size, 1));
        let (adversarial_loss, adversarial_accuracy) = self
            .dcgan
            .adversarial_model()
            .borrow_mut()
            .train_on_batch(&noise, &labels)
            .map_err(at_step(step))?;

        Ok(StepReport {
            step,
            discriminator_loss,
            discriminator_accuracy,
            adversarial_loss,
            adversarial_accuracy,
        })
    }

    /// Runs `train_steps` iterations and returns their reports.
    pub fn train<O: TrainingObserver + ?Sized>(
        &mut self,
        observer: &mut O,
    ) -> TrainingResult<Vec<StepReport>> {
        let steps = self.config.train_steps;
        info!(
            "Training for {} steps, batch size {}, checkpoint every {} steps",
            steps, self.config.batch_size, self.config.save_interval
        );
        self.refresh_pool();

        let mut reports = Vec::with_capacity(steps);
        for step in 0..steps {
            let refresh = self.config.pool_refresh_interval;
            if refresh > 0 && step > 0 && step % refresh == 0 {
                self.refresh_pool();
            }

            let report = self.train_step(step)?;
            observer.on_step(&report)?;

            if is_checkpoint_step(step, self.config.save_interval) {
                self.transition(TrainerState::Checkpointing);
                let images = self.generate(self.config.mosaic_samples)?;
                observer.on_checkpoint(step + 1, &images)?;
            }
            reports.push(report);
        }

        self.transition(TrainerState::Done);
        Ok(reports)
    }

    /// `count` images from fresh noise, shape (count, rows, cols, 1).
    pub fn generate(&mut self, count: usize) -> TrainingResult<Array4<f32>> {
        let noise = self.noise.sample(count);
        let images = self.dcgan.generator().borrow_mut().predict(&noise)?;
        Ok(images)
    }

    /// `count` random training images scaled to `[0, 1]`.
    pub fn real_samples(&mut self, count: usize) -> Array4<f32> {
        self.dataset.sample_normalized(count, &mut self.rng)
    }
}
