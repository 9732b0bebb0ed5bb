//! RMSprop (Tieleman & Hinton, 2012), with the time based learning rate
//! decay used by Keras: lr_t = lr / (1 + decay * iterations).
use crate::{layers::Parameter, MlError, MlResult, WeightPrecision};
use log::debug;
use ndarray::*;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RmsPropConfig {
    pub learning_rate: f64,
    pub decay: f64,
    #[serde(default = "default_rho")]
    pub rho: f32,
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
}

fn default_rho() -> f32 {
    0.9
}

fn default_epsilon() -> f32 {
    1e-8
}

impl RmsPropConfig {
    pub fn new(learning_rate: f64, decay: f64) -> Self {
        Self {
            learning_rate,
            decay,
            rho: default_rho(),
            epsilon: default_epsilon(),
        }
    }

    /// Settings of the optimizer that trains the discriminator on its own.
    pub fn discriminator() -> Self {
        Self::new(0.0002, 6e-8)
    }

    /// Settings of the optimizer that trains the stacked generator + discriminator.
    pub fn adversarial() -> Self {
        Self::new(0.0001, 3e-8)
    }
}

/// Keeps a moving average of squared gradients per parameter and divides
/// the gradient by its root.
pub struct RmsProp {
    config: RmsPropConfig,
    iterations: u64,
    accumulators: Vec<ArrayD<WeightPrecision>>,
}

impl RmsProp {
    pub fn new(config: RmsPropConfig) -> Self {
        Self {
            config,
            iterations: 0,
            accumulators: Vec::new(),
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Learning rate the next step will use.
    pub fn current_learning_rate(&self) -> f64 {
        self.config.learning_rate / (1. + self.config.decay * self.iterations as f64)
    }

    /// Applies one update to the given parameters using their current gradients.
    /// The parameter list has to be the same (in number, order and shape) on every call.
    pub fn step(&mut self, mut params: Vec<&mut Parameter>) -> MlResult<()> {
        if self.accumulators.is_empty() {
            self.accumulators = params
                .iter()
                .map(|p| ArrayD::zeros(p.value.raw_dim()))
                .collect();
        }
        if self.accumulators.len() != params.len() {
            return Err(MlError::OptimizerMismatch {
                expected: self.accumulators.len(),
                actual: params.len(),
            });
        }
        for (p, acc) in params.iter().zip(self.accumulators.iter()) {
            if p.value.shape() != acc.shape() || p.gradient.shape() != acc.shape() {
                return Err(MlError::InputShapeError {
                    layer: "RMSprop",
                    expected: acc.shape().to_vec(),
                    actual: p.gradient.shape().to_vec(),
                });
            }
        }

        let lr = self.current_learning_rate() as f32;
        let (rho, eps) = (self.config.rho, self.config.epsilon);
        for (p, acc) in params.iter_mut().zip(self.accumulators.iter_mut()) {
            let Parameter { value, gradient } = &mut **p;
            Zip::from(value)
                .and(&*gradient)
                .and(acc)
                .for_each(|w, &g, a| {
                    *a = rho * *a + (1. - rho) * g * g;
                    *w -= lr * g / (a.sqrt() + eps);
                });
        }
        self.iterations += 1;
        debug!(
            "RMSprop step {} over {} tensors, lr {:e}",
            self.iterations,
            params.len(),
            lr
        );
        Ok(())
    }
}
