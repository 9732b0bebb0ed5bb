use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand_distr::Uniform;

/// Draws generator inputs uniformly from `[-1, 1]`.
pub struct NoiseSampler {
    dim: usize,
    distribution: Uniform<f32>,
    rng: StdRng,
}

impl NoiseSampler {
    pub fn new(dim: usize, rng: StdRng) -> Self {
        Self {
            dim,
            distribution: Uniform::new_inclusive(-1., 1.),
            rng,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Noise batch of shape (batch, dim).
    pub fn sample(&mut self, batch: usize) -> Array2<f32> {
        Array2::random_using((batch, self.dim), &self.distribution, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_shape_and_bounds() {
        let mut sampler = NoiseSampler::new(100, StdRng::seed_from_u64(0));
        let noise = sampler.sample(256);
        assert_eq!(noise.shape(), &[256, 100]);
        assert!(noise.iter().all(|&x| (-1.0..=1.0).contains(&x)));
        // covers both signs
        assert!(noise.iter().any(|&x| x < -0.5));
        assert!(noise.iter().any(|&x| x > 0.5));
    }

    #[test]
    fn test_fresh_batches_differ() {
        let mut sampler = NoiseSampler::new(10, StdRng::seed_from_u64(1));
        assert_ne!(sampler.sample(4), sampler.sample(4));
    }
}
