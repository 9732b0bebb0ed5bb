use crate::{
    layers::{Layer, Mode},
    ImagePrecision, MlError, MlResult,
};
use ndarray::*;
use ndarray_rand::rand::{rngs::StdRng, SeedableRng};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

/// Inverted dropout: during training every activation is zeroed with
/// probability `rate` and the survivors are scaled by 1 / (1 - rate), so
/// inference is the identity.
pub struct DropoutLayer {
    rate: f32,
    rng: StdRng,
    mask: Option<ArrayD<ImagePrecision>>,
}

impl DropoutLayer {
    pub fn new(rate: f32, seed: u64) -> Self {
        debug_assert!((0.0..1.0).contains(&rate), "Dropout rate must be in [0, 1)");
        Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        }
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &'static str {
        "Dropout"
    }

    fn forward(&mut self, input: &ArrayD<f32>, mode: Mode) -> MlResult<ArrayD<f32>> {
        if mode == Mode::Inference || self.rate == 0. {
            self.mask = Some(ArrayD::ones(input.raw_dim()));
            return Ok(input.clone());
        }
        let keep = 1. - self.rate;
        let mask = ArrayD::random_using(input.raw_dim(), Uniform::new(0., 1.), &mut self.rng)
            .mapv(|u: f32| if u < keep { 1. / keep } else { 0. });
        let output = input * &mask;
        self.mask = Some(mask);
        Ok(output)
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> MlResult<ArrayD<f32>> {
        let mask = self
            .mask
            .as_ref()
            .ok_or(MlError::MissingForwardCache(self.name()))?;
        Ok(grad_output * mask)
    }

    fn output_shape(&self, input_shape: &[usize]) -> MlResult<Vec<usize>> {
        Ok(input_shape.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_is_identity() {
        let mut layer = DropoutLayer::new(0.4, 0);
        let x = Array2::<f32>::ones((4, 4)).into_dyn();
        assert_eq!(layer.forward(&x, Mode::Inference).unwrap(), x);
    }

    #[test]
    fn test_train_drops_and_rescales() {
        let mut layer = DropoutLayer::new(0.4, 1);
        let x = Array2::<f32>::ones((100, 100)).into_dyn();
        let y = layer.forward(&x, Mode::Train).unwrap();
        let kept = y.iter().filter(|&&v| v > 0.).count() as f32 / 10_000.;
        assert!((kept - 0.6).abs() < 0.03);
        assert!(y.iter().all(|&v| v == 0. || (v - 1. / 0.6).abs() < 1e-6));

        // gradient flows exactly through the kept units
        let g = layer.backward(&x).unwrap();
        assert_eq!(g, y);
    }
}
