use crate::WeightPrecision;
use ndarray::{Array, Dimension, ShapeBuilder};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

/// Glorot (Xavier) uniform initialisation, the Keras default for kernels.
/// Samples from U(-limit, limit) with limit = sqrt(6 / (fan_in + fan_out)).
pub(crate) fn glorot_uniform<Sh, D, R>(
    shape: Sh,
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Array<WeightPrecision, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    let limit = (6.0 / (fan_in + fan_out) as WeightPrecision).sqrt();
    Array::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use ndarray_rand::rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_glorot_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let w: Array2<f32> = glorot_uniform((30, 20), 30, 20, &mut rng);
        let limit = (6.0f32 / 50.0).sqrt();
        assert!(w.iter().all(|x| x.abs() <= limit));
        // not all identical
        assert!(w.iter().any(|x| (x - w[[0, 0]]).abs() > 1e-6));
    }
}
