use crate::{ImagePrecision, MlError, MlResult};
use ndarray::*;

/// Predictions are clipped to [EPSILON, 1 - EPSILON] before taking logarithms.
pub const EPSILON: f32 = 1e-7;

fn check_shapes(predictions: &Array2<f32>, labels: &Array2<f32>) -> MlResult<()> {
    if predictions.shape() != labels.shape() {
        return Err(MlError::LabelMismatch {
            labels: labels.len(),
            predictions: predictions.len(),
        });
    }
    Ok(())
}

/// Mean binary cross-entropy of sigmoid outputs
/// -mean(y log p + (1 - y) log(1 - p)),
/// together with its gradient w.r.t. the predictions.
pub fn binary_crossentropy(
    predictions: &Array2<ImagePrecision>,
    labels: &Array2<ImagePrecision>,
) -> MlResult<(f32, Array2<ImagePrecision>)> {
    check_shapes(predictions, labels)?;
    let count = predictions.len() as f32;
    let clipped = predictions.mapv(|p| p.clamp(EPSILON, 1. - EPSILON));

    let mut loss = 0.;
    let mut grad = Array2::zeros(predictions.raw_dim());
    Zip::from(&mut grad)
        .and(&clipped)
        .and(labels)
        .for_each(|g, &p, &y| {
            loss -= y * p.ln() + (1. - y) * (1. - p).ln();
            *g = (p - y) / (p * (1. - p)) / count;
        });
    let loss = loss / count;

    if !loss.is_finite() {
        return Err(MlError::NonFiniteLoss(loss));
    }
    Ok((loss, grad))
}

/// Fraction of predictions that land on the right side of 0.5.
pub fn binary_accuracy(
    predictions: &Array2<ImagePrecision>,
    labels: &Array2<ImagePrecision>,
) -> MlResult<f32> {
    check_shapes(predictions, labels)?;
    let correct = Zip::from(predictions)
        .and(labels)
        .fold(0usize, |acc, &p, &y| {
            let predicted = if p > 0.5 { 1. } else { 0. };
            if predicted == y {
                acc + 1
            } else {
                acc
            }
        });
    Ok(correct as f32 / predictions.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bce_value() {
        let p = array![[0.5], [0.5]];
        let y = array![[1.], [0.]];
        let (loss, grad) = binary_crossentropy(&p, &y).unwrap();
        assert!((loss - 2f32.ln()).abs() < 1e-6);
        // (p - y) / (p (1 - p)) / n
        assert!((grad[[0, 0]] + 1.).abs() < 1e-6);
        assert!((grad[[1, 0]] - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_bce_saturated_predictions_stay_finite() {
        let p = array![[0.], [1.]];
        let y = array![[1.], [0.]];
        let (loss, grad) = binary_crossentropy(&p, &y).unwrap();
        assert!(loss.is_finite() && loss > 10.);
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_accuracy() {
        let p = array![[0.9], [0.2], [0.6], [0.5]];
        let y = array![[1.], [0.], [0.], [1.]];
        assert_eq!(binary_accuracy(&p, &y).unwrap(), 0.5);
    }

    #[test]
    fn test_label_mismatch() {
        let p = array![[0.9], [0.2]];
        let y = array![[1.]];
        assert!(matches!(
            binary_crossentropy(&p, &y),
            Err(MlError::LabelMismatch { .. })
        ));
    }
}
