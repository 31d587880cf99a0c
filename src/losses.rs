// --- File: src/losses.rs ---

//! Classification loss on eager `ndarray` logits.
//!
//! Functions here return both the scalar loss and its gradient with respect
//! to the logits, which is what [`Classifier::backward`] consumes.
//!
//! [`Classifier::backward`]: crate::model::Classifier::backward

use crate::model::ModelError;
use ndarray::{Array1, Array2, Axis};

// ============================================================================
// Softmax
// ============================================================================

/// Row-wise softmax, shifted by the row maximum for stability.
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Index of the largest logit in every row. Ties go to the lower index.
pub fn argmax_rows(logits: &Array2<f32>) -> Vec<usize> {
    logits
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max {
                        (i, v)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect()
}

// ============================================================================
// Cross-Entropy
// ============================================================================

/// Mean cross-entropy over a batch of logits and class indices.
///
/// Formula: `CE = -mean(log_softmax(logits)[i, label_i])`.
///
/// # Arguments
///
/// * `logits` - Raw scores `[B, C]`
/// * `labels` - Class index per row, each `< C`
///
/// # Returns
///
/// `(loss, grad)` where `grad = (softmax(logits) - onehot(labels)) / B`.
pub fn cross_entropy(logits: &Array2<f32>, labels: &[usize]) -> Result<(f32, Array2<f32>), ModelError> {
    let (batch, classes) = logits.dim();
    if labels.len() != batch {
        return Err(ModelError::ShapeMismatch {
            what: "labels".to_string(),
            expected: vec![batch],
            actual: vec![labels.len()],
        });
    }
    if let Some(&label) = labels.iter().find(|&&l| l >= classes) {
        return Err(ModelError::LabelOutOfRange {
            label,
            num_classes: classes,
        });
    }
    if batch == 0 {
        return Ok((0.0, Array2::zeros((0, classes))));
    }

    // log_softmax = x - max - log(sum(exp(x - max)))
    let max: Array1<f32> = logits.map_axis(Axis(1), |row| row.fold(f32::NEG_INFINITY, |m, &v| m.max(v)));
    let log_sum_exp: Array1<f32> = logits
        .rows()
        .into_iter()
        .zip(max.iter())
        .map(|(row, &m)| row.iter().map(|&v| (v - m).exp()).sum::<f32>().ln() + m)
        .collect();

    let loss = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| log_sum_exp[i] - logits[[i, label]])
        .sum::<f32>()
        / batch as f32;

    let mut grad = softmax(logits);
    for (i, &label) in labels.iter().enumerate() {
        grad[[i, label]] -= 1.0;
    }
    grad /= batch as f32;

    Ok((loss, grad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_uniform_logits() {
        let logits = Array2::zeros((2, 4));
        let (loss, grad) = cross_entropy(&logits, &[0, 3]).unwrap();
        assert!((loss - 4.0f32.ln()).abs() < 1e-6);
        assert!((grad[[0, 0]] - (0.25 - 1.0) / 2.0).abs() < 1e-6);
        assert!((grad[[0, 1]] - 0.25 / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_large_logits_are_stable() {
        let logits = array![[1000.0, 0.0], [0.0, 1000.0]];
        let (loss, grad) = cross_entropy(&logits, &[0, 1]).unwrap();
        assert!(loss.is_finite());
        assert!(loss < 1e-6);
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let logits = array![[0.3, -1.2, 2.0], [0.5, 0.1, -0.4]];
        let labels = [2, 0];
        let (_, grad) = cross_entropy(&logits, &labels).unwrap();

        let eps = 1e-3;
        for i in 0..2 {
            for j in 0..3 {
                let mut plus = logits.clone();
                plus[[i, j]] += eps;
                let mut minus = logits.clone();
                minus[[i, j]] -= eps;
                let numeric = (cross_entropy(&plus, &labels).unwrap().0
                    - cross_entropy(&minus, &labels).unwrap().0)
                    / (2.0 * eps);
                assert!((numeric - grad[[i, j]]).abs() < 1e-3, "[{i},{j}]: {numeric} vs {}", grad[[i, j]]);
            }
        }
    }

    #[test]
    fn test_label_out_of_range() {
        let logits = Array2::zeros((1, 2));
        assert!(matches!(
            cross_entropy(&logits, &[2]),
            Err(ModelError::LabelOutOfRange { label: 2, num_classes: 2 })
        ));
    }

    #[test]
    fn test_argmax_rows() {
        let logits = array![[0.1, 0.9], [2.0, -1.0], [0.5, 0.5]];
        assert_eq!(argmax_rows(&logits), vec![1, 0, 0]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let probs = softmax(&array![[1.0, 2.0, 3.0]]);
        assert!((probs.sum() - 1.0).abs() < 1e-6);
        assert!(probs[[0, 2]] > probs[[0, 1]]);
    }
}
