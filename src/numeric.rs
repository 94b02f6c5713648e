//! Shared numeric helpers: row-wise softmax, descending argsort, and
//! soft-target cross entropy.

use crate::error::{MnemeError, Result};
use ndarray::{Array2, Axis};
use std::cmp::Ordering;

/// Row-wise softmax with max subtraction for numerical stability.
pub fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            continue;
        }
        row.mapv_inplace(|v| (v - max).exp());
        let sum: f64 = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// Row-wise log-softmax.
pub fn log_softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            continue;
        }
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();
        row.mapv_inplace(|v| v - max - log_sum);
    }
    out
}

/// Indices that sort `values` in descending order.
///
/// NaN values compare equal so a stray NaN cannot poison the ordering.
pub fn argsort_descending(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(Ordering::Equal)
    });
    indices
}

/// Cross-entropy between logits and probabilistic (soft) targets, averaged
/// over rows.
///
/// Equivalent to `-sum(target * log_softmax(logits)) / n`. Targets are
/// probability rows, not integer labels.
pub fn cross_entropy_with_probs(logits: &Array2<f64>, targets: &Array2<f64>) -> Result<f64> {
    if logits.dim() != targets.dim() {
        return Err(MnemeError::ShapeMismatch {
            context: "cross_entropy_with_probs",
            expected: format!("{:?}", logits.dim()),
            got: format!("{:?}", targets.dim()),
        });
    }
    let n = logits.nrows();
    if n == 0 {
        return Ok(0.0);
    }
    let log_probs = log_softmax_rows(logits);
    let total: f64 = log_probs
        .axis_iter(Axis(0))
        .zip(targets.axis_iter(Axis(0)))
        .map(|(lp, t)| -lp.iter().zip(t.iter()).map(|(&l, &p)| p * l).sum::<f64>())
        .sum();
    Ok(total / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let logits = array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]];
        let probs = softmax_rows(&logits);
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        // Uniform logits give uniform probabilities
        assert_relative_eq!(probs[[1, 0]], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_softmax_rows_stable_for_large_logits() {
        let logits = array![[1000.0, 1001.0]];
        let probs = softmax_rows(&logits);
        assert!(probs[[0, 0]].is_finite());
        assert_relative_eq!(probs.row(0).sum(), 1.0, epsilon = 1e-12);
        assert!(probs[[0, 1]] > probs[[0, 0]]);
    }

    #[test]
    fn test_log_softmax_matches_softmax_log() {
        let logits = array![[0.5, -1.0, 2.0]];
        let log_probs = log_softmax_rows(&logits);
        let probs = softmax_rows(&logits);
        for (l, p) in log_probs.iter().zip(probs.iter()) {
            assert_relative_eq!(*l, p.ln(), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_argsort_descending() {
        let values = vec![0.1, 3.0, -2.0, 1.5];
        assert_eq!(argsort_descending(&values), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_argsort_handles_nan() {
        let values = vec![1.0, f64::NAN, 2.0];
        let order = argsort_descending(&values);
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_cross_entropy_with_hard_target_row() {
        // With a one-hot target, soft cross entropy reduces to -log p[target]
        let logits = array![[2.0, 0.0]];
        let targets = array![[1.0, 0.0]];
        let expected = -(2.0f64.exp() / (2.0f64.exp() + 1.0)).ln();
        let ce = cross_entropy_with_probs(&logits, &targets).unwrap();
        assert_relative_eq!(ce, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_cross_entropy_shape_mismatch() {
        let logits = array![[1.0, 2.0]];
        let targets = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(matches!(
            cross_entropy_with_probs(&logits, &targets),
            Err(MnemeError::ShapeMismatch { .. })
        ));
    }
}
