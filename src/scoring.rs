//! Per-example scores for ranking memorable-point candidates.
//!
//! Scores are computed by re-iterating the dataset in its natural
//! (unshuffled) order, so position `i` in the returned vector always
//! belongs to dataset index `i` regardless of how the caller otherwise
//! iterates the data. Callers rank with a descending argsort.

use crate::data::{batches, Dataset, Target};
use crate::error::{MnemeError, Result};
use crate::model::Model;
use crate::numeric::softmax_rows;
use crate::onehot::targets_one_hot;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Scoring method for candidate ranking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMethod {
    /// Diagonal-Hessian trace of softmax cross entropy: Σ p(1 − p).
    /// High trace means high curvature / predictive uncertainty.
    LambdaDescend,
    /// L1 distance between predicted probabilities and the one-hot target
    ResidualDescend,
    /// Logits · residual, capturing both confidence and incorrectness
    ErrorDescend,
}

impl FromStr for ScoreMethod {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lambda_descend" => Ok(Self::LambdaDescend),
            "residual_descend" => Ok(Self::ResidualDescend),
            "error_descend" => Ok(Self::ErrorDescend),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown scoring method '{other}' \
                 (choices: lambda_descend, residual_descend, error_descend)"
            ))),
        }
    }
}

/// Dataset-order score computation.
pub struct ScoreComputer;

impl ScoreComputer {
    /// Compute one scalar score per example, aligned with dataset order.
    ///
    /// `class_ids` is the task's class subset; residual- and error-based
    /// scores remap global targets into that subset before one-hot
    /// comparison. The model is expected to emit the subset's logits.
    pub fn compute(
        model: &mut dyn Model,
        data: &dyn Dataset,
        batch_size: usize,
        method: ScoreMethod,
        class_ids: Option<&[usize]>,
    ) -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(data.len());
        for (inputs, targets) in batches(data, batch_size) {
            let logits = model.forward(&inputs);
            let probs = softmax_rows(&logits);
            match method {
                ScoreMethod::LambdaDescend => {
                    scores.extend(hessian_traces(&probs));
                }
                ScoreMethod::ResidualDescend => {
                    scores.extend(residuals(&probs, &targets, class_ids)?);
                }
                ScoreMethod::ErrorDescend => {
                    scores.extend(errors(&logits, &probs, &targets, class_ids)?);
                }
            }
        }
        Ok(scores)
    }
}

/// Σ p(1 − p) per row: the trace of the softmax cross-entropy diagonal
/// Hessian.
fn hessian_traces(probs: &Array2<f64>) -> Vec<f64> {
    probs
        .axis_iter(Axis(0))
        .map(|row| row.iter().map(|&p| p * (1.0 - p)).sum())
        .collect()
}

/// L1 distance per row between probabilities and the one-hot target.
fn residuals(
    probs: &Array2<f64>,
    targets: &[Target],
    class_ids: Option<&[usize]>,
) -> Result<Vec<f64>> {
    let one_hot = targets_one_hot(targets, class_ids, probs.ncols())?;
    Ok(probs
        .axis_iter(Axis(0))
        .zip(one_hot.axis_iter(Axis(0)))
        .map(|(p, y)| p.iter().zip(y.iter()).map(|(&a, &b)| (a - b).abs()).sum())
        .collect())
}

/// Logits · (probs − one-hot) per row.
fn errors(
    logits: &Array2<f64>,
    probs: &Array2<f64>,
    targets: &[Target],
    class_ids: Option<&[usize]>,
) -> Result<Vec<f64>> {
    let one_hot = targets_one_hot(targets, class_ids, probs.ncols())?;
    Ok(logits
        .axis_iter(Axis(0))
        .zip(probs.axis_iter(Axis(0)))
        .zip(one_hot.axis_iter(Axis(0)))
        .map(|((l, p), y)| {
            l.iter()
                .zip(p.iter().zip(y.iter()))
                .map(|(&logit, (&prob, &target))| logit * (prob - target))
                .sum()
        })
        .collect())
}
