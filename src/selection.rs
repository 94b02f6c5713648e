//! Memorable-point selection.
//!
//! Given a finished task's data, pick a fixed-size subset of indices that
//! will stand in for the task from now on. Selection is either global
//! (rank the whole dataset) or class-balanced (rank within each class and
//! take an equal share per class), with an optional second layer of
//! "error-correction" points biased toward high-residual examples.
//!
//! All score-ranked variants are deterministic given fixed scores; only the
//! `random*` variants draw from the engine's seeded generator.

use crate::data::Dataset;
use crate::error::{MnemeError, Result};
use crate::model::Model;
use crate::numeric::argsort_descending;
use crate::scoring::{ScoreComputer, ScoreMethod};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How memorable points are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectMethod {
    /// Class-balanced, ranked by curvature trace descending
    LambdaDescend,
    /// Class-balanced, uniformly random
    Random,
    /// Whole-dataset ranking by curvature trace (no class balance)
    LambdaDescendGlobal,
    /// Whole-dataset uniform permutation (no class balance)
    RandomGlobal,
}

impl SelectMethod {
    /// Global methods rank the dataset as a whole.
    pub fn is_global(&self) -> bool {
        matches!(self, Self::LambdaDescendGlobal | Self::RandomGlobal)
    }

    /// Whether a scoring pass over the data is required. The random
    /// variants skip it, avoiding one full forward pass over the dataset.
    pub fn uses_scores(&self) -> bool {
        matches!(self, Self::LambdaDescend | Self::LambdaDescendGlobal)
    }
}

impl FromStr for SelectMethod {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lambda_descend" => Ok(Self::LambdaDescend),
            "random" => Ok(Self::Random),
            "lambda_descend_global" => Ok(Self::LambdaDescendGlobal),
            "random_global" => Ok(Self::RandomGlobal),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown selection method '{other}' (choices: lambda_descend, \
                 random, lambda_descend_global, random_global)"
            ))),
        }
    }
}

/// How the error-correction subset is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionSelect {
    /// Uniformly random over the dataset
    Random,
    /// Ranked by residual magnitude descending
    ResidualDescend,
    /// Ranked by logit-weighted error descending
    ErrorDescend,
}

impl FromStr for CorrectionSelect {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(Self::Random),
            "residual_descend" => Ok(Self::ResidualDescend),
            "error_descend" => Ok(Self::ErrorDescend),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown correction selection '{other}' (choices: random, \
                 residual_descend, error_descend)"
            ))),
        }
    }
}

/// Tag distinguishing primary memorable points from appended
/// error-correction points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    MemorablePast,
    ErrorCorrection,
}

/// Parameters for one selection pass.
#[derive(Clone, Debug)]
pub struct SelectionPlan<'a> {
    /// Absolute number of points to retain
    pub n_points: Option<usize>,
    /// Fraction of the task's size to retain, used when `n_points` is unset
    pub frac: Option<f64>,
    pub method: SelectMethod,
    /// Fraction of the budget diverted to error-correction points
    pub residual_frac: f64,
    pub use_error_correction: bool,
    pub correction_select: CorrectionSelect,
    pub batch_size: usize,
    /// The task's class subset, forwarded to score computation
    pub class_ids: Option<&'a [usize]>,
}

/// Result of one selection pass: parallel vectors over the chosen points.
#[derive(Clone, Debug)]
pub struct MemorableSelection {
    /// Task-local dataset indices
    pub indices: Vec<usize>,
    /// Global indices, valid on the task's dataset object
    pub indices_global: Vec<usize>,
    /// Kind tag per point
    pub kinds: Vec<PointKind>,
}

/// Select memorable points for one finished task.
///
/// Requesting at least as many primary points as the task has data
/// bypasses selection entirely and retains every index.
pub fn collect_memorable_points(
    model: &mut dyn Model,
    data: &dyn Dataset,
    plan: &SelectionPlan<'_>,
    rng: &mut ChaCha8Rng,
) -> Result<MemorableSelection> {
    let n_task_data = data
        .hard_task_targets()
        .map(|t| t.len())
        .unwrap_or_else(|| data.len());

    let n_requested = match (plan.n_points, plan.frac) {
        (Some(n), _) => n,
        (None, Some(frac)) => (frac * n_task_data as f64) as usize,
        (None, None) => {
            return Err(MnemeError::UnsupportedConfiguration(
                "either an absolute memorable-point count or a fraction is required".to_string(),
            ))
        }
    };

    let n_correction = if plan.use_error_correction && plan.residual_frac > 0.0 {
        ((n_requested as f64) * plan.residual_frac).round() as usize
    } else {
        0
    }
    .min(n_requested);
    let n_primary = n_requested - n_correction;

    let mut indices = if n_primary >= n_task_data {
        // Exact retention: keep every point
        (0..n_task_data).collect()
    } else if plan.method.is_global() {
        select_global(model, data, plan, n_primary, rng)?
    } else {
        select_class_balanced(model, data, plan, n_primary, n_task_data, rng)?
    };
    let mut kinds = vec![PointKind::MemorablePast; indices.len()];

    if n_correction > 0 {
        log::debug!(
            "collecting {n_correction} error-correction points on top of {} memorable points",
            indices.len()
        );
        let correction = select_correction(model, data, plan, n_correction, rng)?;
        kinds.extend(std::iter::repeat(PointKind::ErrorCorrection).take(correction.len()));
        indices.extend(correction);
    }

    let indices_global = indices.iter().map(|&i| data.globalize_index(i)).collect();
    Ok(MemorableSelection {
        indices,
        indices_global,
        kinds,
    })
}

/// Whole-dataset ranking (or permutation), top `n`.
fn select_global(
    model: &mut dyn Model,
    data: &dyn Dataset,
    plan: &SelectionPlan<'_>,
    n: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    let ranked = if plan.method.uses_scores() {
        let scores = ScoreComputer::compute(
            model,
            data,
            plan.batch_size,
            ScoreMethod::LambdaDescend,
            plan.class_ids,
        )?;
        argsort_descending(&scores)
    } else {
        random_permutation(data.len(), rng)
    };
    Ok(ranked.into_iter().take(n).collect())
}

/// Class-balanced selection: `n / k` points per class, ranked or random
/// within each class. The remainder when `n` is not divisible by the class
/// count is dropped, so the total selected may fall short of `n`.
fn select_class_balanced(
    model: &mut dyn Model,
    data: &dyn Dataset,
    plan: &SelectionPlan<'_>,
    n: usize,
    n_task_data: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    let targets: Vec<usize> = match data.hard_task_targets() {
        Some(task_targets) => task_targets,
        None => (0..n_task_data)
            .map(|i| data.target(data.globalize_index(i)).hard_label())
            .collect(),
    };

    let mut classes: Vec<usize> = targets.clone();
    classes.sort_unstable();
    classes.dedup();
    let per_class = n / classes.len();

    let scores = if plan.method.uses_scores() {
        let scores = ScoreComputer::compute(
            model,
            data,
            plan.batch_size,
            ScoreMethod::LambdaDescend,
            plan.class_ids,
        )?;
        if scores.len() < targets.len() {
            return Err(MnemeError::ShapeMismatch {
                context: "class-balanced selection scores",
                expected: format!("{} scores", targets.len()),
                got: format!("{}", scores.len()),
            });
        }
        Some(scores)
    } else {
        None
    };

    let mut selected = Vec::with_capacity(per_class * classes.len());
    for class in classes {
        let mut members: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == class)
            .map(|(i, _)| i)
            .collect();
        match &scores {
            Some(scores) => {
                let member_scores: Vec<f64> = members.iter().map(|&i| scores[i]).collect();
                let order = argsort_descending(&member_scores);
                selected.extend(order.into_iter().take(per_class).map(|r| members[r]));
            }
            None => {
                members.shuffle(rng);
                selected.extend(members.into_iter().take(per_class));
            }
        }
    }
    Ok(selected)
}

/// Error-correction subset over the whole dataset, not class-balanced.
fn select_correction(
    model: &mut dyn Model,
    data: &dyn Dataset,
    plan: &SelectionPlan<'_>,
    n: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    let ranked = match plan.correction_select {
        CorrectionSelect::Random => random_permutation(data.len(), rng),
        CorrectionSelect::ResidualDescend => {
            let scores = ScoreComputer::compute(
                model,
                data,
                plan.batch_size,
                ScoreMethod::ResidualDescend,
                plan.class_ids,
            )?;
            argsort_descending(&scores)
        }
        CorrectionSelect::ErrorDescend => {
            let scores = ScoreComputer::compute(
                model,
                data,
                plan.batch_size,
                ScoreMethod::ErrorDescend,
                plan.class_ids,
            )?;
            argsort_descending(&scores)
        }
    };
    Ok(ranked.into_iter().take(n).collect())
}

fn random_permutation(len: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataset;
    use crate::testutil::LinearModel;
    use ndarray::Array2;
    use rand::SeedableRng;

    fn plan(method: SelectMethod, n: usize) -> SelectionPlan<'static> {
        SelectionPlan {
            n_points: Some(n),
            frac: None,
            method,
            residual_frac: 1.0,
            use_error_correction: false,
            correction_select: CorrectionSelect::Random,
            batch_size: 4,
            class_ids: None,
        }
    }

    fn six_points() -> InMemoryDataset {
        // Columns are logits under the identity model: even rows lean
        // class 0, odd rows lean class 1, later rows more confident
        let inputs = ndarray::array![
            [1.0, 0.0],
            [0.0, 1.0],
            [2.0, 0.0],
            [0.0, 2.0],
            [5.0, 0.0],
            [0.0, 5.0]
        ];
        InMemoryDataset::from_labels(inputs, vec![0, 1, 0, 1, 0, 1])
    }

    #[test]
    fn test_exhaustion_returns_all_indices() {
        let data = six_points();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for method in [
            SelectMethod::LambdaDescend,
            SelectMethod::Random,
            SelectMethod::LambdaDescendGlobal,
            SelectMethod::RandomGlobal,
        ] {
            let mut model = LinearModel::identity(2);
            let sel =
                collect_memorable_points(&mut model, &data, &plan(method, 10), &mut rng).unwrap();
            assert_eq!(sel.indices, vec![0, 1, 2, 3, 4, 5], "method {method:?}");
            assert_eq!(sel.indices_global, sel.indices);
            assert_eq!(sel.kinds.len(), 6);
        }
    }

    #[test]
    fn test_class_balance_truncates_remainder() {
        let data = six_points();
        let mut model = LinearModel::identity(2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        // n = 5 over 2 classes: floor(5/2) = 2 per class, 1 dropped
        let sel =
            collect_memorable_points(&mut model, &data, &plan(SelectMethod::Random, 5), &mut rng)
                .unwrap();
        assert_eq!(sel.indices.len(), 4);
        let class0 = sel.indices.iter().filter(|&&i| i % 2 == 0).count();
        let class1 = sel.indices.len() - class0;
        assert_eq!(class0, 2);
        assert_eq!(class1, 2);
    }

    #[test]
    fn test_lambda_descend_picks_highest_curvature_per_class() {
        let data = six_points();
        let mut model = LinearModel::identity(2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let sel = collect_memorable_points(
            &mut model,
            &data,
            &plan(SelectMethod::LambdaDescend, 2),
            &mut rng,
        )
        .unwrap();
        // Least confident member of each class has the highest Hessian
        // trace: index 0 for class 0, index 1 for class 1
        assert_eq!(sel.indices, vec![0, 1]);
    }

    #[test]
    fn test_lambda_descend_global_ignores_class_balance() {
        let data = six_points();
        let mut model = LinearModel::identity(2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let sel = collect_memorable_points(
            &mut model,
            &data,
            &plan(SelectMethod::LambdaDescendGlobal, 2),
            &mut rng,
        )
        .unwrap();
        let mut got = sel.indices.clone();
        got.sort_unstable();
        // The two least confident points overall, both near-uniform
        assert_eq!(got, vec![0, 1]);
    }

    #[test]
    fn test_random_selection_is_seed_deterministic() {
        let data = six_points();
        let mut model = LinearModel::identity(2);
        let p = plan(SelectMethod::RandomGlobal, 3);
        let mut rng_a = ChaCha8Rng::seed_from_u64(42);
        let mut rng_b = ChaCha8Rng::seed_from_u64(42);
        let a = collect_memorable_points(&mut model, &data, &p, &mut rng_a).unwrap();
        let b = collect_memorable_points(&mut model, &data, &p, &mut rng_b).unwrap();
        assert_eq!(a.indices, b.indices);
    }

    #[test]
    fn test_error_correction_points_are_appended_and_tagged() {
        let data = six_points();
        let mut model = LinearModel::identity(2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let p = SelectionPlan {
            n_points: Some(4),
            frac: None,
            method: SelectMethod::Random,
            residual_frac: 0.5,
            use_error_correction: true,
            correction_select: CorrectionSelect::Random,
            batch_size: 4,
            class_ids: None,
        };
        let sel = collect_memorable_points(&mut model, &data, &p, &mut rng).unwrap();
        // round(4 * 0.5) = 2 correction points; 2 primary split 1 per class
        assert_eq!(sel.indices.len(), 4);
        assert_eq!(
            sel.kinds,
            vec![
                PointKind::MemorablePast,
                PointKind::MemorablePast,
                PointKind::ErrorCorrection,
                PointKind::ErrorCorrection
            ]
        );
    }

    #[test]
    fn test_fraction_based_budget() {
        let data = six_points();
        let mut model = LinearModel::identity(2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let p = SelectionPlan {
            n_points: None,
            frac: Some(0.5),
            method: SelectMethod::RandomGlobal,
            residual_frac: 1.0,
            use_error_correction: false,
            correction_select: CorrectionSelect::Random,
            batch_size: 4,
            class_ids: None,
        };
        let sel = collect_memorable_points(&mut model, &data, &p, &mut rng).unwrap();
        assert_eq!(sel.indices.len(), 3);
    }

    #[test]
    fn test_missing_budget_is_rejected() {
        let data = six_points();
        let mut model = LinearModel::identity(2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let p = SelectionPlan {
            n_points: None,
            frac: None,
            method: SelectMethod::Random,
            residual_frac: 1.0,
            use_error_correction: false,
            correction_select: CorrectionSelect::Random,
            batch_size: 4,
            class_ids: None,
        };
        assert!(matches!(
            collect_memorable_points(&mut model, &data, &p, &mut rng),
            Err(MnemeError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_single_class_degenerate_dataset() {
        let inputs = Array2::zeros((3, 2));
        let data = InMemoryDataset::from_labels(inputs, vec![0, 0, 0]);
        let mut model = LinearModel::identity(2);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let sel =
            collect_memorable_points(&mut model, &data, &plan(SelectMethod::Random, 2), &mut rng)
                .unwrap();
        assert_eq!(sel.indices.len(), 2);
    }
}
