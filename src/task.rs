//! Per-task regularization memory: memorable points, kernel inverse, and
//! the stored reference mean.
//!
//! A [`PastTask`] is created once when its task finishes and lives for the
//! engine's lifetime. Its kernel inverse and mean are refreshed every time
//! *any* task is registered, because the shared model and curvature state
//! change under it. The bookkeeping vectors (indices, targets, kinds) stay
//! parallel to the point rows at all times; the only way the point count
//! shrinks is the `soft_correct` pruning mode.

use crate::curvature::{CurvatureEstimator, KernelKind};
use crate::data::{gather_inputs, SharedDataset, Target};
use crate::error::{MnemeError, Result};
use crate::kernel::{invert_kernel, quadratic_form, KernelInverse};
use crate::model::Model;
use crate::numeric::{argsort_descending, cross_entropy_with_probs};
use crate::onehot::{local_target, one_hot};
use crate::selection::PointKind;
use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the stored reference mean treats the model's own predictions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLossMode {
    /// Raw soft predictions, stored as-is
    SoftAll,
    /// One-hot true targets; skips model evaluation entirely
    HardAll,
    /// Drop points whose argmax prediction disagrees with the true target
    SoftCorrect,
    /// Keep every point, overwrite mispredicted rows with one-hot targets
    SoftCorrectHardRest,
    /// Overwrite the highest-residual fraction of rows with one-hot targets
    SoftLowResidualHardRest,
}

impl FromStr for MemoryLossMode {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "soft_all" => Ok(Self::SoftAll),
            "hard_all" => Ok(Self::HardAll),
            "soft_correct" => Ok(Self::SoftCorrect),
            "soft_correct_hard_rest" => Ok(Self::SoftCorrectHardRest),
            "soft_low_residual_hard_rest" => Ok(Self::SoftLowResidualHardRest),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown memory loss mode '{other}' (choices: soft_all, hard_all, \
                 soft_correct, soft_correct_hard_rest, soft_low_residual_hard_rest)"
            ))),
        }
    }
}

/// Retained inputs of one task: a materialized batch, or a lazy handle
/// fetching rows from the task's dataset on demand.
#[derive(Clone)]
pub enum MemorablePoints {
    /// Input rows held in memory
    Materialized(Array2<f64>),
    /// Rows fetched from the dataset by fixed global indices
    Lazy {
        data: SharedDataset,
        indices: Vec<usize>,
    },
}

impl MemorablePoints {
    pub fn len(&self) -> usize {
        match self {
            Self::Materialized(points) => points.nrows(),
            Self::Lazy { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the given rows as one input batch.
    fn fetch_rows(&self, rows: &[usize]) -> Result<Array2<f64>> {
        match self {
            Self::Materialized(points) => Ok(points.select(Axis(0), rows)),
            Self::Lazy { data, indices } => {
                let globals: Vec<usize> = rows.iter().map(|&r| indices[r]).collect();
                gather_inputs(data.as_ref(), &globals)
            }
        }
    }

    fn keep_rows(&self, rows: &[usize]) -> Self {
        match self {
            Self::Materialized(points) => Self::Materialized(points.select(Axis(0), rows)),
            Self::Lazy { data, indices } => Self::Lazy {
                data: data.clone(),
                indices: rows.iter().map(|&r| indices[r]).collect(),
            },
        }
    }
}

impl std::fmt::Debug for MemorablePoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Materialized(points) => f
                .debug_tuple("Materialized")
                .field(&points.dim())
                .finish(),
            Self::Lazy { indices, .. } => {
                f.debug_struct("Lazy").field("len", &indices.len()).finish()
            }
        }
    }
}

/// One past task's regularization state.
pub struct PastTask {
    points: MemorablePoints,
    class_ids: Option<Vec<usize>>,
    kernel_inv: Option<KernelInverse>,
    mean: Option<Array2<f64>>,
    indices: Vec<usize>,
    indices_global: Vec<usize>,
    true_targets: Vec<Target>,
    kinds: Vec<PointKind>,
}

impl PastTask {
    /// # Panics
    /// Panics if the bookkeeping vectors and point rows disagree in length.
    pub fn new(
        points: MemorablePoints,
        class_ids: Option<Vec<usize>>,
        indices: Vec<usize>,
        indices_global: Vec<usize>,
        true_targets: Vec<Target>,
        kinds: Vec<PointKind>,
    ) -> Self {
        let n = points.len();
        assert_eq!(n, indices.len(), "local index count must match points");
        assert_eq!(n, indices_global.len(), "global index count must match points");
        assert_eq!(n, true_targets.len(), "target count must match points");
        assert_eq!(n, kinds.len(), "kind count must match points");
        Self {
            points,
            class_ids,
            kernel_inv: None,
            mean: None,
            indices,
            indices_global,
            true_targets,
            kinds,
        }
    }

    /// Number of memorable points currently retained.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn class_ids(&self) -> Option<&[usize]> {
        self.class_ids.as_deref()
    }

    pub fn mean(&self) -> Option<&Array2<f64>> {
        self.mean.as_ref()
    }

    pub fn kernel_inverse(&self) -> Option<&KernelInverse> {
        self.kernel_inv.as_ref()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn indices_global(&self) -> &[usize] {
        &self.indices_global
    }

    pub fn true_targets(&self) -> &[Target] {
        &self.true_targets
    }

    pub fn kinds(&self) -> &[PointKind] {
        &self.kinds
    }

    /// Recompute the kernel inverse from fresh curvature.
    ///
    /// The estimator must return a rank-3 or rank-4 kernel over exactly
    /// this task's points; anything else is a contract violation.
    pub fn update_kernel(
        &mut self,
        model: &mut dyn Model,
        estimator: &dyn CurvatureEstimator,
        kind: KernelKind,
        eps: f64,
    ) -> Result<()> {
        let all_rows: Vec<usize> = (0..self.len()).collect();
        let inputs = self.points.fetch_rows(&all_rows)?;
        let kernel = estimator.kernel(model, &inputs, kind)?;
        if kernel.ndim() >= 2 && (kernel.shape()[0] != self.len() || kernel.shape()[1] != self.len())
        {
            return Err(MnemeError::ShapeMismatch {
                context: "kernel point axes",
                expected: format!("({n}, {n}, ...)", n = self.len()),
                got: format!("{:?}", kernel.shape()),
            });
        }
        self.kernel_inv = Some(invert_kernel(&kernel, eps)?);
        Ok(())
    }

    /// Recompute the stored reference mean from the current model state.
    ///
    /// Evaluation runs in chunks of `max_points_per_batch` rows to bound
    /// peak memory independent of how many points the task retains.
    pub fn update_mean(
        &mut self,
        model: &mut dyn Model,
        mode: MemoryLossMode,
        residual_frac: f64,
        max_points_per_batch: usize,
    ) -> Result<()> {
        if mode == MemoryLossMode::HardAll {
            let width = self.local_width();
            self.mean = Some(self.true_targets_one_hot(width)?);
            return Ok(());
        }

        let all_rows: Vec<usize> = (0..self.len()).collect();
        let mut mean = self.evaluate_outputs(model, &all_rows, max_points_per_batch)?;

        match mode {
            MemoryLossMode::SoftAll | MemoryLossMode::HardAll => {}
            MemoryLossMode::SoftLowResidualHardRest => {
                let one_hot_targets = self.true_targets_one_hot(mean.ncols())?;
                let residuals: Vec<f64> = mean
                    .axis_iter(Axis(0))
                    .zip(one_hot_targets.axis_iter(Axis(0)))
                    .map(|(m, y)| m.iter().zip(y.iter()).map(|(&a, &b)| (a - b).abs()).sum())
                    .collect();
                let n_residual = (self.len() as f64 * residual_frac) as usize;
                for &row in argsort_descending(&residuals).iter().take(n_residual) {
                    mean.row_mut(row).assign(&one_hot_targets.row(row));
                }
            }
            MemoryLossMode::SoftCorrect => {
                let locals = self.local_targets()?;
                let keep: Vec<usize> = (0..self.len())
                    .filter(|&row| row_argmax(&mean, row) == locals[row])
                    .collect();
                if keep.len() < self.len() {
                    log::debug!(
                        "soft_correct pruned {} mispredicted memorable points",
                        self.len() - keep.len()
                    );
                    self.retain_rows(&keep);
                    mean = mean.select(Axis(0), &keep);
                }
            }
            MemoryLossMode::SoftCorrectHardRest => {
                let one_hot_targets = self.true_targets_one_hot(mean.ncols())?;
                let locals = self.local_targets()?;
                for row in 0..self.len() {
                    if row_argmax(&mean, row) != locals[row] {
                        mean.row_mut(row).assign(&one_hot_targets.row(row));
                    }
                }
            }
        }

        self.mean = Some(mean);
        Ok(())
    }

    /// Functional-drift penalty of the current model against the stored
    /// mean.
    ///
    /// `rows` restricts the computation to a subset of points and `n_sub`
    /// caps the row count; both only combine with the identity kernel or
    /// the alternate penalty, since a stored kernel inverse is sized for
    /// the full point set.
    pub fn penalty(
        &self,
        model: &mut dyn Model,
        n_sub: Option<usize>,
        rows: Option<&[usize]>,
        use_alternate_penalty: bool,
        max_points_per_batch: usize,
    ) -> Result<f64> {
        let mean = self.mean.as_ref().ok_or(MnemeError::NotReady)?;

        let mut row_set: Vec<usize> = match rows {
            Some(rows) => rows.to_vec(),
            None => (0..self.len()).collect(),
        };
        if let Some(cap) = n_sub {
            row_set.truncate(cap);
        }
        if let Some(&bad) = row_set.iter().find(|&&r| r >= self.len()) {
            return Err(MnemeError::ShapeMismatch {
                context: "penalty row subset",
                expected: format!("rows below {}", self.len()),
                got: format!("{bad}"),
            });
        }
        if !use_alternate_penalty && self.kernel_inv.is_some() && row_set.len() != self.len() {
            return Err(MnemeError::ShapeMismatch {
                context: "quadratic-form penalty",
                expected: format!("all {} points", self.len()),
                got: format!("{} rows", row_set.len()),
            });
        }
        if row_set.is_empty() {
            return Ok(0.0);
        }

        let current = self.evaluate_outputs(model, &row_set, max_points_per_batch)?;
        let stored = mean.select(Axis(0), &row_set);
        if current.dim() != stored.dim() {
            return Err(MnemeError::ShapeMismatch {
                context: "penalty outputs",
                expected: format!("{:?}", stored.dim()),
                got: format!("{:?}", current.dim()),
            });
        }

        if use_alternate_penalty {
            // Cross entropy against the stored mean as a soft target
            // distribution; the kernel plays no part here.
            return cross_entropy_with_probs(&current, &stored);
        }

        let b = &current - &stored;
        quadratic_form(self.kernel_inv.as_ref(), &b)
    }

    /// Evaluate the model on the given point rows, chunked to bound peak
    /// memory.
    fn evaluate_outputs(
        &self,
        model: &mut dyn Model,
        rows: &[usize],
        max_points_per_batch: usize,
    ) -> Result<Array2<f64>> {
        let chunk = max_points_per_batch.max(1);
        let mut parts: Vec<Array2<f64>> = Vec::new();
        for chunk_rows in rows.chunks(chunk) {
            let inputs = self.points.fetch_rows(chunk_rows)?;
            parts.push(model.forward(&inputs));
        }
        match parts.len() {
            0 => Ok(Array2::zeros((0, 0))),
            1 => Ok(parts.pop().unwrap()),
            _ => {
                let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
                concatenate(Axis(0), &views).map_err(|_| MnemeError::ShapeMismatch {
                    context: "chunked evaluation",
                    expected: "consistent output widths across chunks".to_string(),
                    got: "inconsistent widths".to_string(),
                })
            }
        }
    }

    /// Width of the task-local class space.
    fn local_width(&self) -> usize {
        match &self.class_ids {
            Some(ids) => ids.len(),
            None => self
                .true_targets
                .iter()
                .map(|t| match t {
                    Target::Soft(probs) => probs.len(),
                    Target::Hard(label) => label + 1,
                })
                .max()
                .unwrap_or(0),
        }
    }

    fn local_targets(&self) -> Result<Vec<usize>> {
        self.true_targets
            .iter()
            .map(|t| local_target(t, self.class_ids.as_deref()))
            .collect()
    }

    fn true_targets_one_hot(&self, width: usize) -> Result<Array2<f64>> {
        one_hot(&self.local_targets()?, width)
    }

    /// Keep only the given rows across every parallel vector.
    fn retain_rows(&mut self, keep: &[usize]) {
        self.points = self.points.keep_rows(keep);
        self.indices = keep.iter().map(|&r| self.indices[r]).collect();
        self.indices_global = keep.iter().map(|&r| self.indices_global[r]).collect();
        self.true_targets = keep.iter().map(|&r| self.true_targets[r].clone()).collect();
        self.kinds = keep.iter().map(|&r| self.kinds[r]).collect();
    }
}

fn row_argmax(matrix: &Array2<f64>, row: usize) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (col, &v) in matrix.row(row).iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = col;
        }
    }
    best
}
