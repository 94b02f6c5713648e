//! Engine configuration.
//!
//! Every method and mode is a tagged enum resolved once at construction;
//! the `FromStr` impls (here and next to the enums they parse) reject
//! unknown names eagerly with `UnsupportedConfiguration`, so a config that
//! survives [`MnemeConfig::validate`] never fails a dispatch later.

use crate::curvature::{CurvatureShape, CurvatureType, KernelKind};
use crate::error::{MnemeError, Result};
use crate::selection::{CorrectionSelect, SelectMethod};
use crate::task::MemoryLossMode;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which penalty family the engine computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    /// Kernel-whitened quadratic drift over softmax outputs
    Fromp,
    /// Drift over raw logits (head softmax skipped)
    Der,
}

impl FromStr for PenaltyKind {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fromp" => Ok(Self::Fromp),
            "der" => Ok(Self::Der),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown penalty kind '{other}' (choices: fromp, der)"
            ))),
        }
    }
}

/// Configuration for the regularization engine.
///
/// Defaults mirror a small-memory setup: ten memorable points per task,
/// curvature-ranked class-balanced selection, raw soft means, and the full
/// cross-class kernel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MnemeConfig {
    /// Penalty weight multiplied into the final scalar
    pub tau: f64,
    /// Softmax temperature applied inside every head scope
    pub temp: f64,
    /// Diagonal conditioning added before kernel inversion
    pub eps: f64,
    /// Cap on how many past tasks one penalty call visits; `None` visits
    /// all of them
    pub max_tasks_for_penalty: Option<usize>,
    /// Absolute memorable-point budget per task
    pub n_memorable_points: Option<usize>,
    /// Fractional budget, used when the absolute budget is unset
    pub memorable_points_frac: Option<f64>,
    /// Row cap for penalty evaluation; disabled when it would not shrink
    /// the budget
    pub n_memorable_points_sub: Option<usize>,
    pub select_method: SelectMethod,
    pub memory_loss_mode: MemoryLossMode,
    /// Fraction driving both error-correction sizing and
    /// `soft_low_residual_hard_rest` overwrites
    pub memory_residual_frac: f64,
    pub use_error_correction: bool,
    pub correction_select: CorrectionSelect,
    /// Intended curvature approximation, for estimator implementations
    pub curvature_shape: CurvatureShape,
    pub curvature_type: CurvatureType,
    /// Damping handed to the curvature estimator
    pub prior_precision: f64,
    /// Monte Carlo samples for `CurvatureType::Mc` estimators
    pub n_mc_samples: usize,
    pub kernel_kind: KernelKind,
    /// Skip curvature entirely and use the identity kernel
    pub use_identity_kernel: bool,
    /// Multiply the penalty by `temp²`
    pub use_temp_correction: bool,
    pub penalty: PenaltyKind,
    /// Minibatch size for scoring and curvature passes
    pub batch_size: usize,
    /// Chunk size bounding peak memory during mean/penalty evaluation
    pub max_points_per_batch: usize,
    /// Store memorable points as a tensor batch instead of a lazy handle
    pub materialize_points: bool,
    /// Seed for the engine RNG; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for MnemeConfig {
    fn default() -> Self {
        Self {
            tau: 1.0,
            temp: 1.0,
            eps: 1e-5,
            max_tasks_for_penalty: None,
            n_memorable_points: Some(10),
            memorable_points_frac: None,
            n_memorable_points_sub: Some(10),
            select_method: SelectMethod::LambdaDescend,
            memory_loss_mode: MemoryLossMode::SoftAll,
            memory_residual_frac: 1.0,
            use_error_correction: false,
            correction_select: CorrectionSelect::Random,
            curvature_shape: CurvatureShape::Diag,
            curvature_type: CurvatureType::Exact,
            prior_precision: 1e-5,
            n_mc_samples: 1,
            kernel_kind: KernelKind::Implicit,
            use_identity_kernel: false,
            use_temp_correction: false,
            penalty: PenaltyKind::Fromp,
            batch_size: 32,
            max_points_per_batch: 50,
            materialize_points: true,
            seed: None,
        }
    }
}

impl MnemeConfig {
    /// Reject inconsistent settings before any state is built.
    pub fn validate(&self) -> Result<()> {
        if !self.tau.is_finite() {
            return Err(MnemeError::UnsupportedConfiguration(
                "tau must be finite".to_string(),
            ));
        }
        if !(self.temp.is_finite() && self.temp > 0.0) {
            return Err(MnemeError::UnsupportedConfiguration(
                "temp must be positive".to_string(),
            ));
        }
        if !(self.eps.is_finite() && self.eps >= 0.0) {
            return Err(MnemeError::UnsupportedConfiguration(
                "eps must be non-negative".to_string(),
            ));
        }
        if self.n_memorable_points.is_none() && self.memorable_points_frac.is_none() {
            return Err(MnemeError::UnsupportedConfiguration(
                "set n_memorable_points or memorable_points_frac".to_string(),
            ));
        }
        if let Some(frac) = self.memorable_points_frac {
            if !(frac.is_finite() && frac > 0.0) {
                return Err(MnemeError::UnsupportedConfiguration(
                    "memorable_points_frac must be positive".to_string(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.memory_residual_frac) {
            return Err(MnemeError::UnsupportedConfiguration(
                "memory_residual_frac must be within [0, 1]".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(MnemeError::UnsupportedConfiguration(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.max_points_per_batch == 0 {
            return Err(MnemeError::UnsupportedConfiguration(
                "max_points_per_batch must be positive".to_string(),
            ));
        }
        if self.n_mc_samples == 0 {
            return Err(MnemeError::UnsupportedConfiguration(
                "n_mc_samples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
