//! Curvature-estimator collaborator trait and the curvature vocabulary
//! enums.
//!
//! The engine consumes curvature as a black box: an estimator accumulates
//! per-task curvature (a Fisher / Gauss-Newton approximation), reduces it
//! across processes, folds it into a running all-tasks total, inverts it,
//! and finally evaluates a preconditioned kernel over model outputs at the
//! memorable points. Estimator internals — KFAC factors, diagonal Fisher,
//! MC sampling — live outside this crate.

use crate::data::Dataset;
use crate::error::{MnemeError, Result};
use crate::model::Model;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Structural approximation used by the curvature estimator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurvatureShape {
    /// Kronecker-factored per-layer blocks
    Kron,
    /// Diagonal approximation
    Diag,
}

impl FromStr for CurvatureShape {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kron" => Ok(Self::Kron),
            "diag" => Ok(Self::Diag),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown curvature shape '{other}' (choices: kron, diag)"
            ))),
        }
    }
}

/// How the Fisher expectation is taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurvatureType {
    /// Exact expectation over the model's predictive distribution
    Exact,
    /// Monte Carlo estimate
    Mc,
}

impl FromStr for CurvatureType {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(Self::Exact),
            "mc" => Ok(Self::Mc),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown curvature type '{other}' (choices: exact, mc)"
            ))),
        }
    }
}

/// Which kernel the estimator evaluates over memorable points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    /// Full cross-class kernel, rank-4 `(n, n, c, c)`
    Implicit,
    /// Per-class diagonal kernel, rank-3 `(n, n, c)`
    ClassWise,
}

impl FromStr for KernelKind {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "implicit" => Ok(Self::Implicit),
            "class_wise" => Ok(Self::ClassWise),
            other => Err(MnemeError::UnsupportedConfiguration(format!(
                "unknown kernel kind '{other}' (choices: implicit, class_wise)"
            ))),
        }
    }
}

/// Curvature / precision estimator collaborator.
///
/// Call order per registered task: [`update_curvature`] on each process,
/// then [`reduce_curvature`] once per process when distributed (omitting it
/// silently leaves per-process curvature inconsistent), then
/// [`accumulate_curvature`] and [`update_inverse`].
///
/// [`update_curvature`]: CurvatureEstimator::update_curvature
/// [`reduce_curvature`]: CurvatureEstimator::reduce_curvature
/// [`accumulate_curvature`]: CurvatureEstimator::accumulate_curvature
/// [`update_inverse`]: CurvatureEstimator::update_inverse
pub trait CurvatureEstimator {
    /// Accumulate this process's curvature contribution over a dataset.
    fn update_curvature(
        &mut self,
        model: &mut dyn Model,
        data: &dyn Dataset,
        batch_size: usize,
    ) -> Result<()>;

    /// Reduce the local curvature contribution across processes.
    fn reduce_curvature(&mut self, runtime: &dyn crate::distributed::DistRuntime) -> Result<()>;

    /// Fold the current task's curvature into the running all-tasks total.
    fn accumulate_curvature(&mut self, into_running_total: bool);

    /// Refresh the inverse / preconditioning structure after accumulation.
    fn update_inverse(&mut self) -> Result<()>;

    /// Evaluate the preconditioned kernel over model outputs at `points`.
    ///
    /// Must return rank 4 `(n, n, c, c)` for [`KernelKind::Implicit`] or
    /// rank 3 `(n, n, c)` for [`KernelKind::ClassWise`]; any other rank is
    /// rejected downstream as a contract violation.
    fn kernel(
        &self,
        model: &mut dyn Model,
        points: &ndarray::Array2<f64>,
        kind: KernelKind,
    ) -> Result<ArrayD<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_known_names() {
        assert_eq!("kron".parse::<CurvatureShape>().unwrap(), CurvatureShape::Kron);
        assert_eq!("exact".parse::<CurvatureType>().unwrap(), CurvatureType::Exact);
        assert_eq!("class_wise".parse::<KernelKind>().unwrap(), KernelKind::ClassWise);
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!(matches!(
            "banded".parse::<CurvatureShape>(),
            Err(MnemeError::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            "sampled".parse::<CurvatureType>(),
            Err(MnemeError::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            "ntk".parse::<KernelKind>(),
            Err(MnemeError::UnsupportedConfiguration(_))
        ));
    }
}
