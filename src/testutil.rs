//! Shared test fixtures: a deterministic linear model and a mock curvature
//! estimator.

use crate::curvature::{CurvatureEstimator, KernelKind};
use crate::data::Dataset;
use crate::distributed::DistRuntime;
use crate::error::Result;
use crate::model::Model;
use ndarray::{Array, Array2, ArrayD, IxDyn};
use std::cell::Cell;
use std::sync::Arc;

/// Linear model: `outputs = inputs · weight`, no bias.
pub(crate) struct LinearModel {
    pub weight: Array2<f64>,
    pub training: bool,
    pub broadcast: bool,
}

impl LinearModel {
    pub fn new(weight: Array2<f64>) -> Self {
        Self {
            weight,
            training: true,
            broadcast: true,
        }
    }

    /// Identity weights: logits equal the inputs.
    pub fn identity(dim: usize) -> Self {
        Self::new(Array2::eye(dim))
    }

    /// Diagonal weights scaling every output by `scale`.
    pub fn scaled(dim: usize, scale: f64) -> Self {
        Self::new(Array2::eye(dim) * scale)
    }
}

impl Model for LinearModel {
    fn forward(&mut self, inputs: &Array2<f64>) -> Array2<f64> {
        inputs.dot(&self.weight)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn broadcast_enabled(&self) -> bool {
        self.broadcast
    }

    fn set_broadcast_enabled(&mut self, enabled: bool) {
        self.broadcast = enabled;
    }
}

/// Lifecycle call counters observable from outside an engine-owned
/// estimator.
#[derive(Default)]
pub(crate) struct CurvatureCalls {
    pub update: Cell<usize>,
    pub reduce: Cell<usize>,
    pub accumulate: Cell<usize>,
    pub inverse: Cell<usize>,
    pub kernel: Cell<usize>,
}

/// Curvature estimator returning a scaled identity kernel and counting
/// lifecycle calls.
pub(crate) struct MockCurvature {
    pub n_classes: usize,
    pub diag: f64,
    calls: Arc<CurvatureCalls>,
}

impl MockCurvature {
    pub fn new(n_classes: usize, diag: f64) -> Self {
        Self {
            n_classes,
            diag,
            calls: Arc::new(CurvatureCalls::default()),
        }
    }

    /// Handle to the call counters, alive after the estimator is boxed.
    pub fn calls(&self) -> Arc<CurvatureCalls> {
        Arc::clone(&self.calls)
    }
}

impl CurvatureEstimator for MockCurvature {
    fn update_curvature(
        &mut self,
        _model: &mut dyn Model,
        _data: &dyn Dataset,
        _batch_size: usize,
    ) -> Result<()> {
        self.calls.update.set(self.calls.update.get() + 1);
        Ok(())
    }

    fn reduce_curvature(&mut self, _runtime: &dyn DistRuntime) -> Result<()> {
        self.calls.reduce.set(self.calls.reduce.get() + 1);
        Ok(())
    }

    fn accumulate_curvature(&mut self, _into_running_total: bool) {
        self.calls.accumulate.set(self.calls.accumulate.get() + 1);
    }

    fn update_inverse(&mut self) -> Result<()> {
        self.calls.inverse.set(self.calls.inverse.get() + 1);
        Ok(())
    }

    fn kernel(
        &self,
        _model: &mut dyn Model,
        points: &Array2<f64>,
        kind: KernelKind,
    ) -> Result<ArrayD<f64>> {
        self.calls.kernel.set(self.calls.kernel.get() + 1);
        let n = points.nrows();
        let c = self.n_classes;
        let diag = self.diag;
        Ok(match kind {
            KernelKind::Implicit => Array::from_shape_fn(IxDyn(&[n, n, c, c]), |idx| {
                if idx[0] == idx[1] && idx[2] == idx[3] {
                    diag
                } else {
                    0.0
                }
            }),
            KernelKind::ClassWise => Array::from_shape_fn(IxDyn(&[n, n, c]), |idx| {
                if idx[0] == idx[1] {
                    diag
                } else {
                    0.0
                }
            }),
        })
    }
}
