//! The regularization engine.
//!
//! [`Mneme`] owns the per-run state: configuration, an optional curvature
//! estimator, a distributed runtime, a seeded generator, and the
//! append-only list of observed tasks. The model itself stays external and
//! is passed into every call.
//!
//! After each task finishes training, call
//! [`update_regularization_info`](Mneme::update_regularization_info) once.
//! While training later tasks, add [`penalty`](Mneme::penalty) to the loss
//! per minibatch:
//!
//! ```text
//! for each task dataset:
//!     for each minibatch:
//!         loss = task_loss(...)
//!         if engine.is_ready():
//!             loss += engine.penalty(&mut model)?
//!         step(...)
//!     engine.update_regularization_info(&mut model, dataset, class_ids)?
//! ```

use crate::config::{MnemeConfig, PenaltyKind};
use crate::curvature::CurvatureEstimator;
use crate::data::{gather_inputs, SharedDataset, StridedShard, Target};
use crate::distributed::{DistRuntime, SingleProcess};
use crate::error::{MnemeError, Result};
use crate::model::{BroadcastGuard, HeadSpec, HeadView, Model};
use crate::selection::{collect_memorable_points, SelectionPlan};
use crate::task::{MemorablePoints, PastTask};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Per-call overrides for [`Mneme::penalty_with`].
#[derive(Clone, Debug, Default)]
pub struct PenaltyOptions {
    /// Override the configured penalty weight
    pub tau: Option<f64>,
    /// Override the configured temperature for this call's head scopes
    pub temp: Option<f64>,
    /// Override the configured task cap
    pub max_tasks: Option<usize>,
    /// Restrict every task's computation to these point rows
    pub mem_indices: Option<Vec<usize>>,
    /// Use the cross-entropy penalty instead of the quadratic form
    pub use_alternate_penalty: bool,
}

/// Functional-regularization engine over memorable past points.
pub struct Mneme {
    config: MnemeConfig,
    estimator: Option<Box<dyn CurvatureEstimator>>,
    runtime: Box<dyn DistRuntime>,
    rng: ChaCha8Rng,
    /// Normalized row cap: `None` when the configured cap would not shrink
    /// the point budget
    n_sub: Option<usize>,
    observed_tasks: Vec<PastTask>,
}

impl Mneme {
    /// Create an engine without a curvature estimator.
    ///
    /// Only valid for configurations that never touch curvature (identity
    /// kernel, or the `der` penalty).
    pub fn new(config: MnemeConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create an engine with an injected curvature estimator.
    pub fn with_estimator(
        config: MnemeConfig,
        estimator: Box<dyn CurvatureEstimator>,
    ) -> Result<Self> {
        Self::build(config, Some(estimator))
    }

    fn build(config: MnemeConfig, estimator: Option<Box<dyn CurvatureEstimator>>) -> Result<Self> {
        config.validate()?;
        let needs_curvature =
            config.penalty == PenaltyKind::Fromp && !config.use_identity_kernel;
        if needs_curvature && estimator.is_none() {
            return Err(MnemeError::UnsupportedConfiguration(
                "a curvature estimator is required unless use_identity_kernel is set \
                 or the penalty kind is der"
                    .to_string(),
            ));
        }
        let n_sub = match (config.n_memorable_points, config.n_memorable_points_sub) {
            (Some(n), Some(sub)) if n > sub => Some(sub),
            _ => None,
        };
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            config,
            estimator,
            runtime: Box::new(SingleProcess),
            rng,
            n_sub,
            observed_tasks: Vec::new(),
        })
    }

    /// Replace the distributed runtime (defaults to single-process).
    pub fn with_runtime(mut self, runtime: Box<dyn DistRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn config(&self) -> &MnemeConfig {
        &self.config
    }

    /// Whether at least one task has been registered.
    pub fn is_ready(&self) -> bool {
        !self.observed_tasks.is_empty()
    }

    /// Observed tasks in registration order.
    pub fn observed_tasks(&self) -> &[PastTask] {
        &self.observed_tasks
    }

    fn needs_curvature(&self) -> bool {
        self.config.penalty == PenaltyKind::Fromp && !self.config.use_identity_kernel
    }

    /// Register a finished task and refresh all regularization state.
    ///
    /// Runs the curvature update for this task (with cross-process
    /// reduction when distributed), selects the task's memorable points
    /// under a class-restricted head, then recomputes the kernel inverse
    /// and reference mean of *every* observed task, because the shared
    /// model and curvature state changed.
    pub fn update_regularization_info(
        &mut self,
        model: &mut dyn Model,
        data: SharedDataset,
        class_ids: Option<Vec<usize>>,
    ) -> Result<()> {
        model.set_training(false);

        if self.needs_curvature() {
            let estimator = self
                .estimator
                .as_mut()
                .expect("estimator presence checked at construction");
            {
                let mut view = HeadView::new(model, HeadSpec::restricted(class_ids.clone()));
                estimator.update_curvature(&mut view, data.as_ref(), self.config.batch_size)?;
            }
            if self.runtime.world_size() > 1 {
                estimator.reduce_curvature(self.runtime.as_ref())?;
            }
            estimator.accumulate_curvature(true);
            estimator.update_inverse()?;
        }

        let selection = {
            let plan = SelectionPlan {
                n_points: self.config.n_memorable_points,
                frac: self.config.memorable_points_frac,
                method: self.config.select_method,
                residual_frac: self.config.memory_residual_frac,
                use_error_correction: self.config.use_error_correction,
                correction_select: self.config.correction_select,
                batch_size: self.config.batch_size,
                class_ids: class_ids.as_deref(),
            };
            let mut view = HeadView::new(model, HeadSpec::restricted(class_ids.clone()));
            if self.runtime.world_size() > 1 {
                let shard = StridedShard::new(
                    data.as_ref(),
                    self.runtime.rank(),
                    self.runtime.world_size(),
                );
                collect_memorable_points(&mut view, &shard, &plan, &mut self.rng)?
            } else {
                collect_memorable_points(&mut view, data.as_ref(), &plan, &mut self.rng)?
            }
        };

        let true_targets: Vec<Target> = selection
            .indices_global
            .iter()
            .map(|&g| data.target(g))
            .collect();
        let points = if self.config.materialize_points {
            MemorablePoints::Materialized(gather_inputs(data.as_ref(), &selection.indices_global)?)
        } else {
            MemorablePoints::Lazy {
                data: data.clone(),
                indices: selection.indices_global.clone(),
            }
        };
        self.observed_tasks.push(PastTask::new(
            points,
            class_ids,
            selection.indices,
            selection.indices_global,
            true_targets,
            selection.kinds,
        ));
        log::debug!(
            "registered task #{} with {} memorable points",
            self.observed_tasks.len(),
            self.observed_tasks.last().map(|t| t.len()).unwrap_or(0)
        );

        // Shared model/curvature state changed: refresh every task, not
        // just the new one.
        let needs_curvature = self.needs_curvature();
        let softmax = self.config.penalty != PenaltyKind::Der;
        let estimator = self.estimator.as_deref();
        for task in self.observed_tasks.iter_mut() {
            let spec = HeadSpec {
                temp: self.config.temp,
                class_ids: task.class_ids().map(|ids| ids.to_vec()),
                softmax,
            };
            if needs_curvature {
                let estimator =
                    estimator.expect("estimator presence checked at construction");
                let mut view = HeadView::new(model, spec.clone());
                task.update_kernel(&mut view, estimator, self.config.kernel_kind, self.config.eps)?;
            }
            let mut view = HeadView::new(model, spec);
            task.update_mean(
                &mut view,
                self.config.memory_loss_mode,
                self.config.memory_residual_frac,
                self.config.max_points_per_batch,
            )?;
        }
        Ok(())
    }

    /// Penalty with the configured defaults.
    pub fn penalty(&mut self, model: &mut dyn Model) -> Result<f64> {
        self.penalty_with(model, PenaltyOptions::default())
    }

    /// Aggregate drift penalty over (a sample of) the observed tasks.
    ///
    /// When `max_tasks` caps the task count, tasks are drawn uniformly
    /// without replacement and the result is a Monte Carlo estimate of the
    /// full penalty. Broadcast-buffer synchronization is suspended around
    /// the forward passes and restored afterwards.
    pub fn penalty_with(&mut self, model: &mut dyn Model, opts: PenaltyOptions) -> Result<f64> {
        if !self.is_ready() {
            return Err(MnemeError::NotReady);
        }
        let tau = opts.tau.unwrap_or(self.config.tau);
        let temp = opts.temp.unwrap_or(self.config.temp);
        let max_tasks = opts.max_tasks.or(self.config.max_tasks_for_penalty);
        model.set_training(false);

        let n_tasks = self.observed_tasks.len();
        let task_indices: Vec<usize> = match max_tasks {
            Some(cap) if cap < n_tasks => index::sample(&mut self.rng, n_tasks, cap).into_vec(),
            _ => (0..n_tasks).collect(),
        };
        let softmax = self.config.penalty != PenaltyKind::Der;

        let mut total = 0.0;
        {
            let mut guard = BroadcastGuard::disable(model);
            for &task_index in &task_indices {
                let task = &self.observed_tasks[task_index];
                let spec = HeadSpec {
                    temp,
                    class_ids: task.class_ids().map(|ids| ids.to_vec()),
                    softmax,
                };
                let mut view = HeadView::new(guard.model(), spec);
                total += task.penalty(
                    &mut view,
                    self.n_sub,
                    opts.mem_indices.as_deref(),
                    opts.use_alternate_penalty,
                    self.config.max_points_per_batch,
                )?;
            }
        }

        let temp_correction = if self.config.use_temp_correction {
            temp * temp
        } else {
            1.0
        };
        Ok(0.5 * tau * temp_correction * total)
    }
}
