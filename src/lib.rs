//! # Mneme: functional regularization over memorable past points
//!
//! Mneme is a continual-learning regularization library. Instead of
//! penalizing parameter drift, it penalizes change in a model's *output
//! behavior* on a small set of retained "memorable points" per finished
//! task — so a network training on task five is still held close to what
//! it used to predict on tasks one through four, without keeping their
//! datasets around.
//!
//! ## Quick Start
//!
//! ```rust
//! use mneme::{InMemoryDataset, Mneme, MnemeConfig, Model, SelectMethod};
//! use ndarray::{array, Array2};
//! use std::sync::Arc;
//!
//! // A toy linear model
//! struct Linear {
//!     weight: Array2<f64>,
//! }
//!
//! impl Model for Linear {
//!     fn forward(&mut self, inputs: &Array2<f64>) -> Array2<f64> {
//!         inputs.dot(&self.weight)
//!     }
//! }
//!
//! # fn main() -> mneme::Result<()> {
//! let config = MnemeConfig {
//!     use_identity_kernel: true,
//!     select_method: SelectMethod::RandomGlobal,
//!     seed: Some(0),
//!     ..MnemeConfig::default()
//! };
//! let mut engine = Mneme::new(config)?;
//! let mut model = Linear {
//!     weight: Array2::eye(2),
//! };
//!
//! // Once a task finishes training, register it
//! let data = Arc::new(InMemoryDataset::from_labels(
//!     array![[1.0, 0.0], [0.0, 1.0]],
//!     vec![0, 1],
//! ));
//! engine.update_regularization_info(&mut model, data, None)?;
//!
//! // While training later tasks, add the drift penalty to the loss
//! if engine.is_ready() {
//!     let penalty = engine.penalty(&mut model)?;
//!     assert!(penalty >= 0.0);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! - **Memorable points**: a small, optionally class-balanced subset of a
//!   task's data retained as a proxy for its full distribution.
//! - **Kernel**: a curvature-derived similarity structure over model
//!   outputs at those points, inverted once per update and used to whiten
//!   the penalty's quadratic form.
//! - **Mean**: the reference outputs (soft predictions or one-hot targets)
//!   the current model is pulled back toward.
//! - **Head scope**: a temporary output rewrite (temperature, class
//!   subset, softmax) wrapped around single forward passes.
//!
//! The model, curvature estimator, dataset, and distributed runtime are
//! all collaborator traits — mneme orchestrates them but owns none of the
//! forward/backward machinery.

pub mod config;
pub mod curvature;
pub mod data;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod model;
pub mod numeric;
pub mod onehot;
pub mod scoring;
pub mod selection;
pub mod task;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use config::{MnemeConfig, PenaltyKind};
pub use curvature::{CurvatureEstimator, CurvatureShape, CurvatureType, KernelKind};
pub use data::{batches, gather_inputs, Dataset, InMemoryDataset, SharedDataset, StridedShard, Target};
pub use distributed::{DistRuntime, SingleProcess};
pub use engine::{Mneme, PenaltyOptions};
pub use error::{MnemeError, Result};
pub use kernel::{invert_kernel, quadratic_form, KernelInverse};
pub use model::{BroadcastGuard, HeadSpec, HeadView, Model};
pub use scoring::{ScoreComputer, ScoreMethod};
pub use selection::{
    collect_memorable_points, CorrectionSelect, MemorableSelection, PointKind, SelectMethod,
    SelectionPlan,
};
pub use task::{MemorablePoints, MemoryLossMode, PastTask};
