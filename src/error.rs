//! Error types for mneme.

use thiserror::Error;

/// Mneme error types.
#[derive(Error, Debug)]
pub enum MnemeError {
    /// Unknown or inconsistent configuration, rejected at construction
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Penalty requested before any task was registered
    #[error("no observed task: register a task with update_regularization_info first")]
    NotReady,

    /// Kernel tensor rank is neither 3 nor 4
    #[error("invalid kernel rank {ndim}: kernel tensors must have rank 3 (n, n, c) or 4 (n, n, c, c)")]
    InvalidKernelShape { ndim: usize },

    /// Kernel matrix inversion failed (singular or ill-conditioned)
    #[error("linear algebra failure: {0}")]
    LinearAlgebra(String),

    /// Tensor dimensions disagree where they must match
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        got: String,
    },

    /// A target class id is not part of the task's class subset
    #[error("class id {class_id} is not in the task's class subset")]
    UnknownClassId { class_id: usize },
}

/// Result type alias for mneme operations.
pub type Result<T> = std::result::Result<T, MnemeError>;
