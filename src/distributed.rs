//! Distributed-runtime collaborator trait.
//!
//! Curvature accumulation must be reduced across cooperating processes
//! before inversion, and point selection shards the dataset by rank. Both
//! go through [`DistRuntime`] so a single-process run needs no distributed
//! machinery at all.

use crate::error::Result;

/// Minimal view of a data-parallel runtime.
pub trait DistRuntime {
    /// Rank of this process in `0..world_size`.
    fn rank(&self) -> usize;

    /// Number of cooperating processes.
    fn world_size(&self) -> usize;

    /// Average a flat buffer element-wise across all processes, in place.
    fn all_reduce_mean(&self, buffer: &mut [f64]) -> Result<()>;
}

/// Single-process runtime: rank 0 of 1, reductions are no-ops.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl DistRuntime for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_mean(&self, _buffer: &mut [f64]) -> Result<()> {
        Ok(())
    }
}
