//! Dataset abstractions: random-access datasets, targets, minibatching,
//! and the strided shard view used for multi-process point selection.
//!
//! The regularization engine never owns training data. It consumes any type
//! implementing [`Dataset`], which exposes random access by index plus two
//! optional hooks for multi-task datasets: a hard-target view of the current
//! task and a local-to-global index translation.

use crate::error::Result;
use ndarray::{Array1, Array2};
use std::sync::Arc;

/// A supervised target: either a hard class label or a soft probability
/// vector over all classes.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    /// Integer class label (global class id)
    Hard(usize),
    /// Probability vector over global classes
    Soft(Array1<f64>),
}

impl Target {
    /// Collapse to a hard global class id (argmax for soft targets).
    pub fn hard_label(&self) -> usize {
        match self {
            Target::Hard(label) => *label,
            Target::Soft(probs) => {
                let mut best = 0;
                let mut best_val = f64::NEG_INFINITY;
                for (i, &p) in probs.iter().enumerate() {
                    if p > best_val {
                        best_val = p;
                        best = i;
                    }
                }
                best
            }
        }
    }
}

/// Random-access dataset of `(input, target)` pairs.
///
/// Indices passed to [`input`](Dataset::input) and
/// [`target`](Dataset::target) are *global* indices: for multi-task
/// datasets, [`globalize_index`](Dataset::globalize_index) translates a
/// task-local index into one addressable on the same dataset object.
pub trait Dataset {
    /// Number of examples reachable through local indices.
    fn len(&self) -> usize;

    /// Input row for a global index.
    fn input(&self, index: usize) -> Array1<f64>;

    /// Target for a global index.
    fn target(&self, index: usize) -> Target;

    /// Hard class labels of the current task, for multi-task datasets that
    /// distinguish the active task from the full concatenated data.
    /// `None` means the dataset is single-task and plain labels apply.
    fn hard_task_targets(&self) -> Option<Vec<usize>> {
        None
    }

    /// Translate a task-local index into a global index valid on this
    /// dataset. Identity for single-task datasets.
    fn globalize_index(&self, index: usize) -> usize {
        index
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Simple in-memory dataset backed by a feature matrix and a target list.
#[derive(Clone, Debug)]
pub struct InMemoryDataset {
    inputs: Array2<f64>,
    targets: Vec<Target>,
    task_targets: Option<Vec<usize>>,
}

impl InMemoryDataset {
    /// Create from a feature matrix (one row per example) and targets.
    ///
    /// # Panics
    /// Panics if the number of rows and targets disagree.
    pub fn new(inputs: Array2<f64>, targets: Vec<Target>) -> Self {
        assert_eq!(
            inputs.nrows(),
            targets.len(),
            "input rows and target count must match"
        );
        Self {
            inputs,
            targets,
            task_targets: None,
        }
    }

    /// Create from hard integer labels.
    pub fn from_labels(inputs: Array2<f64>, labels: Vec<usize>) -> Self {
        let targets = labels.into_iter().map(Target::Hard).collect();
        Self::new(inputs, targets)
    }

    /// Attach a hard-target view of the current task (multi-task datasets).
    pub fn with_task_targets(mut self, task_targets: Vec<usize>) -> Self {
        self.task_targets = Some(task_targets);
        self
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.targets.len()
    }

    fn input(&self, index: usize) -> Array1<f64> {
        self.inputs.row(index).to_owned()
    }

    fn target(&self, index: usize) -> Target {
        self.targets[index].clone()
    }

    fn hard_task_targets(&self) -> Option<Vec<usize>> {
        self.task_targets.clone()
    }
}

/// Strided shard of a dataset for multi-process selection: process `rank`
/// of `world_size` sees local indices `rank, rank + world, rank + 2*world, ...`
/// so shards are disjoint and cover the base dataset exactly once.
pub struct StridedShard<'a> {
    base: &'a dyn Dataset,
    rank: usize,
    world_size: usize,
}

impl<'a> StridedShard<'a> {
    /// # Panics
    /// Panics if `world_size` is zero or `rank >= world_size`.
    pub fn new(base: &'a dyn Dataset, rank: usize, world_size: usize) -> Self {
        assert!(world_size > 0, "world_size must be positive");
        assert!(rank < world_size, "rank must be below world_size");
        Self {
            base,
            rank,
            world_size,
        }
    }
}

impl Dataset for StridedShard<'_> {
    fn len(&self) -> usize {
        let n = self.base.len();
        if n <= self.rank {
            0
        } else {
            (n - self.rank).div_ceil(self.world_size)
        }
    }

    fn input(&self, index: usize) -> Array1<f64> {
        self.base.input(index)
    }

    fn target(&self, index: usize) -> Target {
        self.base.target(index)
    }

    // A shard is a plain subset: the base's task view no longer lines up
    // with shard-local indices, so it is dropped.

    fn globalize_index(&self, index: usize) -> usize {
        self.base.globalize_index(self.rank + index * self.world_size)
    }
}

/// Iterate a dataset in its natural (unshuffled) order as fixed-size
/// minibatches of `(inputs, targets)`.
pub fn batches(data: &dyn Dataset, batch_size: usize) -> Batches<'_> {
    assert!(batch_size > 0, "batch_size must be positive");
    Batches {
        data,
        batch_size,
        next: 0,
    }
}

/// Iterator returned by [`batches`].
pub struct Batches<'a> {
    data: &'a dyn Dataset,
    batch_size: usize,
    next: usize,
}

impl Iterator for Batches<'_> {
    type Item = (Array2<f64>, Vec<Target>);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.data.len();
        if self.next >= n {
            return None;
        }
        let end = (self.next + self.batch_size).min(n);
        let indices: Vec<usize> = (self.next..end)
            .map(|i| self.data.globalize_index(i))
            .collect();
        self.next = end;
        let inputs = gather_inputs(self.data, &indices).ok()?;
        let targets = indices.iter().map(|&g| self.data.target(g)).collect();
        Some((inputs, targets))
    }
}

/// Stack the input rows for a set of global indices into one matrix.
pub fn gather_inputs(data: &dyn Dataset, indices: &[usize]) -> Result<Array2<f64>> {
    if indices.is_empty() {
        return Ok(Array2::zeros((0, 0)));
    }
    let first = data.input(indices[0]);
    let dim = first.len();
    let mut out = Array2::zeros((indices.len(), dim));
    out.row_mut(0).assign(&first);
    for (row, &g) in indices.iter().enumerate().skip(1) {
        out.row_mut(row).assign(&data.input(g));
    }
    Ok(out)
}

/// Convenience for holding datasets behind a shared handle; lazy memorable
/// points keep one of these alive for the task's lifetime.
pub type SharedDataset = Arc<dyn Dataset>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn four_points() -> InMemoryDataset {
        let inputs = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0]];
        InMemoryDataset::from_labels(inputs, vec![0, 1, 0, 1])
    }

    #[test]
    fn test_in_memory_access() {
        let data = four_points();
        assert_eq!(data.len(), 4);
        assert_eq!(data.input(2), array![2.0, 1.0]);
        assert_eq!(data.target(1), Target::Hard(1));
        assert_eq!(data.globalize_index(3), 3);
    }

    #[test]
    fn test_hard_label_from_soft() {
        let t = Target::Soft(array![0.1, 0.7, 0.2]);
        assert_eq!(t.hard_label(), 1);
    }

    #[test]
    fn test_strided_shard_disjoint_cover() {
        let data = four_points();
        let mut seen = Vec::new();
        for rank in 0..3 {
            let shard = StridedShard::new(&data, rank, 3);
            for i in 0..shard.len() {
                seen.push(shard.globalize_index(i));
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_strided_shard_len() {
        let data = four_points();
        assert_eq!(StridedShard::new(&data, 0, 3).len(), 2); // 0, 3
        assert_eq!(StridedShard::new(&data, 1, 3).len(), 1); // 1
        assert_eq!(StridedShard::new(&data, 2, 3).len(), 1); // 2
    }

    #[test]
    fn test_shard_drops_task_view() {
        let data = four_points().with_task_targets(vec![0, 1, 0, 1]);
        let shard = StridedShard::new(&data, 0, 2);
        assert!(shard.hard_task_targets().is_none());
    }

    #[test]
    fn test_batches_natural_order() {
        let data = four_points();
        let collected: Vec<_> = batches(&data, 3).collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].0.nrows(), 3);
        assert_eq!(collected[1].0.nrows(), 1);
        assert_eq!(collected[1].1, vec![Target::Hard(1)]);
        // First row of first batch is example 0
        assert_eq!(collected[0].0.row(0), array![0.0, 1.0].view());
    }

    #[test]
    fn test_gather_inputs() {
        let data = four_points();
        let gathered = gather_inputs(&data, &[3, 0]).unwrap();
        assert_eq!(gathered, array![[3.0, 0.0], [0.0, 1.0]]);
    }
}
