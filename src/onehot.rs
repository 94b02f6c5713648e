//! One-hot encoding of hard and soft targets, with task-local class-id
//! remapping.
//!
//! Tasks can restrict the model head to a subset of global classes. Stored
//! predictions then live in *local* class space (columns `0..k` for a
//! `k`-class subset), so global target ids must be remapped before any
//! comparison against an argmax over predictions.

use crate::data::Target;
use crate::error::{MnemeError, Result};
use ndarray::Array2;

/// One-hot encode local class indices into probability rows of the given
/// width.
pub fn one_hot(targets: &[usize], width: usize) -> Result<Array2<f64>> {
    let mut out = Array2::zeros((targets.len(), width));
    for (row, &class) in targets.iter().enumerate() {
        if class >= width {
            return Err(MnemeError::UnknownClassId { class_id: class });
        }
        out[[row, class]] = 1.0;
    }
    Ok(out)
}

/// Remap a target's global class id into the task-local index.
///
/// With no class subset the global id is already local. Soft targets
/// collapse to their argmax before remapping.
pub fn local_target(target: &Target, class_ids: Option<&[usize]>) -> Result<usize> {
    let global = target.hard_label();
    match class_ids {
        None => Ok(global),
        Some(ids) => ids
            .iter()
            .position(|&c| c == global)
            .ok_or(MnemeError::UnknownClassId { class_id: global }),
    }
}

/// One-hot encode a batch of targets into task-local probability rows.
pub fn targets_one_hot(
    targets: &[Target],
    class_ids: Option<&[usize]>,
    width: usize,
) -> Result<Array2<f64>> {
    let locals: Vec<usize> = targets
        .iter()
        .map(|t| local_target(t, class_ids))
        .collect::<Result<_>>()?;
    one_hot(&locals, width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_one_hot_basic() {
        let encoded = one_hot(&[1, 0], 3).unwrap();
        assert_eq!(encoded, array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_one_hot_out_of_range() {
        assert!(matches!(
            one_hot(&[3], 3),
            Err(MnemeError::UnknownClassId { class_id: 3 })
        ));
    }

    #[test]
    fn test_local_target_identity() {
        assert_eq!(local_target(&Target::Hard(2), None).unwrap(), 2);
    }

    #[test]
    fn test_local_target_remaps_subset() {
        let ids = [4usize, 7];
        assert_eq!(local_target(&Target::Hard(7), Some(&ids)).unwrap(), 1);
        assert!(matches!(
            local_target(&Target::Hard(5), Some(&ids)),
            Err(MnemeError::UnknownClassId { class_id: 5 })
        ));
    }

    #[test]
    fn test_local_target_soft_argmax() {
        let soft = Target::Soft(array![0.0, 0.1, 0.0, 0.9]);
        let ids = [2usize, 3];
        assert_eq!(local_target(&soft, Some(&ids)).unwrap(), 1);
    }

    #[test]
    fn test_targets_one_hot_with_subset() {
        let targets = vec![Target::Hard(4), Target::Hard(7)];
        let ids = [4usize, 7];
        let encoded = targets_one_hot(&targets, Some(&ids), 2).unwrap();
        assert_eq!(encoded, array![[1.0, 0.0], [0.0, 1.0]]);
    }
}
