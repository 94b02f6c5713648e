//! Kernel reshaping, conditioned inversion, and the penalty quadratic form.
//!
//! A curvature estimator hands back a kernel tensor over `n` memorable
//! points and `c` task-local classes in one of two layouts:
//!
//! - rank 4, `(n, n, c, c)` — full cross-class kernel, flattened here into
//!   one `(n·c, n·c)` matrix with point-major row order;
//! - rank 3, `(n, n, c)` — per-class diagonal kernel, split here into `c`
//!   independent `(n, n)` matrices.
//!
//! Any other rank is a collaborator contract violation. Before inversion
//! the diagonal is lifted by `eps` (Tikhonov conditioning). The kernel is
//! symmetric positive semi-definite, so inversion goes through a Cholesky
//! factorization first and falls back to LU only when the factorization
//! fails; a matrix that survives neither is a fatal error.

use crate::error::{MnemeError, Result};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayD};

/// Inverted curvature kernel owned by one past task.
///
/// The "identity" case (no kernel) is represented as `Option::None` at the
/// owning side, not as a variant here.
#[derive(Clone, Debug)]
pub enum KernelInverse {
    /// One flattened `(n·c, n·c)` inverse
    Flat(DMatrix<f64>),
    /// `c` per-class `(n, n)` inverses
    ClassWise(Vec<DMatrix<f64>>),
}

/// Reshape, condition, and invert a kernel tensor.
pub fn invert_kernel(kernel: &ArrayD<f64>, eps: f64) -> Result<KernelInverse> {
    match kernel.ndim() {
        4 => {
            let mut flat = flatten_cross_class(kernel)?;
            add_to_diagonal(&mut flat, eps);
            Ok(KernelInverse::Flat(invert_conditioned(flat)?))
        }
        3 => {
            let slices = class_slices(kernel)?;
            let mut inverses = Vec::with_capacity(slices.len());
            for mut slice in slices {
                add_to_diagonal(&mut slice, eps);
                inverses.push(invert_conditioned(slice)?);
            }
            Ok(KernelInverse::ClassWise(inverses))
        }
        ndim => Err(MnemeError::InvalidKernelShape { ndim }),
    }
}

/// Penalty quadratic form `b · (K⁻¹ b)` over a mean-difference matrix `b`
/// of shape `(n, c)`.
///
/// - `None` kernel: identity form, the squared L2 norm of `b`.
/// - `Flat`: one matrix-vector product over the row-major flattening.
/// - `ClassWise`: block-diagonal form, one matrix-vector product per class
///   column.
pub fn quadratic_form(kernel_inv: Option<&KernelInverse>, b: &Array2<f64>) -> Result<f64> {
    match kernel_inv {
        None => Ok(b.iter().map(|&v| v * v).sum()),
        Some(KernelInverse::Flat(matrix)) => {
            let nc = b.len();
            if matrix.nrows() != nc {
                return Err(MnemeError::ShapeMismatch {
                    context: "quadratic_form (flat kernel)",
                    expected: format!("{} mean entries", matrix.nrows()),
                    got: format!("{nc}"),
                });
            }
            // Row-major flattening matches the point-major kernel layout
            let bv = DVector::from_iterator(nc, b.iter().cloned());
            let v = matrix * &bv;
            Ok(bv.dot(&v))
        }
        Some(KernelInverse::ClassWise(matrices)) => {
            let (n, c) = b.dim();
            if matrices.len() != c {
                return Err(MnemeError::ShapeMismatch {
                    context: "quadratic_form (class-wise kernel)",
                    expected: format!("{} classes", matrices.len()),
                    got: format!("{c}"),
                });
            }
            let mut total = 0.0;
            for (class, matrix) in matrices.iter().enumerate() {
                if matrix.nrows() != n {
                    return Err(MnemeError::ShapeMismatch {
                        context: "quadratic_form (class-wise kernel)",
                        expected: format!("{} points", matrix.nrows()),
                        got: format!("{n}"),
                    });
                }
                let ba = DVector::from_iterator(n, b.column(class).iter().cloned());
                total += ba.dot(&(matrix * &ba));
            }
            Ok(total)
        }
    }
}

/// Flatten a rank-4 `(n, n, c, c)` kernel into `(n·c, n·c)` with the class
/// axes adjacent to their point axes: entry `(i·c + a, j·c + b)` is
/// `kernel[i, j, a, b]`.
fn flatten_cross_class(kernel: &ArrayD<f64>) -> Result<DMatrix<f64>> {
    let shape = kernel.shape();
    let (n, c) = (shape[0], shape[3]);
    if shape[0] != shape[1] || shape[2] != shape[3] {
        return Err(MnemeError::ShapeMismatch {
            context: "cross-class kernel",
            expected: "(n, n, c, c)".to_string(),
            got: format!("{shape:?}"),
        });
    }
    let nc = n * c;
    Ok(DMatrix::from_fn(nc, nc, |r, s| {
        kernel[[r / c, s / c, r % c, s % c]]
    }))
}

/// Split a rank-3 `(n, n, c)` kernel into `c` matrices, moving the class
/// axis to the front (the inner point axes swap with it).
fn class_slices(kernel: &ArrayD<f64>) -> Result<Vec<DMatrix<f64>>> {
    let shape = kernel.shape();
    let (n, c) = (shape[0], shape[2]);
    if shape[0] != shape[1] {
        return Err(MnemeError::ShapeMismatch {
            context: "class-wise kernel",
            expected: "(n, n, c)".to_string(),
            got: format!("{shape:?}"),
        });
    }
    Ok((0..c)
        .map(|class| DMatrix::from_fn(n, n, |r, s| kernel[[s, r, class]]))
        .collect())
}

fn add_to_diagonal(matrix: &mut DMatrix<f64>, value: f64) {
    for i in 0..matrix.nrows().min(matrix.ncols()) {
        matrix[(i, i)] += value;
    }
}

fn invert_conditioned(matrix: DMatrix<f64>) -> Result<DMatrix<f64>> {
    if let Some(cholesky) = matrix.clone().cholesky() {
        return Ok(cholesky.inverse());
    }
    log::warn!("kernel matrix is not positive definite; falling back to LU inversion");
    matrix.try_inverse().ok_or_else(|| {
        MnemeError::LinearAlgebra(
            "kernel matrix is singular; inversion failed (a larger eps may help)".to_string(),
        )
    })
}
