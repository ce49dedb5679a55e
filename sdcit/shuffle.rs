use crate::types::{Permutation, SdcitError};
use crate::validate;
use ndarray::{Array2, ArrayView2};

/// Reorders the rows and columns of a square matrix by the same permutation σ:
/// `out[a, b] = matrix[σ(a), σ(b)]`, where σ fixes every index outside the
/// permutation's domain.
///
/// Applied to K_Y with a Z-matching, this yields the kernel of the outcome "as if
/// drawn independently of X given Z". The input is never modified.
pub fn reindex(matrix: ArrayView2<f64>, permutation: &Permutation) -> Result<Array2<f64>, SdcitError> {
    let n = validate::square("matrix", matrix)?;
    if let Some(max) = permutation.max_index().filter(|&max| max >= n) {
        return Err(SdcitError::InvalidInput(format!(
            "permutation index {max} is out of range for a {n}x{n} matrix"
        )));
    }
    let sigma = permutation.to_full(n);
    Ok(Array2::from_shape_fn((n, n), |(a, b)| matrix[[sigma[a], sigma[b]]]))
}
