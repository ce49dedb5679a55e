// ========================================================================================
//
//                      Entry-point checks for caller-supplied data
//
// ========================================================================================
//
// Every public operation runs its inputs through these checks before doing any work,
// so a malformed matrix or index list surfaces as `SdcitError::InvalidInput` instead
// of an out-of-bounds panic deep inside a worker thread.

use crate::types::SdcitError;
use ndarray::ArrayView2;

/// Relative tolerance used when comparing `M[i, j]` against `M[j, i]`.
pub const DEFAULT_SYMMETRY_TOLERANCE: f64 = 1.0e-8;

#[inline]
fn nearly_equal(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * (1.0 + a.abs().max(b.abs()))
}

/// Checks that `matrix` is square and returns its dimension.
pub fn square(name: &str, matrix: ArrayView2<f64>) -> Result<usize, SdcitError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(SdcitError::InvalidInput(format!(
            "{name} must be square, but has shape {rows}x{cols}"
        )));
    }
    Ok(rows)
}

/// Checks a kernel matrix: square, finite and symmetric.
pub fn kernel_matrix(
    name: &str,
    matrix: ArrayView2<f64>,
    tolerance: f64,
) -> Result<usize, SdcitError> {
    let n = square(name, matrix)?;
    for i in 0..n {
        for j in 0..n {
            let value = matrix[[i, j]];
            if !value.is_finite() {
                return Err(SdcitError::InvalidInput(format!(
                    "{name} has a non-finite entry at ({i}, {j})"
                )));
            }
            if j > i && !nearly_equal(value, matrix[[j, i]], tolerance) {
                return Err(SdcitError::InvalidInput(format!(
                    "{name} is not symmetric: entry ({i}, {j}) = {value} but ({j}, {i}) = {}",
                    matrix[[j, i]]
                )));
            }
        }
    }
    Ok(n)
}

/// Checks a distance matrix: everything a kernel matrix needs, plus non-negativity.
pub fn distance_matrix(
    name: &str,
    matrix: ArrayView2<f64>,
    tolerance: f64,
) -> Result<usize, SdcitError> {
    let n = kernel_matrix(name, matrix, tolerance)?;
    if let Some(((i, j), value)) = matrix.indexed_iter().find(|(_, v)| **v < 0.0) {
        return Err(SdcitError::InvalidInput(format!(
            "{name} has a negative distance {value} at ({i}, {j})"
        )));
    }
    Ok(n)
}

/// Checks that two matrices describe the same number of observations.
pub fn same_dimension(
    name: &str,
    found: usize,
    expected_name: &str,
    expected: usize,
) -> Result<(), SdcitError> {
    if found != expected {
        return Err(SdcitError::InvalidInput(format!(
            "{name} is {found}x{found} but {expected_name} is {expected}x{expected}"
        )));
    }
    Ok(())
}

/// Checks that every sample index lies in `0..n` and that no index repeats.
pub fn sample(indices: &[usize], n: usize) -> Result<(), SdcitError> {
    let mut seen = vec![false; n];
    for &index in indices {
        if index >= n {
            return Err(SdcitError::InvalidInput(format!(
                "sample index {index} is out of range for {n} observations"
            )));
        }
        if std::mem::replace(&mut seen[index], true) {
            return Err(SdcitError::InvalidInput(format!(
                "sample index {index} appears more than once"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn rejects_rectangular_matrices() {
        let m = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            square("K_Y", m.view()),
            Err(SdcitError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_asymmetric_kernel() {
        let m = array![[1.0, 0.5], [0.4, 1.0]];
        let err = kernel_matrix("K_XZ", m.view(), DEFAULT_SYMMETRY_TOLERANCE).unwrap_err();
        assert!(err.to_string().contains("not symmetric"));
    }

    #[test]
    fn tolerates_rounding_noise() {
        let m = array![[1.0, 0.5], [0.5 + 1e-13, 1.0]];
        assert_eq!(
            kernel_matrix("K_XZ", m.view(), DEFAULT_SYMMETRY_TOLERANCE).unwrap(),
            2
        );
    }

    #[test]
    fn rejects_non_finite_and_negative_entries() {
        let nan = array![[0.0, f64::NAN], [f64::NAN, 0.0]];
        assert!(kernel_matrix("K_Y", nan.view(), DEFAULT_SYMMETRY_TOLERANCE).is_err());

        let negative = array![[0.0, -1.0], [-1.0, 0.0]];
        let err = distance_matrix("D_Z", negative.view(), DEFAULT_SYMMETRY_TOLERANCE).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn sample_checks_range_and_duplicates() {
        assert!(sample(&[0, 2, 1], 3).is_ok());
        assert!(sample(&[0, 3], 3).is_err());
        assert!(sample(&[1, 1], 3).is_err());
    }
}
