// ========================================================================================
//
//                 Input preparation: combining and converting kernel matrices
//
// ========================================================================================
//
// The test itself consumes K_XZ, K_Y and D_Z. Callers usually hold one kernel per
// variable, so these helpers build the joint kernel on (X, Z) and the distance on Z
// from those. Kernel *choice* stays with the caller.

use crate::types::SdcitError;
use crate::validate;
use ndarray::{Array2, ArrayView2, Zip};

/// The product kernel on (X, Z): the element-wise product `K_X ∘ K_Z`.
pub fn joint_kernel(k_x: ArrayView2<f64>, k_z: ArrayView2<f64>) -> Result<Array2<f64>, SdcitError> {
    let n = validate::square("K_X", k_x)?;
    let m = validate::square("K_Z", k_z)?;
    validate::same_dimension("K_Z", m, "K_X", n)?;
    Ok(&k_x * &k_z)
}

/// The distance induced by a kernel in its feature space,
/// `d(i, j) = sqrt(K[i,i] + K[j,j] - 2 K[i,j])`, clipped at zero so rounding noise on
/// near-duplicate observations cannot produce a negative radicand.
pub fn kernel_to_distance(kernel: ArrayView2<f64>) -> Result<Array2<f64>, SdcitError> {
    let n = validate::kernel_matrix("K_Z", kernel, validate::DEFAULT_SYMMETRY_TOLERANCE)?;
    let diagonal = kernel.diag();
    let mut distances = Array2::<f64>::zeros((n, n));
    Zip::indexed(&mut distances)
        .and(&kernel)
        .for_each(|(i, j), out, &k_ij| {
            if i != j {
                *out = (diagonal[i] + diagonal[j] - 2.0 * k_ij).max(0.0).sqrt();
            }
        });
    Ok(distances)
}
