use crate::shuffle::reindex;
use crate::types::{Matching, SdcitError};
use crate::validate;
use ndarray::ArrayView2;

/// A discrepancy between the observed sample and its Z-rematched counterpart.
///
/// Implementations must be deterministic functions of their inputs; the driver calls
/// them concurrently from several worker threads.
pub trait Discrepancy: Sync {
    fn evaluate(
        &self,
        k_xz: ArrayView2<f64>,
        k_y: ArrayView2<f64>,
        matching: &Matching,
    ) -> Result<f64, SdcitError>;
}

/// Maximum mean self-discrepancy.
///
/// For a matching π over a sample S, let `K_Y' = reindex(K_Y, π)`. The statistic is
/// the average, over ordered pairs `(i, j)` of S with `i != j` and `j != π(i)`, of
///
/// ```text
/// K_XZ[i, j] * (K_Y[i, j] + K_Y'[i, j] - K_Y[i, π(j)] - K_Y[π(i), j])
/// ```
///
/// which is the MMD between the samples (X, Z, Y) and (X, Z, Y∘π) under the product
/// kernel, restricted to pairs that do not compare an observation with itself or with
/// its own match. Without any such pair the statistic is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mmsd;

impl Discrepancy for Mmsd {
    fn evaluate(
        &self,
        k_xz: ArrayView2<f64>,
        k_y: ArrayView2<f64>,
        matching: &Matching,
    ) -> Result<f64, SdcitError> {
        let n = validate::square("K_XZ", k_xz)?;
        validate::same_dimension("K_Y", validate::square("K_Y", k_y)?, "K_XZ", n)?;
        let k_y_matched = reindex(k_y, &matching.permutation)?;

        let domain = matching.permutation.domain();
        let images = matching.permutation.images();
        let mut total = 0.0;
        let mut count = 0_usize;
        for (&i, &pi) in domain.iter().zip(images) {
            for (&j, &pj) in domain.iter().zip(images) {
                if i == j || j == pi {
                    continue;
                }
                total += k_xz[[i, j]]
                    * (k_y[[i, j]] + k_y_matched[[i, j]] - k_y[[i, pj]] - k_y[[pi, j]]);
                count += 1;
            }
        }

        if count == 0 {
            return Ok(0.0);
        }
        Ok(total / count as f64)
    }
}
