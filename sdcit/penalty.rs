use crate::types::{DistanceMatrix, Mask, SdcitError};

/// Penalty added when the matrix carries no distance information at all.
const ZERO_MATRIX_PENALTY: f64 = 1.0;

/// Returns a copy of `distances` in which every off-diagonal pair of `mask` is pushed
/// out of reach of the nearest-neighbor search.
///
/// The penalty is twice the largest entry of the input, so a penalized pair is always
/// strictly farther than any untouched pair. Penalizing an already-penalized matrix
/// derives the penalty from its (larger) maximum, which lets repeated collisions
/// escalate. Both `(i, j)` and `(j, i)` are raised so the result stays symmetric;
/// the diagonal is never touched.
///
/// The resulting matrix records the penalty floor, i.e. the smallest value a penalized
/// entry can take, which is how later matching rounds recognise a reused pair.
pub fn penalize(distances: &DistanceMatrix, mask: &Mask) -> Result<DistanceMatrix, SdcitError> {
    let n = distances.dim();
    if let Some((i, j)) = mask.iter().find(|&(i, j)| i >= n || j >= n) {
        return Err(SdcitError::InvalidInput(format!(
            "mask pair ({i}, {j}) is out of range for {n} observations"
        )));
    }

    let values = distances.values();
    let max_entry = values.iter().copied().fold(0.0_f64, f64::max);
    let penalty = if max_entry > 0.0 {
        2.0 * max_entry
    } else {
        ZERO_MATRIX_PENALTY
    };

    let mut penalized = values.to_owned();
    // A pair flagged in both orientations is raised once.
    for (i, j) in mask
        .iter()
        .filter(|&(i, j)| i < j || (i > j && !mask.contains(j, i)))
    {
        penalized[[i, j]] += penalty;
        penalized[[j, i]] += penalty;
    }

    // The first penalty fixes the floor; later, larger penalties stay above it.
    let floor = distances.penalty_floor().unwrap_or(penalty);
    Ok(DistanceMatrix::from_parts(penalized, Some(floor)))
}
