// ========================================================================================
//                        Data contracts shared by the test components
// ========================================================================================

// Only types used by more than one module live here.

use crate::validate;
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeSet;
use thiserror::Error;

/// The single error type surfaced by every entry point of the crate.
#[derive(Error, Debug)]
pub enum SdcitError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// ========================================================================================
//                                  Distance matrix
// ========================================================================================

/// A validated n×n distance matrix on the conditioning variable.
///
/// Besides the values, the matrix remembers the *penalty floor*: the smallest value
/// any penalized entry can hold. Every entry at or above the floor is a pair that an
/// earlier matching round already used, and every entry below it is an original
/// distance. A matrix that has never been penalized has no floor.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    values: Array2<f64>,
    penalty_floor: Option<f64>,
}

impl DistanceMatrix {
    /// Validates and wraps an owned matrix. The matrix must be square, finite,
    /// non-negative and symmetric up to the default tolerance.
    pub fn new(values: Array2<f64>) -> Result<Self, SdcitError> {
        Self::with_tolerance(values, validate::DEFAULT_SYMMETRY_TOLERANCE)
    }

    pub fn with_tolerance(values: Array2<f64>, tolerance: f64) -> Result<Self, SdcitError> {
        validate::distance_matrix("D_Z", values.view(), tolerance)?;
        Ok(Self {
            values,
            penalty_floor: None,
        })
    }

    pub fn from_view(values: ArrayView2<f64>) -> Result<Self, SdcitError> {
        Self::new(values.to_owned())
    }

    /// Assembles a matrix that has already been checked by the caller.
    pub(crate) fn from_parts(values: Array2<f64>, penalty_floor: Option<f64>) -> Self {
        Self {
            values,
            penalty_floor,
        }
    }

    /// The number of observations `n`.
    #[inline]
    pub fn dim(&self) -> usize {
        self.values.nrows()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn penalty_floor(&self) -> Option<f64> {
        self.penalty_floor
    }

    /// True when the off-diagonal pair (i, j) carries a penalty from an earlier round.
    #[inline]
    pub fn is_penalized(&self, i: usize, j: usize) -> bool {
        i != j
            && self
                .penalty_floor
                .is_some_and(|floor| self.values[[i, j]] >= floor)
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.values
    }
}

// ========================================================================================
//                                    Permutation
// ========================================================================================

/// A bijection on a set of observation indices.
///
/// `domain[k]` is sent to `images[k]`. Indices outside the domain are fixed points,
/// which is how a permutation over a sub-sample acts on the full index range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    domain: Vec<usize>,
    images: Vec<usize>,
}

impl Permutation {
    pub fn identity(n: usize) -> Self {
        Self {
            domain: (0..n).collect(),
            images: (0..n).collect(),
        }
    }

    /// Builds a permutation over `0..images.len()` sending `k` to `images[k]`.
    pub fn from_images(images: Vec<usize>) -> Result<Self, SdcitError> {
        let domain = (0..images.len()).collect();
        Self::new(domain, images)
    }

    /// Builds a permutation sending `domain[k]` to `images[k]`. The domain must not
    /// repeat an index and the images must be a rearrangement of the domain.
    pub fn new(domain: Vec<usize>, images: Vec<usize>) -> Result<Self, SdcitError> {
        if domain.len() != images.len() {
            return Err(SdcitError::InvalidInput(format!(
                "permutation domain has {} entries but {} images were given",
                domain.len(),
                images.len()
            )));
        }
        let mut sorted_domain = domain.clone();
        sorted_domain.sort_unstable();
        if sorted_domain.windows(2).any(|w| w[0] == w[1]) {
            return Err(SdcitError::InvalidInput(
                "permutation domain contains a repeated index".to_string(),
            ));
        }
        let mut sorted_images = images.clone();
        sorted_images.sort_unstable();
        if sorted_images != sorted_domain {
            return Err(SdcitError::InvalidInput(
                "permutation images are not a rearrangement of its domain".to_string(),
            ));
        }
        Ok(Self { domain, images })
    }

    pub(crate) fn from_parts(domain: Vec<usize>, images: Vec<usize>) -> Self {
        debug_assert_eq!(domain.len(), images.len());
        Self { domain, images }
    }

    pub fn domain(&self) -> &[usize] {
        &self.domain
    }

    pub fn images(&self) -> &[usize] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.domain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }

    /// Iterates `(index, image)` pairs in domain order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.domain.iter().copied().zip(self.images.iter().copied())
    }

    pub fn inverse(&self) -> Self {
        Self {
            domain: self.images.clone(),
            images: self.domain.clone(),
        }
    }

    /// Largest index mentioned by the permutation, if any.
    pub fn max_index(&self) -> Option<usize> {
        self.domain.iter().copied().max()
    }

    /// Expands the permutation to a lookup table over `0..n`, with fixed points
    /// outside the domain. The caller guarantees every index is below `n`.
    pub fn to_full(&self, n: usize) -> Vec<usize> {
        let mut full: Vec<usize> = (0..n).collect();
        for (from, to) in self.pairs() {
            full[from] = to;
        }
        full
    }
}

// ========================================================================================
//                                        Mask
// ========================================================================================

/// Ordered index pairs flagged by a matching round.
///
/// A pair `(i, i)` marks an index that had to be matched to itself. A pair `(i, j)`
/// with `i != j` marks a match that reused an already-penalized pair; the generator
/// records such pairs in both orientations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mask {
    pairs: BTreeSet<(usize, usize)>,
}

impl Mask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, i: usize, j: usize) -> bool {
        self.pairs.insert((i, j))
    }

    pub fn insert_symmetric(&mut self, i: usize, j: usize) {
        self.pairs.insert((i, j));
        self.pairs.insert((j, i));
    }

    pub fn contains(&self, i: usize, j: usize) -> bool {
        self.pairs.contains(&(i, j))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pairs.iter().copied()
    }

    /// True when at least one flagged pair can be resolved by penalization.
    pub fn has_off_diagonal(&self) -> bool {
        self.pairs.iter().any(|&(i, j)| i != j)
    }

    /// Indices that were matched to themselves.
    pub fn self_matches(&self) -> impl Iterator<Item = usize> + '_ {
        self.pairs
            .iter()
            .filter(|(i, j)| i == j)
            .map(|&(i, _)| i)
    }

    /// Flags every non-trivial pair `(i, σ(i))` of a permutation, in both orientations.
    pub fn extend_from_permutation(&mut self, permutation: &Permutation) {
        for (from, to) in permutation.pairs() {
            if from != to {
                self.insert_symmetric(from, to);
            }
        }
    }
}

impl FromIterator<(usize, usize)> for Mask {
    fn from_iter<T: IntoIterator<Item = (usize, usize)>>(iter: T) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

// ========================================================================================
//                                      Matching
// ========================================================================================

/// The accepted outcome of matching a sample on the conditioning variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matching {
    pub permutation: Permutation,
    pub mask: Mask,
    /// Number of matching rounds run before this matching was accepted.
    pub rounds: usize,
}

impl Matching {
    /// A sample of one (or none) cannot be rematched to anything but itself.
    pub fn is_degenerate(&self) -> bool {
        self.permutation.len() <= 1
    }

    /// The index standing in for `index` under the matching, if `index` was sampled.
    pub fn partner_of(&self, index: usize) -> Option<usize> {
        self.permutation
            .pairs()
            .find(|&(from, _)| from == index)
            .map(|(_, to)| to)
    }
}
