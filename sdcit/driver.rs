// ========================================================================================
//
//                       The driver: observed statistic and bootstrap null
//
// ========================================================================================
//
// 1. Match all n observations on Z and evaluate the statistic against the original
//    outcome kernel. This is the observed statistic.
// 2. Reorder K_Y by that matching. The reordered kernel describes data that satisfies
//    the null hypothesis by construction.
// 3. Penalize every pair the observed matching used, so replicates rematch differently.
// 4. Each replicate draws a sub-sample, rematches it on the penalized distances and
//    evaluates the statistic against the null-consistent kernel.
//
// Replicate `r` draws from its own generator stream derived from `(seed, r)`, so the
// null array is identical for any thread count.

use crate::config::SdcitConfig;
use crate::matching::refine_match;
use crate::penalty::penalize;
use crate::shuffle::reindex;
use crate::statistic::{Discrepancy, Mmsd};
use crate::types::{DistanceMatrix, SdcitError};
use crate::validate;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use std::time::Instant;

/// Stream counter reserved for the observed matching; replicate `r` uses `r + 1`.
const OBSERVED_STREAM: u64 = 0;

/// The result of one test run.
#[derive(Debug, Clone, PartialEq)]
pub struct SdcitOutput {
    /// The observed statistic.
    pub statistic: f64,
    /// One statistic per bootstrap replicate, indexed by replicate.
    pub null: Vec<f64>,
}

/// Counter-based seed derivation (SplitMix64).
///
/// Maps a base seed and a stream counter to a well-mixed 64-bit seed, so neighbouring
/// replicates get uncorrelated generator streams.
#[inline]
pub fn replicate_seed(base_seed: u64, counter: u64) -> u64 {
    let mut z = base_seed.wrapping_add(counter.wrapping_mul(0x9e37_79b9_7f4a_7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn stream(base_seed: u64, counter: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(replicate_seed(base_seed, counter))
}

/// Runs the test with the maximum mean self-discrepancy statistic.
pub fn compute_test(
    k_xz: ArrayView2<f64>,
    k_y: ArrayView2<f64>,
    d_z: ArrayView2<f64>,
    config: &SdcitConfig,
) -> Result<SdcitOutput, SdcitError> {
    compute_test_with(k_xz, k_y, d_z, config, &Mmsd)
}

/// Runs the test with a caller-supplied statistic.
///
/// Every configuration and input check happens before the worker pool starts; on
/// error no partial null array is produced.
pub fn compute_test_with<D: Discrepancy>(
    k_xz: ArrayView2<f64>,
    k_y: ArrayView2<f64>,
    d_z: ArrayView2<f64>,
    config: &SdcitConfig,
    statistic: &D,
) -> Result<SdcitOutput, SdcitError> {
    config.validate()?;
    let tolerance = config.symmetry_tolerance;

    let n = validate::kernel_matrix("K_XZ", k_xz, tolerance)?;
    if n == 0 {
        return Err(SdcitError::InvalidConfig(
            "at least one observation is required".to_string(),
        ));
    }
    let n_y = validate::kernel_matrix("K_Y", k_y, tolerance)?;
    validate::same_dimension("K_Y", n_y, "K_XZ", n)?;
    let distances = DistanceMatrix::with_tolerance(d_z.to_owned(), tolerance)?;
    validate::same_dimension("D_Z", distances.dim(), "K_XZ", n)?;
    let sample_size = config.null_sample_size.resolve(n)?;

    if sample_size <= 1 {
        warn!(
            "Null replicates draw {sample_size} observation(s); every replicate matching is degenerate"
        );
    }
    info!(
        "Running SDCIT on {n} observations: {} replicates of size {sample_size} on {} threads",
        config.num_bootstrap, config.n_threads
    );
    let started = Instant::now();

    // --- Observed statistic ---
    let full: Vec<usize> = (0..n).collect();
    let mut observed_rng = stream(config.seed, OBSERVED_STREAM);
    let observed = refine_match(&distances, &full, &mut observed_rng, config.max_rematch_rounds)?;
    let observed_statistic = statistic.evaluate(k_xz, k_y, &observed)?;
    debug!(
        "Observed matching: {} rounds, {} flagged pairs, statistic {observed_statistic:.6e}",
        observed.rounds,
        observed.mask.len()
    );

    // --- Null-consistent inputs shared by every replicate ---
    let k_y_null = reindex(k_y, &observed.permutation)?;
    let mut used = observed.mask.clone();
    used.extend_from_permutation(&observed.permutation);
    let null_distances = penalize(&distances, &used)?;

    let replicates = Replicates {
        k_xz: k_xz.view(),
        k_y_null: &k_y_null,
        distances: &null_distances,
        sample_size,
        seed: config.seed,
        max_rounds: config.max_rematch_rounds,
    };

    // --- Bootstrap null ---
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.n_threads)
        .build()?;
    let b = config.num_bootstrap;
    let chunk_len = b.div_ceil(config.n_threads);
    let mut null = vec![0.0; b];
    pool.install(|| {
        null.par_chunks_mut(chunk_len)
            .enumerate()
            .try_for_each(|(chunk, slots)| {
                let first = chunk * chunk_len;
                for (offset, slot) in slots.iter_mut().enumerate() {
                    *slot = replicates.run(first + offset, statistic)?;
                }
                Ok::<(), SdcitError>(())
            })
    })?;

    info!(
        "SDCIT finished in {:.2?}: statistic {observed_statistic:.6e}, null mean {:.6e}",
        started.elapsed(),
        null.iter().sum::<f64>() / b as f64
    );

    Ok(SdcitOutput {
        statistic: observed_statistic,
        null,
    })
}

/// Read-only state shared by every bootstrap replicate.
struct Replicates<'a> {
    k_xz: ArrayView2<'a, f64>,
    k_y_null: &'a Array2<f64>,
    distances: &'a DistanceMatrix,
    sample_size: usize,
    seed: u64,
    max_rounds: usize,
}

impl Replicates<'_> {
    fn run<D: Discrepancy>(&self, index: usize, statistic: &D) -> Result<f64, SdcitError> {
        let mut rng = stream(self.seed, index as u64 + 1);
        let sample =
            rand::seq::index::sample(&mut rng, self.distances.dim(), self.sample_size).into_vec();
        let matching = refine_match(self.distances, &sample, &mut rng, self.max_rounds)?;
        statistic.evaluate(self.k_xz, self.k_y_null.view(), &matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NullSampleSize;
    use crate::types::Matching;
    use std::sync::Mutex;

    /// Evaluates MMSD and keeps every matching it was handed, observed one first.
    #[derive(Default)]
    struct Recording {
        matchings: Mutex<Vec<Matching>>,
    }

    impl Discrepancy for Recording {
        fn evaluate(
            &self,
            k_xz: ArrayView2<f64>,
            k_y: ArrayView2<f64>,
            matching: &Matching,
        ) -> Result<f64, SdcitError> {
            self.matchings.lock().unwrap().push(matching.clone());
            Mmsd.evaluate(k_xz, k_y, matching)
        }
    }

    fn gaussian_kernel(points: &[f64], bandwidth: f64) -> Array2<f64> {
        let n = points.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            let d = points[i] - points[j];
            (-d * d / (2.0 * bandwidth * bandwidth)).exp()
        })
    }

    fn abs_distances(points: &[f64]) -> Array2<f64> {
        let n = points.len();
        Array2::from_shape_fn((n, n), |(i, j)| (points[i] - points[j]).abs())
    }

    fn small_problem() -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let z: Vec<f64> = (0..16).map(|k| (k as f64 * 0.71).cos()).collect();
        let x: Vec<f64> = (0..16).map(|k| (k as f64 * 1.3).sin() + z[k]).collect();
        let y: Vec<f64> = (0..16).map(|k| (k as f64 * 0.4).cos() - z[k]).collect();
        let k_xz = &gaussian_kernel(&x, 1.0) * &gaussian_kernel(&z, 1.0);
        (k_xz, gaussian_kernel(&y, 1.0), abs_distances(&z))
    }

    #[test]
    fn seeds_differ_per_counter() {
        let seeds: Vec<u64> = (0..8).map(|c| replicate_seed(42, c)).collect();
        for (a, seed) in seeds.iter().enumerate() {
            assert!(seeds[a + 1..].iter().all(|other| other != seed));
        }
        assert_eq!(replicate_seed(42, 3), replicate_seed(42, 3));
    }

    #[test]
    fn null_has_exactly_b_entries() {
        let (k_xz, k_y, d_z) = small_problem();
        for b in [1, 7, 32] {
            let config = SdcitConfig::new(b, 5, 3);
            let out = compute_test(k_xz.view(), k_y.view(), d_z.view(), &config).unwrap();
            assert_eq!(out.null.len(), b);
            assert!(out.null.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn thread_count_does_not_change_the_result() {
        let (k_xz, k_y, d_z) = small_problem();
        let single = compute_test(
            k_xz.view(),
            k_y.view(),
            d_z.view(),
            &SdcitConfig::new(20, 9, 1),
        )
        .unwrap();
        let many = compute_test(
            k_xz.view(),
            k_y.view(),
            d_z.view(),
            &SdcitConfig::new(20, 9, 4),
        )
        .unwrap();
        assert_eq!(single, many);
    }

    #[test]
    fn different_seeds_give_different_nulls() {
        let (k_xz, k_y, d_z) = small_problem();
        let a = compute_test(k_xz.view(), k_y.view(), d_z.view(), &SdcitConfig::new(20, 1, 2))
            .unwrap();
        let b = compute_test(k_xz.view(), k_y.view(), d_z.view(), &SdcitConfig::new(20, 2, 2))
            .unwrap();
        assert_ne!(a.null, b.null);
    }

    #[test]
    fn configuration_errors_are_raised_before_work() {
        let (k_xz, k_y, d_z) = small_problem();
        for config in [
            SdcitConfig::new(0, 1, 1),
            SdcitConfig::new(10, 1, 0),
            SdcitConfig::new(10, 1, 1).with_null_sample_size(NullSampleSize::Fixed(17)),
            SdcitConfig::new(10, 1, 1).with_max_rematch_rounds(0),
        ] {
            assert!(matches!(
                compute_test(k_xz.view(), k_y.view(), d_z.view(), &config),
                Err(SdcitError::InvalidConfig(_))
            ));
        }

        let empty = Array2::<f64>::zeros((0, 0));
        assert!(matches!(
            compute_test(empty.view(), empty.view(), empty.view(), &SdcitConfig::new(4, 1, 1)),
            Err(SdcitError::InvalidConfig(_))
        ));
    }

    #[test]
    fn input_errors_are_raised_before_work() {
        let (k_xz, k_y, d_z) = small_problem();
        let config = SdcitConfig::new(4, 1, 1);

        let smaller = Array2::<f64>::eye(15);
        assert!(matches!(
            compute_test(k_xz.view(), smaller.view(), d_z.view(), &config),
            Err(SdcitError::InvalidInput(_))
        ));

        let mut asymmetric = d_z.clone();
        asymmetric[[0, 1]] += 1.0;
        assert!(matches!(
            compute_test(k_xz.view(), k_y.view(), asymmetric.view(), &config),
            Err(SdcitError::InvalidInput(_))
        ));
    }

    #[test]
    fn replicates_only_reuse_observed_pairs_when_flagged() {
        // Uneven gaps on a line give every point a unique nearest neighbour.
        let z: Vec<f64> = (0..20).map(|k| (k as f64).powf(1.5)).collect();
        let k_z = gaussian_kernel(&z, 4.0);
        let d_z = abs_distances(&z);
        let config = SdcitConfig::new(24, 3, 2).with_null_sample_size(NullSampleSize::Full);
        let recording = Recording::default();

        let out = compute_test_with(k_z.view(), k_z.view(), d_z.view(), &config, &recording)
            .unwrap();
        assert_eq!(out.null.len(), 24);

        let matchings = recording.matchings.into_inner().unwrap();
        assert_eq!(matchings.len(), 25);
        let observed = &matchings[0];
        assert_eq!(observed.permutation.len(), 20);
        let observed_pairs: Vec<(usize, usize)> = observed
            .permutation
            .pairs()
            .filter(|&(from, to)| from != to)
            .collect();
        assert!(!observed_pairs.is_empty());

        for replicate in &matchings[1..] {
            for (from, to) in replicate.permutation.pairs() {
                if from != to && observed_pairs.contains(&(from, to)) {
                    assert!(
                        replicate.mask.contains(from, to),
                        "observed pair ({from}, {to}) reused without being flagged"
                    );
                }
            }
        }
    }

    #[test]
    fn symmetry_tolerance_comes_from_the_config() {
        let (k_xz, k_y, d_z) = small_problem();
        let mut nearly = d_z.clone();
        nearly[[0, 1]] += 1e-6;

        let strict = SdcitConfig::new(4, 1, 1);
        assert!(matches!(
            compute_test(k_xz.view(), k_y.view(), nearly.view(), &strict),
            Err(SdcitError::InvalidInput(_))
        ));
        let loose = strict.with_symmetry_tolerance(1e-4);
        let out = compute_test(k_xz.view(), k_y.view(), nearly.view(), &loose).unwrap();
        assert_eq!(out.null.len(), 4);
    }

    #[test]
    fn single_observation_is_degenerate_but_valid() {
        let one = Array2::from_elem((1, 1), 1.0);
        let zero = Array2::zeros((1, 1));
        let out = compute_test(one.view(), one.view(), zero.view(), &SdcitConfig::new(3, 0, 1))
            .unwrap();
        assert_eq!(out.statistic, 0.0);
        assert_eq!(out.null, vec![0.0; 3]);
    }
}
