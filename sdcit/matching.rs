// ========================================================================================
//
//                  Z-preserving rematching of observations on the conditioning variable
//
// ========================================================================================
//
// A matching pairs every sampled observation with its nearest still-unpaired neighbour
// on Z and swaps the two. The swap is what lets the outcome of one observation stand
// in for the outcome of another that shares (approximately) the same Z.
//
// Matches that could not honour the nearest-neighbour criterion are flagged in the
// mask: an observation left without a partner is matched to itself, and a pair that
// sits at a penalized distance is a reuse of a pair an earlier round already consumed.
// `refine_match` drives the match -> penalize -> rematch loop until no resolvable
// collision remains.

use crate::penalty::penalize;
use crate::types::{DistanceMatrix, Mask, Matching, Permutation, SdcitError};
use crate::validate;
use rand::Rng;
use rand::seq::SliceRandom;
use std::borrow::Cow;

/// Matches the indices of `sample` in one greedy randomized pass.
///
/// Sample positions are visited in an order shuffled by `rng`. Each still-unpaired
/// index takes the unpaired index at minimal distance as its partner, breaking ties
/// uniformly at random, and the two are swapped. The result is therefore an
/// involution on the sample. With an odd sample the last unpaired index is matched to
/// itself; that self pair, and every pair at a penalized distance, is recorded in the
/// mask.
///
/// The only side effect is advancing `rng`: identical generator state and inputs give
/// an identical matching.
pub fn generate_match<R: Rng + ?Sized>(
    distances: &DistanceMatrix,
    sample: &[usize],
    rng: &mut R,
) -> Result<Matching, SdcitError> {
    validate::sample(sample, distances.dim())?;
    Ok(match_sample(distances, sample, rng, 1))
}

fn match_sample<R: Rng + ?Sized>(
    distances: &DistanceMatrix,
    sample: &[usize],
    rng: &mut R,
    round: usize,
) -> Matching {
    let m = sample.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.shuffle(rng);

    // Positions into `sample`, not observation indices.
    let mut partner: Vec<Option<usize>> = vec![None; m];
    let mut nearest: Vec<usize> = Vec::with_capacity(m);
    let mut mask = Mask::new();

    for &p in &order {
        if partner[p].is_some() {
            continue;
        }
        let i = sample[p];

        nearest.clear();
        let mut best = f64::INFINITY;
        for (q, &j) in sample.iter().enumerate() {
            if q == p || partner[q].is_some() {
                continue;
            }
            let d = distances.get(i, j);
            if d < best {
                best = d;
                nearest.clear();
                nearest.push(q);
            } else if d == best {
                nearest.push(q);
            }
        }

        let q = match nearest.len() {
            0 => {
                partner[p] = Some(p);
                mask.insert(i, i);
                continue;
            }
            1 => nearest[0],
            ties => nearest[rng.gen_range(0..ties)],
        };

        partner[p] = Some(q);
        partner[q] = Some(p);
        let j = sample[q];
        if distances.is_penalized(i, j) {
            mask.insert_symmetric(i, j);
        }
    }

    let images = partner
        .iter()
        .enumerate()
        .map(|(p, q)| sample[q.unwrap_or(p)])
        .collect();

    if m == 1 {
        log::warn!(
            "Sample of one observation ({}) can only be matched to itself; flagged in the mask",
            sample[0]
        );
    }

    Matching {
        permutation: Permutation::from_parts(sample.to_vec(), images),
        mask,
        rounds: round,
    }
}

/// States of the iterative refinement of a matching.
#[derive(Debug)]
pub enum MatchState<'a> {
    /// About to run matching round `round` (1-based) on `distances`.
    Matching {
        distances: Cow<'a, DistanceMatrix>,
        round: usize,
    },
    /// The last round flagged reused pairs; they are penalized before rematching.
    Penalizing {
        distances: Cow<'a, DistanceMatrix>,
        matching: Matching,
    },
    /// Terminal state holding the accepted matching.
    Converged(Matching),
}

impl<'a> MatchState<'a> {
    pub fn start(distances: &'a DistanceMatrix) -> Self {
        Self::Matching {
            distances: Cow::Borrowed(distances),
            round: 1,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }

    /// Advances the machine by one transition.
    ///
    /// A round whose mask holds only self pairs converges, since penalization cannot
    /// remove those. Once `max_rounds` rounds have run, the last matching is accepted
    /// as is.
    pub fn step<R: Rng + ?Sized>(
        self,
        sample: &[usize],
        rng: &mut R,
        max_rounds: usize,
    ) -> Result<Self, SdcitError> {
        match self {
            Self::Matching { distances, round } => {
                validate::sample(sample, distances.dim())?;
                let matching = match_sample(&distances, sample, rng, round);
                if !matching.mask.has_off_diagonal() {
                    return Ok(Self::Converged(matching));
                }
                if round >= max_rounds {
                    log::debug!(
                        "Accepting matching after {round} rounds with {} flagged pairs",
                        matching.mask.len()
                    );
                    return Ok(Self::Converged(matching));
                }
                Ok(Self::Penalizing {
                    distances,
                    matching,
                })
            }
            Self::Penalizing {
                distances,
                matching,
            } => {
                log::trace!(
                    "Round {} reused {} pairs; penalizing and rematching",
                    matching.rounds,
                    matching.mask.iter().filter(|(i, j)| i != j).count() / 2
                );
                let penalized = penalize(&distances, &matching.mask)?;
                Ok(Self::Matching {
                    distances: Cow::Owned(penalized),
                    round: matching.rounds + 1,
                })
            }
            converged @ Self::Converged(_) => Ok(converged),
        }
    }
}

/// Matches `sample`, penalizing and rematching while rounds reuse penalized pairs, for
/// at most `max_rounds` rounds.
pub fn refine_match<R: Rng + ?Sized>(
    distances: &DistanceMatrix,
    sample: &[usize],
    rng: &mut R,
    max_rounds: usize,
) -> Result<Matching, SdcitError> {
    if max_rounds == 0 {
        return Err(SdcitError::InvalidConfig(
            "max_rematch_rounds must be positive".to_string(),
        ));
    }
    let mut state = MatchState::start(distances);
    loop {
        state = match state {
            MatchState::Converged(matching) => return Ok(matching),
            pending => pending.step(sample, rng, max_rounds)?,
        };
    }
}
