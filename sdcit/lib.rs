#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod driver;
pub mod kernel;
pub mod matching;
pub mod penalty;
pub mod shuffle;
pub mod statistic;
pub mod types;
pub mod validate;

pub use config::{ConfigError, NullSampleSize, SdcitConfig};
pub use driver::{SdcitOutput, compute_test, compute_test_with, replicate_seed};
pub use kernel::{joint_kernel, kernel_to_distance};
pub use matching::{MatchState, generate_match, refine_match};
pub use penalty::penalize;
pub use shuffle::reindex;
pub use statistic::{Discrepancy, Mmsd};
pub use types::{DistanceMatrix, Mask, Matching, Permutation, SdcitError};
