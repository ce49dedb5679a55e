use crate::types::SdcitError;
use crate::validate::DEFAULT_SYMMETRY_TOLERANCE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_NUM_BOOTSTRAP: usize = 1_000;
pub const DEFAULT_MAX_REMATCH_ROUNDS: usize = 8;

/// How many observations each bootstrap replicate draws before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullSampleSize {
    /// Half of the observations, but never fewer than two when two are available.
    Half,
    /// Every observation.
    Full,
    /// A fixed number of observations, between 1 and n.
    Fixed(usize),
}

impl NullSampleSize {
    /// Resolves the sample size for `n` observations.
    pub fn resolve(self, n: usize) -> Result<usize, SdcitError> {
        match self {
            Self::Half => Ok((n / 2).max(2).min(n)),
            Self::Full => Ok(n),
            Self::Fixed(size) if size >= 1 && size <= n => Ok(size),
            Self::Fixed(size) => Err(SdcitError::InvalidConfig(format!(
                "null sample size {size} must lie between 1 and the number of observations ({n})"
            ))),
        }
    }
}

/// Parameters of one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdcitConfig {
    /// Number of bootstrap replicates `b`; the null array has exactly this length.
    pub num_bootstrap: usize,
    pub seed: u64,
    /// Size of the worker pool that evaluates the replicates.
    pub n_threads: usize,
    pub null_sample_size: NullSampleSize,
    /// Upper bound on match/penalize rounds per matching before the last round is accepted.
    pub max_rematch_rounds: usize,
    pub symmetry_tolerance: f64,
}

impl Default for SdcitConfig {
    fn default() -> Self {
        Self {
            num_bootstrap: DEFAULT_NUM_BOOTSTRAP,
            seed: 0,
            n_threads: num_cpus::get().max(1),
            null_sample_size: NullSampleSize::Half,
            max_rematch_rounds: DEFAULT_MAX_REMATCH_ROUNDS,
            symmetry_tolerance: DEFAULT_SYMMETRY_TOLERANCE,
        }
    }
}

/// Errors raised while reading or writing a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Configuration was parsed but is not usable: {0}")]
    Invalid(#[from] SdcitError),
}

impl SdcitConfig {
    pub fn new(num_bootstrap: usize, seed: u64, n_threads: usize) -> Self {
        Self {
            num_bootstrap,
            seed,
            n_threads,
            ..Self::default()
        }
    }

    pub fn with_null_sample_size(mut self, size: NullSampleSize) -> Self {
        self.null_sample_size = size;
        self
    }

    pub fn with_max_rematch_rounds(mut self, rounds: usize) -> Self {
        self.max_rematch_rounds = rounds;
        self
    }

    pub fn with_symmetry_tolerance(mut self, tolerance: f64) -> Self {
        self.symmetry_tolerance = tolerance;
        self
    }

    /// Rejects settings that cannot describe a run. Checks that depend on the number
    /// of observations happen later, once the matrices are known.
    pub fn validate(&self) -> Result<(), SdcitError> {
        if self.num_bootstrap == 0 {
            return Err(SdcitError::InvalidConfig(
                "num_bootstrap must be positive".to_string(),
            ));
        }
        if self.n_threads == 0 {
            return Err(SdcitError::InvalidConfig(
                "n_threads must be positive".to_string(),
            ));
        }
        if self.max_rematch_rounds == 0 {
            return Err(SdcitError::InvalidConfig(
                "max_rematch_rounds must be positive".to_string(),
            ));
        }
        if !(self.symmetry_tolerance.is_finite() && self.symmetry_tolerance >= 0.0) {
            return Err(SdcitError::InvalidConfig(format!(
                "symmetry_tolerance must be a non-negative number, got {}",
                self.symmetry_tolerance
            )));
        }
        if let NullSampleSize::Fixed(0) = self.null_sample_size {
            return Err(SdcitError::InvalidConfig(
                "a fixed null sample size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
