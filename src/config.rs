//! Run configuration: the raw, user-facing [`Configuration`] and the validated [`Settings`]
//! that the engine actually runs with.

use crate::cache::{CachingMethod, EvictionMethod};
use crate::candidate::LaunchPadOrder;
use crate::error::{ProfilingError, Result};
use std::str::FromStr;

/// The error measures a dependency strategy can be built for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorMeasure {
    /// The g1' measure: the fraction of all row pairs that violate the dependency.
    G1Prime,
}

impl ErrorMeasure {
    fn parse(name: &str, target: &'static str) -> Result<Self> {
        match name {
            "g1prime" => Ok(ErrorMeasure::G1Prime),
            _ => Err(ProfilingError::UnknownErrorMeasure {
                target,
                name: name.to_owned(),
            }),
        }
    }
}

/// Everything a profiling run can be tuned with, as supplied by the caller.
///
/// Selector fields are plain strings so they can come straight from a command line or a
/// config file; [`Configuration::validate`] turns them into typed [`Settings`] and rejects
/// anything unknown before any work starts.
///
/// ```
/// use pyro_profiler::{Configuration, ProfilingError};
///
/// let mut config = Configuration::default();
/// config.launch_pad_order = "arity".to_owned();
/// assert!(config.clone().validate().is_ok());
///
/// config.ucc_error_measure = "unknown".to_owned();
/// config.is_find_keys = false;
/// assert!(matches!(
///     config.validate(),
///     Err(ProfilingError::UnknownErrorMeasure { .. })
/// ));
/// ```
#[derive(Clone, Debug)]
pub struct Configuration {
    /// Seed for every random decision the run makes.
    pub seed: u64,
    /// Largest key error that still counts as a (approximate) unique column combination.
    pub max_ucc_error: f64,
    /// Largest FD error that still counts as a (approximate) functional dependency.
    pub max_fd_error: f64,
    /// How far above the error bound an estimate's lower confidence bound must lie before the
    /// estimate alone may rule a candidate out.
    pub error_dev: f64,
    /// Largest number of columns in a key or FD left-hand side; 0 means unbounded.
    pub max_lhs: usize,
    /// Whether to search for unique column combinations.
    pub is_find_keys: bool,
    /// Whether to search for functional dependencies.
    pub is_find_fds: bool,
    /// Error measure for keys. Only "g1prime" is supported.
    pub ucc_error_measure: String,
    /// Error measure for FDs. Only "g1prime" is supported.
    pub fd_error_measure: String,
    /// How to pick the next launch pad: "arity" or "error".
    pub launch_pad_order: String,
    /// Whether null cells agree with each other. Used by relation loaders.
    pub is_null_equal_null: bool,
    /// Which intersected partitions to keep: "allcaching", "nocaching", "coin" or "entropy".
    pub caching_method: String,
    /// How to bound the partition cache: "default" (unbounded), "lru" or "size".
    pub eviction_method: String,
    /// Parameter of the caching method: the admission probability for "coin", the fraction of
    /// the maximum column entropy for "entropy".
    pub caching_method_value: f64,
    /// Number of row pairs in an agree-set sample before boosting; 0 disables sampling.
    pub sample_size: usize,
    /// Factor by which samples focused on launch pads are enlarged.
    pub sample_booster: f64,
    /// Confidence level of the intervals estimated from samples.
    pub estimate_confidence: f64,
    /// Sizing of the eviction policy (entries for "lru", row positions for "size"); 0 picks a
    /// default based on the relation.
    pub cache_capacity: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            seed: 0,
            max_ucc_error: 0.01,
            max_fd_error: 0.01,
            error_dev: 0.0,
            max_lhs: 0,
            is_find_keys: true,
            is_find_fds: true,
            ucc_error_measure: "g1prime".to_owned(),
            fd_error_measure: "g1prime".to_owned(),
            launch_pad_order: "error".to_owned(),
            is_null_equal_null: true,
            caching_method: "coin".to_owned(),
            eviction_method: "default".to_owned(),
            caching_method_value: 0.5,
            sample_size: 10_000,
            sample_booster: 10.0,
            estimate_confidence: 0.9,
            cache_capacity: 0,
        }
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ProfilingError::invalid(name, value, "must lie in [0, 1]"))
    }
}

impl Configuration {
    /// Checks every field and produces the immutable [`Settings`] for a run.
    ///
    /// Every selector is checked regardless of which dependency kinds are enabled, so a typo
    /// in a setting that happens to be unused still fails the run.
    pub fn validate(self) -> Result<Settings> {
        let ucc_error_measure = ErrorMeasure::parse(&self.ucc_error_measure, "key")?;
        let fd_error_measure = ErrorMeasure::parse(&self.fd_error_measure, "fd")?;
        let launch_pad_order = LaunchPadOrder::from_str(&self.launch_pad_order)?;
        let caching_method = CachingMethod::from_str(&self.caching_method)?;
        let eviction_method = EvictionMethod::from_str(&self.eviction_method)?;

        let max_ucc_error = check_unit("max_ucc_error", self.max_ucc_error)?;
        let max_fd_error = check_unit("max_fd_error", self.max_fd_error)?;
        if !(self.error_dev >= 0.0 && self.error_dev.is_finite()) {
            return Err(ProfilingError::invalid(
                "error_dev",
                self.error_dev,
                "must be finite and not negative",
            ));
        }
        if !(self.caching_method_value >= 0.0 && self.caching_method_value.is_finite()) {
            return Err(ProfilingError::invalid(
                "caching_method_value",
                self.caching_method_value,
                "must be finite and not negative",
            ));
        }
        if caching_method == CachingMethod::Coin {
            check_unit("caching_method_value", self.caching_method_value)?;
        }
        if !(self.sample_booster >= 1.0 && self.sample_booster.is_finite()) {
            return Err(ProfilingError::invalid(
                "sample_booster",
                self.sample_booster,
                "must be finite and at least 1",
            ));
        }
        if !(self.estimate_confidence > 0.0 && self.estimate_confidence < 1.0) {
            return Err(ProfilingError::invalid(
                "estimate_confidence",
                self.estimate_confidence,
                "must lie strictly between 0 and 1",
            ));
        }

        Ok(Settings {
            seed: self.seed,
            max_ucc_error,
            max_fd_error,
            error_dev: self.error_dev,
            max_lhs: self.max_lhs,
            is_find_keys: self.is_find_keys,
            is_find_fds: self.is_find_fds,
            ucc_error_measure,
            fd_error_measure,
            launch_pad_order,
            is_null_equal_null: self.is_null_equal_null,
            caching_method,
            eviction_method,
            caching_method_value: self.caching_method_value,
            sample_size: self.sample_size,
            sample_booster: self.sample_booster,
            estimate_confidence: self.estimate_confidence,
            cache_capacity: self.cache_capacity,
        })
    }
}

/// A validated [`Configuration`]. See there for the meaning of each field.
///
/// The only way to get one is [`Configuration::validate`], and the engine only ever hands out
/// shared references to it, so it stays fixed for the whole run.
#[derive(Clone, Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub struct Settings {
    pub seed: u64,
    pub max_ucc_error: f64,
    pub max_fd_error: f64,
    pub error_dev: f64,
    pub max_lhs: usize,
    pub is_find_keys: bool,
    pub is_find_fds: bool,
    pub ucc_error_measure: ErrorMeasure,
    pub fd_error_measure: ErrorMeasure,
    pub launch_pad_order: LaunchPadOrder,
    pub is_null_equal_null: bool,
    pub caching_method: CachingMethod,
    pub eviction_method: EvictionMethod,
    pub caching_method_value: f64,
    pub sample_size: usize,
    pub sample_booster: f64,
    pub estimate_confidence: f64,
    pub cache_capacity: usize,
}

impl Settings {
    /// The largest left-hand side arity to explore within a scope of `scope_arity` columns.
    pub fn max_arity(&self, scope_arity: usize) -> usize {
        if self.max_lhs == 0 {
            scope_arity
        } else {
            self.max_lhs.min(scope_arity)
        }
    }
}
