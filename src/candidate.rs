//! Lattice nodes under consideration, with what is known about their error.

use crate::error::ProfilingError;
use crate::sample::ConfidenceInterval;
use crate::vertical::Vertical;
use std::cmp::Ordering;
use std::str::FromStr;

/// A vertical together with its estimated error.
#[derive(Clone, Debug, PartialEq)]
pub struct DependencyCandidate {
    /// The candidate left-hand side (or key).
    pub vertical: Vertical,
    /// The error estimate.
    pub error: ConfidenceInterval,
    /// Whether `error` is a point known to equal the exact error.
    pub is_exact: bool,
}

impl DependencyCandidate {
    /// A candidate with an estimated error.
    pub fn new(vertical: Vertical, error: ConfidenceInterval, is_exact: bool) -> Self {
        DependencyCandidate {
            vertical,
            error,
            is_exact,
        }
    }

    /// A candidate whose error is known exactly.
    pub fn exact(vertical: Vertical, error: f64) -> Self {
        DependencyCandidate::new(vertical, ConfidenceInterval::point(error), true)
    }

    /// The number of columns in the candidate.
    pub fn arity(&self) -> usize {
        self.vertical.arity()
    }
}

/// The order in which launch pads are taken up, best first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LaunchPadOrder {
    /// Fewest columns first, then smallest estimated error.
    Arity,
    /// Smallest estimated error first, then fewest columns.
    Error,
}

impl FromStr for LaunchPadOrder {
    type Err = ProfilingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arity" => Ok(LaunchPadOrder::Arity),
            "error" => Ok(LaunchPadOrder::Error),
            _ => Err(ProfilingError::UnknownLaunchPadOrder(s.to_owned())),
        }
    }
}

impl LaunchPadOrder {
    /// Compares two candidates; the lesser one should be taken up first. Remaining ties are
    /// broken by the verticals themselves, so the order is total.
    ///
    /// ```
    /// use pyro_profiler::{ConfidenceInterval, DependencyCandidate, LaunchPadOrder, Vertical};
    /// use std::cmp::Ordering;
    ///
    /// let wide = DependencyCandidate::exact(Vertical::new(&[0, 1]), 0.1);
    /// let narrow = DependencyCandidate::new(
    ///     Vertical::single(2), ConfidenceInterval::new(0.2, 0.3, 0.4), false);
    ///
    /// assert_eq!(LaunchPadOrder::Arity.compare(&narrow, &wide), Ordering::Less);
    /// assert_eq!(LaunchPadOrder::Error.compare(&narrow, &wide), Ordering::Greater);
    /// ```
    pub fn compare(&self, a: &DependencyCandidate, b: &DependencyCandidate) -> Ordering {
        let by_arity = a.arity().cmp(&b.arity());
        let by_error = a.error.mean.total_cmp(&b.error.mean);
        match self {
            LaunchPadOrder::Arity => by_arity.then(by_error),
            LaunchPadOrder::Error => by_error.then(by_arity),
        }
        .then_with(|| a.vertical.cmp(&b.vertical))
    }
}
